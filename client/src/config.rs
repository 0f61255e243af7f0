use std::time::Duration;

use chatty_common::protocol::ITEMS_PER_PAGE;
use chatty_common::UserId;

/// Default backend endpoint, overridden at compile-time via CHATTY_ENDPOINT.
pub fn default_endpoint() -> String {
    option_env!("CHATTY_ENDPOINT")
        .unwrap_or("ws://localhost:3020/ws")
        .to_string()
}

/// Settings shared by the transport, the app shell and the screens.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket URL of the chat backend.
    pub endpoint: String,
    /// The signed-in user whose data drives the app shell.
    pub user_id: UserId,
    /// Messages fetched per conversation page.
    pub page_size: usize,
    /// Wait between reconnection attempts of the transport.
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_id: UserId(1),
            page_size: ITEMS_PER_PAGE,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = user_id;
        self
    }

    /// A zero page size would make `load_more` loop on an offset that never
    /// advances, so it is clamped to one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}
