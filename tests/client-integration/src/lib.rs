use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use chatty_client::{Action, AuthUser, ClientConfig, ClientContext, NavAction, Route, WsTransport};
use chatty_client::screens::MessagesScreen;
use chatty_common::{GroupId, UserId};
use chatty_node::{ChatStore, Sessions};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A chat node serving seeded data on an ephemeral local port.
pub struct TestNode {
    pub addr: SocketAddr,
    pub store: Arc<ChatStore>,
    sessions: Sessions,
    server: JoinHandle<std::io::Result<()>>,
}

impl TestNode {
    pub async fn start() -> Self {
        let store = Arc::new(ChatStore::seeded());
        let node = chatty_node::spawn(SocketAddr::from(([127, 0, 0, 1], 0)), store.clone())
            .await
            .unwrap_or_else(|e| panic!("failed to start chat node: {e}"));
        TestNode { addr: node.addr, store, sessions: node.sessions, server: node.task }
    }

    /// Close every client connection; the node keeps accepting new ones.
    pub fn drop_connections(&self) -> usize {
        self.sessions.disconnect_all()
    }

    /// Stop accepting connections, then close the open ones.
    pub async fn stop(&mut self) {
        self.server.abort();
        let _ = (&mut self.server).await;
        self.sessions.disconnect_all();
    }

    /// Serve the same store on the same address again.
    pub async fn restart(&mut self) {
        let node = chatty_node::spawn(self.addr, self.store.clone())
            .await
            .unwrap_or_else(|e| panic!("failed to restart chat node on {}: {e}", self.addr));
        self.sessions = node.sessions;
        self.server = node.task;
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Connect a client signed in as `user`, with its user query cached.
    pub async fn connect(&self, user: UserId) -> Client {
        let config = ClientConfig::default()
            .with_endpoint(self.endpoint())
            .with_user(user)
            .with_reconnect_delay(Duration::from_millis(50));
        let transport = Arc::new(
            WsTransport::connect(&config)
                .await
                .unwrap_or_else(|e| panic!("failed to connect to {}: {e}", config.endpoint)),
        );
        let ctx = ClientContext::new(config, transport.clone(), transport.clone());
        let me = ctx
            .fetch_user(user)
            .await
            .unwrap_or_else(|e| panic!("user query failed: {e}"))
            .unwrap_or_else(|| panic!("{user} is not seeded"));
        ctx.store.dispatch(Action::LoggedIn(AuthUser { id: me.id, username: me.username }));
        Client { ctx, transport }
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub struct Client {
    pub ctx: ClientContext,
    pub transport: Arc<WsTransport>,
}

impl Client {
    /// Navigate to a conversation and bind a loaded, observed screen to it.
    pub async fn open(&self, group: GroupId) -> MessagesScreen {
        self.ctx.store.dispatch(Action::Nav(NavAction::Navigate(Route::Messages {
            group_id: group,
            title: group.to_string(),
            icon: None,
        })));
        let entry = self.ctx.store.state().nav.current().clone();
        let mut screen = MessagesScreen::new(self.ctx.clone(), &entry).expect("messages route");
        screen.load().await.expect("first page");
        screen.observe().await.expect("observe");
        screen
    }

    /// Round-trip a query so every frame sent before it has been handled
    /// by the node.
    pub async fn settle(&self) {
        self.ctx
            .fetch_user(self.ctx.config.user_id)
            .await
            .unwrap_or_else(|e| panic!("user query failed: {e}"));
    }

    /// Wait until the transport has noticed its socket is gone.
    pub async fn wait_disconnected(&self) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while self.transport.is_connected() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Wait until `check` holds for the cache, re-checking on every write.
    pub async fn wait_for(&self, mut check: impl FnMut(&ClientContext) -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        let mut changes = self.ctx.cache.changes();
        loop {
            if check(&self.ctx) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match tokio::time::timeout(remaining, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return check(&self.ctx),
            }
        }
    }
}
