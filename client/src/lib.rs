//! Client state for the chat app: navigation, the signed-in user, a
//! normalized cache kept live by subscriptions, and the screens bound to it.

pub mod config;
pub mod context;
pub mod error;
pub mod feed;
pub mod navigation;
pub mod screens;
pub mod shared_cache;
pub mod shell;
pub mod store;
pub mod transport;
pub mod ws;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use context::ClientContext;
pub use error::ClientError;
pub use navigation::{navigation_reducer, AppNavigator, NavAction, NavState, Route, RouteEntry, Router, Tab};
pub use screens::{ConversationRow, MessagesScreen};
pub use shared_cache::SharedCache;
pub use shell::{AppShell, Effect, Identity, Lifecycle, Phase};
pub use store::{reduce, Action, AppState, AuthUser, Store};
pub use transport::{DataLayer, Disposer, ReconnectHub, ReconnectSource};
pub use ws::WsTransport;
