//! Development backend for the chat client: an in-memory store behind a
//! WebSocket endpoint.

pub mod server;
pub mod store;

pub use server::{router, serve, spawn, RunningNode, Sessions};
pub use store::{ChatStore, StoreError};
