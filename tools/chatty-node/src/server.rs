//! WebSocket endpoint speaking the client protocol.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message as Frame, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use chatty_common::protocol::{
    self, ClientMsg, Mutation, MutationResult, Payload, Query, QueryResult, RequestId, ServerMessage,
};

use crate::store::{ChatStore, StoreError};

/// Handle over the open WebSocket sessions of a node.
#[derive(Clone)]
pub struct Sessions {
    close: broadcast::Sender<()>,
}

impl Default for Sessions {
    fn default() -> Self {
        Self::new()
    }
}

impl Sessions {
    pub fn new() -> Self {
        Sessions { close: broadcast::channel(1).0 }
    }

    /// Close every open session. Returns how many were told to close.
    pub fn disconnect_all(&self) -> usize {
        self.close.send(()).unwrap_or(0)
    }

    pub fn open(&self) -> usize {
        self.close.receiver_count()
    }
}

#[derive(Clone)]
struct NodeState {
    store: Arc<ChatStore>,
    sessions: Sessions,
}

/// A node serving in the background.
pub struct RunningNode {
    pub addr: SocketAddr,
    pub sessions: Sessions,
    pub task: JoinHandle<std::io::Result<()>>,
}

pub fn router(store: Arc<ChatStore>, sessions: Sessions) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(NodeState { store, sessions })
}

pub async fn serve(listener: TcpListener, store: Arc<ChatStore>, sessions: Sessions) -> std::io::Result<()> {
    axum::serve(listener, router(store, sessions)).await
}

/// Bind `addr` and serve in the background. Port 0 picks an ephemeral port.
pub async fn spawn(addr: SocketAddr, store: Arc<ChatStore>) -> std::io::Result<RunningNode> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "chat node listening");
    let sessions = Sessions::new();
    let task = tokio::spawn(serve(listener, store, sessions.clone()));
    Ok(RunningNode { addr, sessions, task })
}

async fn ws_handler(ws: WebSocketUpgrade, State(node): State<NodeState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, node))
}

async fn handle_socket(socket: WebSocket, node: NodeState) {
    let NodeState { store, sessions } = node;
    let mut closed = sessions.close.subscribe();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match protocol::encode(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("encode failed: {e}");
                    continue;
                }
            };
            if sink.send(Frame::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = Session { store, tx, feeds: HashMap::new() };
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = closed.recv() => {
                tracing::info!("closing session");
                break;
            }
        };
        let Some(frame) = frame else { break };
        match frame {
            Ok(Frame::Text(text)) => session.handle(text.as_str()),
            Ok(Frame::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("socket error: {e}");
                break;
            }
        }
    }

    tracing::debug!(feeds = session.feeds.len(), "client disconnected");
    for (_, feed) in session.feeds.drain() {
        feed.abort();
    }
    drop(session);
    let _ = writer.await;
}

struct Session {
    store: Arc<ChatStore>,
    tx: mpsc::UnboundedSender<ServerMessage>,
    feeds: HashMap<RequestId, JoinHandle<()>>,
}

impl Session {
    fn handle(&mut self, text: &str) {
        let msg: ClientMsg = match protocol::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                self.reply(ServerMessage::Error { id: None, message: e.to_string() });
                return;
            }
        };
        tracing::debug!(?msg, "request");
        match msg {
            ClientMsg::Query { id, query } => {
                let result = match query {
                    Query::User { id: user } => QueryResult::User(self.store.user(user)),
                    Query::Group { group_id, offset, limit } => {
                        QueryResult::Group(self.store.group(group_id, offset, limit))
                    }
                };
                self.reply(ServerMessage::Data { id, payload: Payload::Query(result) });
            }
            ClientMsg::Mutate { id, mutation } => match self.mutate(mutation) {
                Ok(result) => self.reply(ServerMessage::Data { id, payload: Payload::Mutation(result) }),
                Err(e) => self.reply(ServerMessage::Error { id: Some(id), message: e.to_string() }),
            },
            ClientMsg::Subscribe { id, subscription } => {
                // Subscribe before spawning so events caused by later frames
                // on this connection are never missed.
                let mut events = self.store.subscribe();
                let tx = self.tx.clone();
                let feed = tokio::spawn(async move {
                    loop {
                        match events.recv().await {
                            Ok(event) if subscription.matches(&event) => {
                                if tx.send(ServerMessage::Event { id, event }).is_err() {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(skipped)) => tracing::warn!(id, skipped, "feed lagged"),
                            Err(RecvError::Closed) => {
                                let _ = tx.send(ServerMessage::Complete { id });
                                break;
                            }
                        }
                    }
                });
                if let Some(previous) = self.feeds.insert(id, feed) {
                    previous.abort();
                }
            }
            ClientMsg::Unsubscribe { id } => {
                if let Some(feed) = self.feeds.remove(&id) {
                    feed.abort();
                    self.reply(ServerMessage::Complete { id });
                }
            }
        }
    }

    fn mutate(&self, mutation: Mutation) -> Result<MutationResult, StoreError> {
        match mutation {
            Mutation::CreateMessage { group_id, user_id, text } => {
                self.store.create_message(group_id, user_id, &text).map(MutationResult::MessageCreated)
            }
            Mutation::UpdateGroup { id, name, last_read } => {
                self.store.update_group(id, &name, last_read).map(MutationResult::GroupUpdated)
            }
        }
    }

    fn reply(&self, msg: ServerMessage) {
        let _ = self.tx.send(msg);
    }
}
