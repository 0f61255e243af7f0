//! WebSocket data layer.
//!
//! One connection task owns the socket. Requests are correlated with their
//! responses by id through a map of pending oneshot senders; live feeds are
//! routed by subscription id. When the socket drops, requests already written
//! to it fail with [`ClientError::Closed`] while queued ones wait for the next
//! connection. The task reconnects with backoff, re-sends every live
//! `subscribe` and then notifies reconnect listeners so screens can refetch
//! what they missed.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::channel::mpsc as feed_channel;
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chatty_common::protocol::{
    self, ClientMsg, Mutation, MutationResult, Payload, Query, QueryResult, RequestId, ServerMessage, Subscription,
    SubscriptionEvent,
};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::{DataLayer, Disposer, EventStream, ReconnectCallback, ReconnectHub, ReconnectSource};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct LiveFeed {
    subscription: Subscription,
    events: feed_channel::UnboundedSender<SubscriptionEvent>,
}

struct Pending {
    reply: oneshot::Sender<Result<Payload, ClientError>>,
    /// Written to the current socket.
    sent: bool,
}

struct Inner {
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<ClientMsg>,
    pending: DashMap<RequestId, Pending>,
    feeds: DashMap<RequestId, LiveFeed>,
    connected: AtomicBool,
    hub: ReconnectHub,
}

impl Inner {
    fn next_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn dispatch(&self, text: &str) {
        let msg: ServerMessage = match protocol::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("dropping undecodable frame: {e}");
                return;
            }
        };
        match msg {
            ServerMessage::Data { id, payload } => match self.pending.remove(&id) {
                Some((_, pending)) => {
                    let _ = pending.reply.send(Ok(payload));
                }
                None => tracing::debug!(id, "response for unknown request"),
            },
            ServerMessage::Event { id, event } => {
                if let Some(feed) = self.feeds.get(&id) {
                    let _ = feed.events.unbounded_send(event);
                }
            }
            ServerMessage::Error { id: Some(id), message } => {
                if let Some((_, pending)) = self.pending.remove(&id) {
                    let _ = pending.reply.send(Err(ClientError::Server(message)));
                } else if self.feeds.remove(&id).is_some() {
                    tracing::warn!(id, "subscription rejected: {message}");
                }
            }
            ServerMessage::Error { id: None, message } => tracing::warn!("server error: {message}"),
            ServerMessage::Complete { id } => {
                self.feeds.remove(&id);
            }
        }
    }

    fn mark_sent(&self, msg: &ClientMsg) {
        if let ClientMsg::Query { id, .. } | ClientMsg::Mutate { id, .. } = msg {
            if let Some(mut pending) = self.pending.get_mut(id) {
                pending.sent = true;
            }
        }
    }

    /// Fail requests the lost socket may or may not have delivered. Requests
    /// still queued are kept for the next connection.
    fn fail_sent(&self) -> usize {
        self.fail_where(|pending| pending.sent)
    }

    fn fail_all(&self) -> usize {
        self.fail_where(|_| true)
    }

    fn fail_where(&self, select: impl Fn(&Pending) -> bool) -> usize {
        let ids: Vec<RequestId> =
            self.pending.iter().filter(|entry| select(entry.value())).map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.reply.send(Err(ClientError::Closed));
                failed += 1;
            }
        }
        failed
    }

    fn resubscriptions(&self) -> Vec<ClientMsg> {
        self.feeds
            .iter()
            .map(|entry| ClientMsg::Subscribe { id: *entry.key(), subscription: entry.subscription.clone() })
            .collect()
    }
}

/// Connection to a chat backend speaking the JSON protocol.
pub struct WsTransport {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WsTransport {
    /// Connect to `config.endpoint`. The first attempt must succeed; later
    /// drops are retried in the background.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let (socket, _) = connect_async(config.endpoint.as_str()).await?;
        tracing::info!(endpoint = %config.endpoint, "connected");

        let (outgoing, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            next_id: AtomicU64::new(0),
            outgoing,
            pending: DashMap::new(),
            feeds: DashMap::new(),
            connected: AtomicBool::new(true),
            hub: ReconnectHub::new(),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(
            Arc::downgrade(&inner),
            socket,
            rx,
            shutdown_rx,
            config.endpoint.clone(),
            config.reconnect_delay,
        ));
        Ok(WsTransport { inner, shutdown, task })
    }

    /// The in-process hub reconnections are reported through.
    pub fn hub(&self) -> &ReconnectHub {
        &self.inner.hub
    }

    pub fn live_feeds(&self) -> usize {
        self.inner.feeds.len()
    }

    /// Whether a socket is currently open. False while reconnecting.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Close the socket and stop reconnecting. Pending requests fail with
    /// [`ClientError::Closed`].
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    async fn request(&self, msg: impl FnOnce(RequestId) -> ClientMsg) -> Result<Payload, ClientError> {
        let id = self.inner.next_id();
        let (reply, rx) = oneshot::channel();
        self.inner.pending.insert(id, Pending { reply, sent: false });
        if self.inner.outgoing.send(msg(id)).is_err() {
            self.inner.pending.remove(&id);
            return Err(ClientError::Closed);
        }
        rx.await.map_err(|_| ClientError::Closed)?
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.task.abort();
    }
}

#[async_trait]
impl DataLayer for WsTransport {
    async fn query(&self, query: Query) -> Result<QueryResult, ClientError> {
        let payload = self.request(|id| ClientMsg::Query { id, query }).await?;
        Ok(payload.into_query()?)
    }

    async fn mutate(&self, mutation: Mutation) -> Result<MutationResult, ClientError> {
        let payload = self.request(|id| ClientMsg::Mutate { id, mutation }).await?;
        Ok(payload.into_mutation()?)
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<EventStream, ClientError> {
        let id = self.inner.next_id();
        let (events, rx) = feed_channel::unbounded();
        self.inner.feeds.insert(id, LiveFeed { subscription: subscription.clone(), events });
        if self.inner.outgoing.send(ClientMsg::Subscribe { id, subscription }).is_err() {
            self.inner.feeds.remove(&id);
            return Err(ClientError::Closed);
        }
        Ok(FeedStream { id, rx, inner: Arc::downgrade(&self.inner) }.boxed())
    }
}

impl ReconnectSource for WsTransport {
    fn on_reconnected(&self, callback: ReconnectCallback) -> Disposer {
        self.inner.hub.on_reconnected(callback)
    }
}

/// Events of one subscription; unsubscribes when dropped.
struct FeedStream {
    id: RequestId,
    rx: feed_channel::UnboundedReceiver<SubscriptionEvent>,
    inner: Weak<Inner>,
}

impl Stream for FeedStream {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl Drop for FeedStream {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.feeds.remove(&self.id).is_some() {
                let _ = inner.outgoing.send(ClientMsg::Unsubscribe { id: self.id });
            }
        }
    }
}

enum Disconnect {
    Shutdown,
    Dropped,
}

async fn run(
    inner: Weak<Inner>,
    mut socket: Socket,
    mut outgoing: mpsc::UnboundedReceiver<ClientMsg>,
    mut shutdown: watch::Receiver<bool>,
    endpoint: String,
    reconnect_delay: Duration,
) {
    loop {
        let reason = pump(&inner, &mut socket, &mut outgoing, &mut shutdown).await;
        let live = inner.upgrade();
        if let Some(live) = &live {
            live.connected.store(false, Ordering::Release);
        }
        if matches!(reason, Disconnect::Shutdown) {
            if let Some(live) = &live {
                live.fail_all();
            }
            let _ = socket.close(None).await;
            tracing::info!("transport closed");
            return;
        }
        let Some(live) = live else { return };
        let failed = live.fail_sent();
        tracing::warn!(%endpoint, failed, "connection lost");
        drop(live);

        let Some(next) = reconnect(&endpoint, reconnect_delay, &mut shutdown).await else {
            if let Some(live) = inner.upgrade() {
                live.fail_all();
            }
            return;
        };
        socket = next;

        let Some(live) = inner.upgrade() else { return };
        for msg in live.resubscriptions() {
            if let Err(e) = send_frame(&mut socket, &msg).await {
                tracing::warn!("resubscribe failed: {e}");
            }
        }
        live.connected.store(true, Ordering::Release);
        live.hub.notify();
    }
}

async fn reconnect(endpoint: &str, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> Option<Socket> {
    let mut backoff = delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => return None,
        }
        if *shutdown.borrow() {
            return None;
        }
        match connect_async(endpoint).await {
            Ok((socket, _)) => {
                tracing::info!(%endpoint, "reconnected");
                return Some(socket);
            }
            Err(e) => {
                tracing::warn!(%endpoint, "reconnect failed: {e} (retrying in {backoff:?})");
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn pump(
    inner: &Weak<Inner>,
    socket: &mut Socket,
    outgoing: &mut mpsc::UnboundedReceiver<ClientMsg>,
    shutdown: &mut watch::Receiver<bool>,
) -> Disconnect {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Disconnect::Shutdown;
                }
            }
            msg = outgoing.recv() => {
                let Some(msg) = msg else { return Disconnect::Shutdown };
                if let Some(inner) = inner.upgrade() {
                    inner.mark_sent(&msg);
                }
                if let Err(e) = send_frame(socket, &msg).await {
                    tracing::warn!("send failed: {e}");
                    return Disconnect::Dropped;
                }
            }
            frame = socket.next() => match frame {
                Some(Ok(Frame::Text(text))) => match inner.upgrade() {
                    Some(inner) => inner.dispatch(text.as_str()),
                    None => return Disconnect::Shutdown,
                },
                Some(Ok(Frame::Close(_))) | None => return Disconnect::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("socket error: {e}");
                    return Disconnect::Dropped;
                }
            },
        }
    }
}

async fn send_frame(socket: &mut Socket, msg: &ClientMsg) -> Result<(), ClientError> {
    let text = protocol::encode(msg)?;
    socket.send(Frame::text(text)).await?;
    Ok(())
}
