//! Seams between the screens and whatever executes operations.
//!
//! [`DataLayer`] runs queries, mutations and subscriptions; it knows nothing
//! about the cache. [`ReconnectSource`] reports transport reconnections.
//! Both are injected through [`crate::ClientContext`] instead of being
//! reached as globals.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;

use chatty_common::protocol::{Mutation, MutationResult, Query, QueryResult, Subscription, SubscriptionEvent};

use crate::error::ClientError;

/// Live events of one subscription. Ends when the server completes the
/// feed or the transport shuts down.
pub type EventStream = BoxStream<'static, SubscriptionEvent>;

#[async_trait]
pub trait DataLayer: Send + Sync {
    async fn query(&self, query: Query) -> Result<QueryResult, ClientError>;

    async fn mutate(&self, mutation: Mutation) -> Result<MutationResult, ClientError>;

    /// Start a feed. Dropping the stream ends the subscription.
    async fn subscribe(&self, subscription: Subscription) -> Result<EventStream, ClientError>;
}

pub type ReconnectCallback = Box<dyn Fn() + Send + Sync>;

pub trait ReconnectSource: Send + Sync {
    /// Run `callback` after every reconnection until the disposer is used
    /// or dropped.
    fn on_reconnected(&self, callback: ReconnectCallback) -> Disposer;
}

/// Undoes a registration exactly once: on [`Disposer::dispose`] or on drop.
#[must_use = "dropping a Disposer unregisters immediately"]
pub struct Disposer {
    undo: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Disposer {
    pub fn new(undo: impl FnOnce() + Send + Sync + 'static) -> Self {
        Disposer { undo: Some(Box::new(undo)) }
    }

    /// A disposer with nothing to undo.
    pub fn noop() -> Self {
        Disposer { undo: None }
    }

    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer").field("armed", &self.undo.is_some()).finish()
    }
}

/// In-process reconnect event source.
#[derive(Clone, Default)]
pub struct ReconnectHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Arc<dyn Fn() + Send + Sync>>>,
}

impl ReconnectHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every registered listener.
    pub fn notify(&self) {
        // Snapshot so a listener may register or dispose without deadlocking.
        let listeners: Vec<_> = self.inner.listeners.lock().values().cloned().collect();
        tracing::debug!(listeners = listeners.len(), "transport reconnected");
        for listener in listeners {
            listener();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl ReconnectSource for ReconnectHub {
    fn on_reconnected(&self, callback: ReconnectCallback) -> Disposer {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::from(callback));
        let inner = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.lock().remove(&id);
            }
        })
    }
}
