use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use chatty_common::{Cache, CacheUpdate, GroupData, GroupId, MutationId, UserData, UserId};

/// Cache shared by the shell, the screens and the feed tasks.
///
/// Every write bumps a revision published on a watch channel; consumers
/// re-read what they render when it changes. The lock is never held across
/// an await.
#[derive(Clone)]
pub struct SharedCache {
    cache: Arc<RwLock<Cache>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedCache {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        SharedCache {
            cache: Arc::new(RwLock::new(Cache::new())),
            revision: Arc::new(revision),
        }
    }

    pub fn apply(&self, update: CacheUpdate) {
        self.cache.write().apply(update);
        self.bump();
    }

    pub fn apply_all(&self, updates: Vec<CacheUpdate>) {
        self.cache.write().apply_all(updates);
        self.bump();
    }

    pub fn begin_optimistic(&self, updates: Vec<CacheUpdate>) -> MutationId {
        let id = self.cache.write().begin_optimistic(updates);
        self.bump();
        id
    }

    pub fn commit(&self, id: MutationId, updates: Vec<CacheUpdate>) {
        self.cache.write().commit(id, updates);
        self.bump();
    }

    pub fn rollback(&self, id: MutationId) {
        self.cache.write().rollback(id);
        self.bump();
    }

    pub fn read_user(&self, id: UserId) -> Option<UserData> {
        self.cache.read().read_user(id)
    }

    pub fn read_group(&self, id: GroupId) -> Option<GroupData> {
        self.cache.read().read_group(id)
    }

    pub fn confirmed_len(&self, id: GroupId) -> usize {
        self.cache.read().confirmed_len(id)
    }

    pub fn pending_mutations(&self) -> usize {
        self.cache.read().pending_mutations()
    }

    /// Receiver that observes every subsequent write.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}
