//! App shell: live feeds keyed off the signed-in user.
//!
//! [`Lifecycle`] is the pure state machine deciding which feeds and
//! listeners must exist for the current identity; [`AppShell`] executes its
//! [`Effect`]s against the injected data layer and owns the resulting
//! handles.

use chatty_common::protocol::{Subscription, SubscriptionEvent};
use chatty_common::{CacheUpdate, GroupId, UserData, UserId};

use crate::context::ClientContext;
use crate::error::ClientError;
use crate::feed::{start_feed, FeedHandle};
use crate::transport::Disposer;

/// What the shell derives its feeds from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: UserId,
    pub groups: Vec<GroupId>,
}

impl From<&UserData> for Identity {
    fn from(user: &UserData) -> Self {
        Identity { user: user.id, groups: user.group_ids() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RegisterReconnect { user: UserId },
    DisposeReconnect,
    SubscribeMessages { group_ids: Vec<GroupId> },
    CancelMessages,
    SubscribeGroups { user: UserId },
    CancelGroups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoggedOut,
    LoggedInIdle,
    LoggedInSubscribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Messages,
    Groups,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Session {
    user: UserId,
    group_count: Option<usize>,
    messages: bool,
    groups: bool,
    reconnect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    LoggedOut,
    LoggedIn(Session),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    state: State,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle { state: State::LoggedOut }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        match &self.state {
            State::LoggedOut => Phase::LoggedOut,
            State::LoggedIn(s) if s.messages || s.groups => Phase::LoggedInSubscribed,
            State::LoggedIn(_) => Phase::LoggedInIdle,
        }
    }

    /// Transition on an identity update and return the effects to run, in
    /// order.
    pub fn on_identity(&mut self, identity: Option<&Identity>) -> Vec<Effect> {
        let mut effects = Vec::new();

        let switching = matches!((&self.state, identity), (State::LoggedIn(s), Some(id)) if s.user != id.user);
        if identity.is_none() || switching {
            if let State::LoggedIn(session) = std::mem::replace(&mut self.state, State::LoggedOut) {
                if session.groups {
                    effects.push(Effect::CancelGroups);
                }
                if session.messages {
                    effects.push(Effect::CancelMessages);
                }
                if session.reconnect {
                    effects.push(Effect::DisposeReconnect);
                }
            }
        }

        let Some(identity) = identity else {
            return effects;
        };

        if self.state == State::LoggedOut {
            self.state = State::LoggedIn(Session {
                user: identity.user,
                group_count: None,
                messages: false,
                groups: false,
                reconnect: false,
            });
        }
        let State::LoggedIn(session) = &mut self.state else {
            return effects;
        };

        if !session.reconnect {
            session.reconnect = true;
            effects.push(Effect::RegisterReconnect { user: identity.user });
        }

        if session.group_count != Some(identity.groups.len()) {
            session.group_count = Some(identity.groups.len());
            if session.messages {
                session.messages = false;
                effects.push(Effect::CancelMessages);
            }
            if !identity.groups.is_empty() {
                session.messages = true;
                effects.push(Effect::SubscribeMessages { group_ids: identity.groups.clone() });
            }
        }

        if !session.groups {
            session.groups = true;
            effects.push(Effect::SubscribeGroups { user: identity.user });
        }

        effects
    }

    /// Forget a feed that could not be established so the next identity
    /// update tries again.
    pub fn feed_lost(&mut self, feed: Feed) {
        if let State::LoggedIn(session) = &mut self.state {
            match feed {
                Feed::Messages => {
                    session.messages = false;
                    session.group_count = None;
                }
                Feed::Groups => session.groups = false,
            }
        }
    }
}

/// The top-level connected component: keeps the shell feeds in line with
/// the signed-in user and the cached user query.
pub struct AppShell {
    ctx: ClientContext,
    lifecycle: Lifecycle,
    message_feed: Option<FeedHandle>,
    group_feed: Option<FeedHandle>,
    reconnect: Option<Disposer>,
    fetched_for: Option<UserId>,
}

impl AppShell {
    pub fn new(ctx: ClientContext) -> Self {
        AppShell {
            ctx,
            lifecycle: Lifecycle::new(),
            message_feed: None,
            group_feed: None,
            reconnect: None,
            fetched_for: None,
        }
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    pub fn message_feed(&self) -> Option<&FeedHandle> {
        self.message_feed.as_ref()
    }

    pub fn group_feed(&self) -> Option<&FeedHandle> {
        self.group_feed.as_ref()
    }

    pub fn has_reconnect_listener(&self) -> bool {
        self.reconnect.is_some()
    }

    /// Re-run the user query for the signed-in user.
    pub async fn refetch(&mut self) -> Result<(), ClientError> {
        if let Some(auth) = self.ctx.store.auth() {
            self.ctx.fetch_user(auth.id).await?;
            self.fetched_for = Some(auth.id);
        }
        Ok(())
    }

    /// Bring feeds in line with the store and the cache.
    pub async fn sync(&mut self) -> Result<(), ClientError> {
        let auth = self.ctx.store.auth();
        if let Some(auth) = &auth {
            if self.fetched_for != Some(auth.id) {
                self.refetch().await?;
            }
        } else {
            self.fetched_for = None;
        }

        let identity = auth
            .and_then(|auth| self.ctx.cache.read_user(auth.id))
            .map(|user| Identity::from(&user));
        let effects = self.lifecycle.on_identity(identity.as_ref());
        for effect in effects {
            self.run_effect(effect).await;
        }
        Ok(())
    }

    /// Follow store and cache changes until both are dropped.
    pub async fn run(mut self) -> Result<(), ClientError> {
        let mut store_changes = self.ctx.store.changes();
        let mut cache_changes = self.ctx.cache.changes();
        loop {
            if let Err(e) = self.sync().await {
                tracing::warn!("shell sync failed: {e}");
            }
            tokio::select! {
                changed = store_changes.changed() => if changed.is_err() { break },
                changed = cache_changes.changed() => if changed.is_err() { break },
            }
        }
        Ok(())
    }

    async fn run_effect(&mut self, effect: Effect) {
        tracing::debug!(?effect, "shell effect");
        match effect {
            Effect::RegisterReconnect { user } => {
                let ctx = self.ctx.clone();
                let runtime = tokio::runtime::Handle::current();
                let disposer = self.ctx.reconnect.on_reconnected(Box::new(move || {
                    let ctx = ctx.clone();
                    runtime.spawn(async move {
                        if let Err(e) = ctx.fetch_user(user).await {
                            tracing::warn!("refetch after reconnect failed: {e}");
                        }
                    });
                }));
                self.reconnect = Some(disposer);
            }
            Effect::DisposeReconnect => {
                if let Some(disposer) = self.reconnect.take() {
                    disposer.dispose();
                }
            }
            Effect::SubscribeMessages { group_ids } => {
                let subscription = Subscription::MessageAdded { group_ids };
                match start_feed(&self.ctx, subscription, |event| match event {
                    SubscriptionEvent::MessageAdded(message) => {
                        Some(CacheUpdate::SetPreview { group: message.to.id, message })
                    }
                    SubscriptionEvent::GroupAdded { .. } => None,
                })
                .await
                {
                    Ok(feed) => self.message_feed = Some(feed),
                    Err(e) => {
                        tracing::warn!("message feed failed: {e}");
                        self.lifecycle.feed_lost(Feed::Messages);
                    }
                }
            }
            Effect::CancelMessages => {
                if let Some(feed) = self.message_feed.take() {
                    feed.cancel();
                }
            }
            Effect::SubscribeGroups { user } => {
                let subscription = Subscription::GroupAdded { user_id: user };
                match start_feed(&self.ctx, subscription, move |event| match event {
                    SubscriptionEvent::GroupAdded { group, .. } => Some(CacheUpdate::PushGroup { user, group }),
                    SubscriptionEvent::MessageAdded(_) => None,
                })
                .await
                {
                    Ok(feed) => self.group_feed = Some(feed),
                    Err(e) => {
                        tracing::warn!("group feed failed: {e}");
                        self.lifecycle.feed_lost(Feed::Groups);
                    }
                }
            }
            Effect::CancelGroups => {
                if let Some(feed) = self.group_feed.take() {
                    feed.cancel();
                }
            }
        }
    }
}
