//! Conversation screen: one group's paginated message list.
//!
//! The screen reads the group query from the shared cache and keeps it
//! current: a live `message_added` feed prepends pushed messages, a
//! reconnect listener refetches the first page, and [`MessagesScreen::send`]
//! shows the message before the server confirms it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use chatty_common::protocol::{Mutation, MutationResult, Subscription, SubscriptionEvent};
use chatty_common::{CacheUpdate, GroupData, GroupId, GroupPatch, Message, MessageId, UserId};

use crate::context::ClientContext;
use crate::error::ClientError;
use crate::feed::{start_feed, FeedHandle};
use crate::navigation::{NavAction, Route, RouteEntry, RouteParams};
use crate::store::Action;
use crate::transport::Disposer;

/// One rendered message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: MessageId,
    pub text: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub colour: String,
    pub is_current_user: bool,
    /// Sent but not confirmed yet.
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub group_id: GroupId,
    pub name: String,
    pub icon: Option<String>,
    pub unread_count: u32,
    pub rows: Vec<MessageRow>,
}

pub struct MessagesScreen {
    ctx: ClientContext,
    route_key: String,
    group_id: GroupId,
    title: String,
    route_icon: Option<String>,
    loaded: bool,
    last_requested_read: Option<MessageId>,
    colours: BTreeMap<String, String>,
    feed: Option<FeedHandle>,
    reconnect: Option<Disposer>,
    loading_more: AtomicBool,
}

/// Clears the in-flight flag of `load_more` however it returns.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Stable colour for a username, as a CSS `hsl()` value.
pub fn username_colour(username: &str) -> String {
    let hash = username
        .bytes()
        .fold(5381u32, |hash, byte| hash.wrapping_mul(33) ^ u32::from(byte));
    format!("hsl({}, 65%, 45%)", hash % 360)
}

impl MessagesScreen {
    /// Bind a screen to a `Messages` route. Other routes have no
    /// conversation screen.
    pub fn new(ctx: ClientContext, entry: &RouteEntry) -> Option<Self> {
        let Route::Messages { group_id, title, icon } = &entry.route else {
            return None;
        };
        Some(MessagesScreen {
            ctx,
            route_key: entry.key.clone(),
            group_id: *group_id,
            title: title.clone(),
            route_icon: icon.clone(),
            loaded: false,
            last_requested_read: None,
            colours: BTreeMap::new(),
            feed: None,
            reconnect: None,
            loading_more: AtomicBool::new(false),
        })
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Fetch the first page into the cache.
    pub async fn load(&self) -> Result<(), ClientError> {
        let group = self.ctx.fetch_group_page(self.group_id, 0).await?;
        tracing::debug!(group = %self.group_id, messages = group.messages.len(), "conversation loaded");
        self.ctx.cache.apply(CacheUpdate::WriteGroup(group));
        Ok(())
    }

    /// React to the current cached group: refresh route params, mark read,
    /// and make sure the live feed and reconnect listener exist.
    pub async fn observe(&mut self) -> Result<(), ClientError> {
        let Some(group) = self.ctx.cache.read_group(self.group_id) else {
            if let Some(disposer) = self.reconnect.take() {
                tracing::debug!(group = %self.group_id, "group gone, dropping reconnect listener");
                disposer.dispose();
            }
            return Ok(());
        };

        if !self.loaded {
            self.loaded = true;
            if group.icon != self.route_icon {
                self.route_icon = group.icon.clone();
                self.ctx.store.dispatch(Action::Nav(NavAction::SetParams {
                    key: self.route_key.clone(),
                    params: RouteParams { title: None, icon: group.icon.clone() },
                }));
            }
        }

        for user in &group.users {
            self.colours
                .entry(user.username.clone())
                .or_insert_with(|| username_colour(&user.username));
        }

        if self.feed.is_none() {
            let subscription = Subscription::MessageAdded { group_ids: vec![self.group_id] };
            let feed = start_feed(&self.ctx, subscription, |event| match event {
                SubscriptionEvent::MessageAdded(message) => {
                    Some(CacheUpdate::InsertAtHead { group: message.to.id, message })
                }
                SubscriptionEvent::GroupAdded { .. } => None,
            })
            .await?;
            self.feed = Some(feed);
        }

        if self.reconnect.is_none() {
            self.reconnect = Some(self.register_reconnect());
        }

        self.mark_read(&group).await
    }

    fn register_reconnect(&self) -> Disposer {
        let ctx = self.ctx.clone();
        let group_id = self.group_id;
        let runtime = tokio::runtime::Handle::current();
        self.ctx.reconnect.on_reconnected(Box::new(move || {
            let ctx = ctx.clone();
            runtime.spawn(async move {
                match ctx.fetch_group_page(group_id, 0).await {
                    Ok(group) => ctx.cache.apply(CacheUpdate::WriteGroup(group)),
                    Err(e) => tracing::warn!(group = %group_id, "refetch after reconnect failed: {e}"),
                }
            });
        }))
    }

    async fn mark_read(&mut self, group: &GroupData) -> Result<(), ClientError> {
        let Some(head) = group.head().filter(|m| !m.is_optimistic()) else {
            return Ok(());
        };
        if group.last_read == Some(head.id) || self.last_requested_read == Some(head.id) {
            return Ok(());
        }
        self.last_requested_read = Some(head.id);
        self.ctx.cache.apply(CacheUpdate::PatchGroup {
            group: self.group_id,
            patch: GroupPatch { unread_count: Some(0), ..Default::default() },
        });

        let mutation = Mutation::UpdateGroup { id: self.group_id, name: group.name.clone(), last_read: Some(head.id) };
        match self.ctx.data.mutate(mutation).await? {
            MutationResult::GroupUpdated(updated) => {
                self.ctx.cache.apply(CacheUpdate::PatchGroup {
                    group: self.group_id,
                    patch: GroupPatch {
                        last_read: updated.last_read,
                        unread_count: Some(updated.unread_count),
                        ..Default::default()
                    },
                });
                Ok(())
            }
            MutationResult::MessageCreated(_) => Err(ClientError::UnexpectedResponse("group update")),
        }
    }

    /// Fetch the page after the confirmed messages and append it. Returns
    /// the number of messages received; a call made while another is in
    /// flight returns zero without fetching.
    pub async fn load_more(&self) -> Result<usize, ClientError> {
        if self.loading_more.swap(true, Ordering::AcqRel) {
            tracing::debug!(group = %self.group_id, "load_more already in flight");
            return Ok(0);
        }
        let _guard = LoadingGuard(&self.loading_more);

        if self.ctx.cache.read_group(self.group_id).is_none() {
            tracing::debug!(group = %self.group_id, "load_more before first page");
            return Ok(0);
        }
        let offset = self.ctx.cache.confirmed_len(self.group_id);
        let page = self.ctx.fetch_group_page(self.group_id, offset).await?;
        let received = page.messages.len();
        if received > 0 {
            self.ctx.cache.apply(CacheUpdate::AppendPage { group: self.group_id, messages: page.messages });
        }
        Ok(received)
    }

    pub fn is_loading_more(&self) -> bool {
        self.loading_more.load(Ordering::Acquire)
    }

    /// Send `text`, showing it at the head of the conversation until the
    /// server answers.
    pub async fn send(&self, text: &str) -> Result<Message, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::InvalidInput("message text is empty"));
        }
        let author = self.ctx.store.auth().ok_or(ClientError::NotSignedIn)?;

        let predicted = Message::optimistic(self.group_id, author.user_ref(), text, Utc::now());
        let mutation_id = self.ctx.cache.begin_optimistic(CacheUpdate::message_created(&predicted));

        let mutation = Mutation::CreateMessage { group_id: self.group_id, user_id: author.id, text: text.to_string() };
        match self.ctx.data.mutate(mutation).await {
            Ok(MutationResult::MessageCreated(message)) => {
                self.ctx.cache.commit(mutation_id, CacheUpdate::message_created(&message));
                Ok(message)
            }
            Ok(MutationResult::GroupUpdated(_)) => {
                self.ctx.cache.rollback(mutation_id);
                Err(ClientError::UnexpectedResponse("created message"))
            }
            Err(e) => {
                tracing::warn!(group = %self.group_id, "send failed: {e}");
                self.ctx.cache.rollback(mutation_id);
                Err(e)
            }
        }
    }

    /// Render-ready projection of the cached conversation.
    pub fn view(&self) -> Option<ConversationView> {
        let group = self.ctx.cache.read_group(self.group_id)?;
        let me = self.ctx.store.auth().map(|auth| auth.id);
        let rows = group.messages.iter().map(|m| self.row(m, me)).collect();
        Some(ConversationView {
            group_id: group.id,
            name: group.name,
            icon: group.icon,
            unread_count: group.unread_count,
            rows,
        })
    }

    fn row(&self, message: &Message, me: Option<UserId>) -> MessageRow {
        let colour = self
            .colours
            .get(&message.from.username)
            .cloned()
            .unwrap_or_else(|| username_colour(&message.from.username));
        MessageRow {
            id: message.id,
            text: message.text.clone(),
            username: message.from.username.clone(),
            created_at: message.created_at,
            colour,
            is_current_user: me == Some(message.from.id),
            pending: message.is_optimistic(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.feed.as_ref().is_some_and(|feed| !feed.is_finished())
    }

    pub fn has_reconnect_listener(&self) -> bool {
        self.reconnect.is_some()
    }

    /// Stop the live feed and the reconnect listener.
    pub fn close(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.cancel();
        }
        if let Some(disposer) = self.reconnect.take() {
            disposer.dispose();
        }
    }
}

impl Drop for MessagesScreen {
    fn drop(&mut self) {
        self.close();
    }
}
