//! In-memory chat data served by the development node.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;

use chatty_common::protocol::SubscriptionEvent;
use chatty_common::{GroupData, GroupId, GroupRef, Message, MessageId, UserData, UserId, UserRef};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    #[error("unknown group {0}")]
    UnknownGroup(GroupId),
    #[error("{user} is not a member of {group}")]
    NotMember { user: UserId, group: GroupId },
    #[error("message text is empty")]
    EmptyMessage,
}

struct UserRow {
    email: String,
    username: String,
    groups: Vec<GroupId>,
}

struct GroupRow {
    name: String,
    icon: Option<String>,
    members: Vec<UserRef>,
    /// Newest first.
    messages: Vec<Message>,
    last_read: Option<MessageId>,
}

impl GroupRow {
    fn unread_count(&self) -> u32 {
        let unread = match self.last_read {
            Some(read) => self.messages.iter().filter(|m| m.id > read).count(),
            None => self.messages.len(),
        };
        u32::try_from(unread).unwrap_or(u32::MAX)
    }

    fn to_data(&self, id: GroupId, messages: Vec<Message>) -> GroupData {
        GroupData {
            id,
            name: self.name.clone(),
            icon: self.icon.clone(),
            users: self.members.clone(),
            messages,
            last_read: self.last_read,
            unread_count: self.unread_count(),
        }
    }
}

/// Users, groups and messages, plus the broadcast feed subscriptions read.
pub struct ChatStore {
    users: DashMap<UserId, UserRow>,
    groups: DashMap<GroupId, GroupRow>,
    next_user: AtomicI64,
    next_group: AtomicI64,
    next_message: AtomicI64,
    events: broadcast::Sender<SubscriptionEvent>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        ChatStore {
            users: DashMap::new(),
            groups: DashMap::new(),
            next_user: AtomicI64::new(0),
            next_group: AtomicI64::new(0),
            next_message: AtomicI64::new(0),
            events,
        }
    }

    /// Three users; user 1 belongs to both seeded groups and "rust" holds
    /// a dozen messages, more than one page.
    pub fn seeded() -> Self {
        let store = Self::new();
        let ada = store.add_user("ada@example.com", "ada");
        let grace = store.add_user("grace@example.com", "grace");
        let linus = store.add_user("linus@example.com", "linus");

        let base = Utc::now() - chrono::Duration::hours(1);
        let members = [ada, grace];
        if let Ok(rust) = store.add_group("rust", Some("crab.png".into()), &[ada, grace]) {
            for n in 0..12i64 {
                let author = members[(n % 2) as usize];
                let at = base + chrono::Duration::minutes(n);
                if let Err(e) = store.insert_message(rust.id, author, &format!("message {n}"), at) {
                    tracing::warn!("seeding failed: {e}");
                }
            }
        }
        if let Ok(general) = store.add_group("general", None, &[ada, linus]) {
            let at = base + chrono::Duration::minutes(30);
            if let Err(e) = store.insert_message(general.id, linus, "hello everyone", at) {
                tracing::warn!("seeding failed: {e}");
            }
        }
        tracing::info!(users = store.users.len(), groups = store.groups.len(), "seed data loaded");
        store
    }

    pub fn add_user(&self, email: &str, username: &str) -> UserId {
        let id = UserId(self.next_user.fetch_add(1, Ordering::Relaxed) + 1);
        self.users.insert(
            id,
            UserRow { email: email.to_string(), username: username.to_string(), groups: Vec::new() },
        );
        id
    }

    /// Create a group and announce it to every member.
    pub fn add_group(&self, name: &str, icon: Option<String>, members: &[UserId]) -> Result<GroupData, StoreError> {
        let mut refs = Vec::with_capacity(members.len());
        for member in members {
            let user = self.users.get(member).ok_or(StoreError::UnknownUser(*member))?;
            refs.push(UserRef { id: *member, username: user.username.clone() });
        }

        let id = GroupId(self.next_group.fetch_add(1, Ordering::Relaxed) + 1);
        let row = GroupRow { name: name.to_string(), icon, members: refs, messages: Vec::new(), last_read: None };
        let group = row.to_data(id, Vec::new());
        self.groups.insert(id, row);

        for member in members {
            if let Some(mut user) = self.users.get_mut(member) {
                user.groups.push(id);
            }
            let _ = self.events.send(SubscriptionEvent::GroupAdded { user_id: *member, group: group.clone() });
        }
        tracing::debug!(%id, name, "group added");
        Ok(group)
    }

    /// The user query: each group carries its newest message only.
    pub fn user(&self, id: UserId) -> Option<UserData> {
        let (email, username, group_ids) = {
            let user = self.users.get(&id)?;
            (user.email.clone(), user.username.clone(), user.groups.clone())
        };
        let groups = group_ids
            .iter()
            .filter_map(|gid| {
                let group = self.groups.get(gid)?;
                Some(group.to_data(*gid, group.messages.iter().take(1).cloned().collect()))
            })
            .collect();
        Some(UserData { id, email, username, groups })
    }

    /// The group query: one page of messages, newest first.
    pub fn group(&self, id: GroupId, offset: usize, limit: usize) -> Option<GroupData> {
        let group = self.groups.get(&id)?;
        let page = group.messages.iter().skip(offset).take(limit).cloned().collect();
        Some(group.to_data(id, page))
    }

    pub fn create_message(&self, group: GroupId, user: UserId, text: &str) -> Result<Message, StoreError> {
        self.insert_message(group, user, text, Utc::now())
    }

    fn insert_message(&self, group: GroupId, user: UserId, text: &str, at: DateTime<Utc>) -> Result<Message, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::EmptyMessage);
        }
        let username = self.users.get(&user).ok_or(StoreError::UnknownUser(user))?.username.clone();
        let message = {
            let mut row = self.groups.get_mut(&group).ok_or(StoreError::UnknownGroup(group))?;
            if !row.members.iter().any(|m| m.id == user) {
                return Err(StoreError::NotMember { user, group });
            }
            let message = Message {
                id: MessageId(self.next_message.fetch_add(1, Ordering::Relaxed) + 1),
                text: text.to_string(),
                created_at: at,
                from: UserRef { id: user, username },
                to: GroupRef { id: group },
            };
            row.messages.insert(0, message.clone());
            message
        };
        let _ = self.events.send(SubscriptionEvent::MessageAdded(message.clone()));
        tracing::debug!(group = %group, id = %message.id, "message created");
        Ok(message)
    }

    /// Rename a group and record how far it has been read.
    pub fn update_group(&self, id: GroupId, name: &str, last_read: Option<MessageId>) -> Result<GroupData, StoreError> {
        let mut row = self.groups.get_mut(&id).ok_or(StoreError::UnknownGroup(id))?;
        row.name = name.to_string();
        if let Some(read) = last_read {
            row.last_read = Some(row.last_read.map_or(read, |current| current.max(read)));
        }
        Ok(row.to_data(id, Vec::new()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.events.subscribe()
    }
}
