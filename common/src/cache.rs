//! Normalized client cache.
//!
//! Users and groups are stored once, keyed by id, and shared by every query
//! that selects them. A group carries two message lists because the two
//! queries select different windows of its messages: `preview` holds the
//! newest message shown in the conversation list (user query), `page` holds
//! the paginated conversation (group query).
//!
//! All writes are expressed as [`CacheUpdate`] values. Confirmed writes go
//! to the base entities; optimistic writes live in per-mutation layers that
//! are replayed on top of the base to form the view every read goes through.
//! Committing or rolling back a mutation drops its layer, so a prediction is
//! never visible next to the record that supersedes it.

use std::collections::BTreeMap;

use crate::model::{GroupData, GroupId, Message, MessageId, UserData, UserId, UserRef};

/// Identifies one optimistic layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(pub u64);

/// Fields of a group that can be written by fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub last_read: Option<MessageId>,
    pub unread_count: Option<u32>,
}

/// Typed cache write.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheUpdate {
    /// Store a user query result; each group's `messages` become its preview.
    WriteUser(UserData),
    /// Store the first page of a group query, replacing the cached page.
    WriteGroup(GroupData),
    /// Put a message at the front of a conversation page. A confirmed
    /// message already present is replaced in place instead.
    InsertAtHead { group: GroupId, message: Message },
    /// Append an older page at the end of a conversation page, skipping
    /// messages already present.
    AppendPage { group: GroupId, messages: Vec<Message> },
    /// Swap the message with `id` for `message` in page and preview.
    ReplaceById { group: GroupId, id: MessageId, message: Message },
    /// Make `message` the only preview message of a group.
    SetPreview { group: GroupId, message: Message },
    /// Make `message` the preview head if the group has none or the current
    /// head was created earlier.
    PreviewIfNewer { group: GroupId, message: Message },
    /// Add a group to a user's conversation list.
    PushGroup { user: UserId, group: GroupData },
    /// Fragment write on a group.
    PatchGroup { group: GroupId, patch: GroupPatch },
}

impl CacheUpdate {
    /// The writes that follow the server creating `message`: it heads the
    /// conversation page and, when newest, the conversation-list preview.
    pub fn message_created(message: &Message) -> Vec<CacheUpdate> {
        vec![
            CacheUpdate::InsertAtHead { group: message.to.id, message: message.clone() },
            CacheUpdate::PreviewIfNewer { group: message.to.id, message: message.clone() },
        ]
    }
}

#[derive(Debug, Clone)]
struct UserRecord {
    email: String,
    username: String,
    groups: Vec<GroupId>,
}

#[derive(Debug, Clone)]
struct GroupRecord {
    name: String,
    icon: Option<String>,
    users: Vec<UserRef>,
    last_read: Option<MessageId>,
    unread_count: u32,
    preview: Vec<Message>,
    /// `None` until the group query has been answered.
    page: Option<Vec<Message>>,
}

impl GroupRecord {
    fn from_data(group: &GroupData) -> Self {
        GroupRecord {
            name: group.name.clone(),
            icon: group.icon.clone(),
            users: group.users.clone(),
            last_read: group.last_read,
            unread_count: group.unread_count,
            preview: Vec::new(),
            page: None,
        }
    }

    /// Merge the scalar fields a query selected.
    fn merge_fields(&mut self, group: &GroupData) {
        self.name = group.name.clone();
        if group.icon.is_some() {
            self.icon = group.icon.clone();
        }
        if !group.users.is_empty() {
            self.users = group.users.clone();
        }
        if group.last_read.is_some() {
            self.last_read = group.last_read;
        }
        self.unread_count = group.unread_count;
    }

    fn to_data(&self, id: GroupId, messages: Vec<Message>) -> GroupData {
        GroupData {
            id,
            name: self.name.clone(),
            icon: self.icon.clone(),
            users: self.users.clone(),
            messages,
            last_read: self.last_read,
            unread_count: self.unread_count,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Entities {
    users: BTreeMap<UserId, UserRecord>,
    groups: BTreeMap<GroupId, GroupRecord>,
}

impl Entities {
    fn upsert_group(&mut self, group: &GroupData) -> &mut GroupRecord {
        self.groups
            .entry(group.id)
            .and_modify(|record| record.merge_fields(group))
            .or_insert_with(|| GroupRecord::from_data(group))
    }

    fn apply(&mut self, update: &CacheUpdate) {
        match update {
            CacheUpdate::WriteUser(user) => {
                for group in &user.groups {
                    self.upsert_group(group).preview = group.messages.clone();
                }
                self.users.insert(
                    user.id,
                    UserRecord {
                        email: user.email.clone(),
                        username: user.username.clone(),
                        groups: user.group_ids(),
                    },
                );
            }
            CacheUpdate::WriteGroup(group) => {
                self.upsert_group(group).page = Some(group.messages.clone());
            }
            CacheUpdate::InsertAtHead { group, message } => {
                let Some(page) = self.page_mut(*group) else { return };
                let existing = if message.is_optimistic() {
                    None
                } else {
                    page.iter().position(|m| m.id == message.id)
                };
                match existing {
                    Some(index) => page[index] = message.clone(),
                    None => page.insert(0, message.clone()),
                }
            }
            CacheUpdate::AppendPage { group, messages } => {
                let Some(page) = self.page_mut(*group) else { return };
                for message in messages {
                    if !page.iter().any(|m| m.id == message.id) {
                        page.push(message.clone());
                    }
                }
            }
            CacheUpdate::ReplaceById { group, id, message } => {
                let Some(record) = self.groups.get_mut(group) else { return };
                let lists = record.page.iter_mut().chain(std::iter::once(&mut record.preview));
                for list in lists {
                    if let Some(slot) = list.iter_mut().find(|m| m.id == *id) {
                        *slot = message.clone();
                    }
                }
            }
            CacheUpdate::SetPreview { group, message } => {
                if let Some(record) = self.groups.get_mut(group) {
                    record.preview = vec![message.clone()];
                }
            }
            CacheUpdate::PreviewIfNewer { group, message } => {
                let Some(record) = self.groups.get_mut(group) else { return };
                match record.preview.first_mut() {
                    None => record.preview.push(message.clone()),
                    Some(head) if head.created_at < message.created_at => *head = message.clone(),
                    Some(_) => {}
                }
            }
            CacheUpdate::PushGroup { user, group } => {
                self.upsert_group(group).preview = group.messages.clone();
                if let Some(record) = self.users.get_mut(user) {
                    if !record.groups.contains(&group.id) {
                        record.groups.push(group.id);
                    }
                }
            }
            CacheUpdate::PatchGroup { group, patch } => {
                let Some(record) = self.groups.get_mut(group) else { return };
                if let Some(name) = &patch.name {
                    record.name = name.clone();
                }
                if let Some(icon) = &patch.icon {
                    record.icon = Some(icon.clone());
                }
                if let Some(last_read) = patch.last_read {
                    record.last_read = Some(last_read);
                }
                if let Some(unread) = patch.unread_count {
                    record.unread_count = unread;
                }
            }
        }
    }

    fn page_mut(&mut self, group: GroupId) -> Option<&mut Vec<Message>> {
        let page = self.groups.get_mut(&group).and_then(|g| g.page.as_mut());
        if page.is_none() {
            tracing::debug!(%group, "write to a conversation page that was never fetched");
        }
        page
    }
}

#[derive(Debug, Clone)]
struct OptimisticLayer {
    id: MutationId,
    updates: Vec<CacheUpdate>,
}

/// The client's normalized cache with optimistic layers.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    base: Entities,
    layers: Vec<OptimisticLayer>,
    view: Entities,
    next_mutation: u64,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a confirmed write.
    pub fn apply(&mut self, update: CacheUpdate) {
        self.base.apply(&update);
        if self.layers.is_empty() {
            self.view.apply(&update);
        } else {
            self.rebuild_view();
        }
    }

    pub fn apply_all(&mut self, updates: impl IntoIterator<Item = CacheUpdate>) {
        for update in updates {
            self.base.apply(&update);
        }
        self.rebuild_view();
    }

    /// Layer predicted writes on top of the confirmed data.
    pub fn begin_optimistic(&mut self, updates: Vec<CacheUpdate>) -> MutationId {
        self.next_mutation += 1;
        let id = MutationId(self.next_mutation);
        for update in &updates {
            self.view.apply(update);
        }
        self.layers.push(OptimisticLayer { id, updates });
        id
    }

    /// Drop the layer of `id` and apply the confirmed writes in its place.
    pub fn commit(&mut self, id: MutationId, updates: Vec<CacheUpdate>) {
        self.layers.retain(|layer| layer.id != id);
        for update in &updates {
            self.base.apply(update);
        }
        self.rebuild_view();
    }

    /// Drop the layer of `id` without confirmed writes.
    pub fn rollback(&mut self, id: MutationId) {
        let before = self.layers.len();
        self.layers.retain(|layer| layer.id != id);
        if self.layers.len() != before {
            self.rebuild_view();
        }
    }

    /// Number of mutations still awaiting confirmation.
    pub fn pending_mutations(&self) -> usize {
        self.layers.len()
    }

    /// Read the user query, with each group's preview as its messages.
    pub fn read_user(&self, id: UserId) -> Option<UserData> {
        let user = self.view.users.get(&id)?;
        let groups = user
            .groups
            .iter()
            .filter_map(|gid| {
                let record = self.view.groups.get(gid)?;
                Some(record.to_data(*gid, record.preview.clone()))
            })
            .collect();
        Some(UserData {
            id,
            email: user.email.clone(),
            username: user.username.clone(),
            groups,
        })
    }

    /// Read the group query. `None` until its first page has been written.
    pub fn read_group(&self, id: GroupId) -> Option<GroupData> {
        let record = self.view.groups.get(&id)?;
        let page = record.page.as_ref()?;
        Some(record.to_data(id, page.clone()))
    }

    /// Number of confirmed messages in a conversation page; the offset of
    /// the next page.
    pub fn confirmed_len(&self, id: GroupId) -> usize {
        self.base
            .groups
            .get(&id)
            .and_then(|g| g.page.as_ref())
            .map_or(0, |page| page.len())
    }

    fn rebuild_view(&mut self) {
        let mut view = self.base.clone();
        for layer in &self.layers {
            for update in &layer.updates {
                view.apply(update);
            }
        }
        self.view = view;
    }
}
