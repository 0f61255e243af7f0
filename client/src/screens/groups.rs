use chrono::{DateTime, Utc};

use chatty_common::{GroupId, UserId};

use crate::navigation::{NavAction, Route};
use crate::shared_cache::SharedCache;
use crate::store::{Action, Store};

/// One entry of the conversation list.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRow {
    pub group_id: GroupId,
    pub name: String,
    pub icon: Option<String>,
    pub preview_text: Option<String>,
    pub preview_time: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

/// The signed-in user's conversations, in the order of their group list.
/// Empty until the user query has been cached.
pub fn conversation_rows(cache: &SharedCache, user: UserId) -> Vec<ConversationRow> {
    let Some(user) = cache.read_user(user) else {
        return Vec::new();
    };
    user.groups
        .into_iter()
        .map(|group| {
            let head = group.messages.first();
            ConversationRow {
                group_id: group.id,
                preview_text: head.map(|m| m.text.clone()),
                preview_time: head.map(|m| m.created_at),
                name: group.name,
                icon: group.icon,
                unread_count: group.unread_count,
            }
        })
        .collect()
}

/// Push the conversation screen for `row`.
pub fn open_conversation(store: &Store, row: &ConversationRow) {
    store.dispatch(Action::Nav(NavAction::Navigate(Route::Messages {
        group_id: row.group_id,
        title: row.name.clone(),
        icon: row.icon.clone(),
    })));
}
