use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Server-assigned group (conversation) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

/// Server-assigned message identifier.
///
/// Messages that only exist as an optimistic prediction carry
/// [`MessageId::OPTIMISTIC`] until the server confirms them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    /// Placeholder id of a message the server has not confirmed yet.
    pub const OPTIMISTIC: MessageId = MessageId(-1);

    pub fn is_optimistic(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User:{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group:{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message:{}", self.0)
    }
}

/// The slice of a user embedded in messages and member lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub username: String,
}

/// Reference from a message to the group it was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: GroupId,
}

/// A message as delivered by queries, mutations and subscription events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub from: UserRef,
    pub to: GroupRef,
}

impl Message {
    /// Build the client-side prediction of a message about to be sent.
    pub fn optimistic(group: GroupId, from: UserRef, text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Message {
            id: MessageId::OPTIMISTIC,
            text: text.into(),
            created_at: now,
            from,
            to: GroupRef { id: group },
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.is_optimistic()
    }
}

/// A group with whichever message list the query selected.
///
/// In a user query `messages` holds the conversation-list preview (at most
/// the newest message); in a group query it holds one page of the
/// conversation, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupData {
    pub id: GroupId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub users: Vec<UserRef>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read: Option<MessageId>,
    #[serde(default)]
    pub unread_count: u32,
}

impl GroupData {
    /// Newest message of the selected list, if any.
    pub fn head(&self) -> Option<&Message> {
        self.messages.first()
    }
}

/// The current user with their conversation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub id: UserId,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub groups: Vec<GroupData>,
}

impl UserData {
    pub fn user_ref(&self) -> UserRef {
        UserRef {
            id: self.id,
            username: self.username.clone(),
        }
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.iter().map(|g| g.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimistic_ids_are_negative() {
        assert!(MessageId::OPTIMISTIC.is_optimistic());
        assert!(!MessageId(0).is_optimistic());
        assert!(!MessageId(6).is_optimistic());
    }

    #[test]
    fn entity_ids_display_as_cache_keys() {
        assert_eq!(GroupId(42).to_string(), "Group:42");
        assert_eq!(UserId(1).to_string(), "User:1");
        assert_eq!(MessageId(-1).to_string(), "Message:-1");
    }

    #[test]
    fn group_defaults_missing_fields() {
        let g: GroupData = serde_json::from_str(r#"{"id":7,"name":"Rustaceans"}"#).unwrap();
        assert_eq!(g.id, GroupId(7));
        assert!(g.messages.is_empty());
        assert_eq!(g.unread_count, 0);
        assert_eq!(g.last_read, None);
        assert!(g.head().is_none());
    }
}
