//! JSON wire protocol between the client data layer and the chat backend.
//!
//! Every frame is a tagged object (`{"type": "...", ...}`). Requests carry a
//! client-chosen `id`; the server answers with `data`/`error` for queries and
//! mutations, and streams `event` frames for subscriptions until
//! `complete` or `unsubscribe`.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{GroupData, GroupId, Message, MessageId, UserData, UserId};

/// Correlates a request with its responses.
pub type RequestId = u64;

/// Default number of messages in one conversation page.
pub const ITEMS_PER_PAGE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    User { id: UserId },
    Group { group_id: GroupId, offset: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    CreateMessage { group_id: GroupId, user_id: UserId, text: String },
    UpdateGroup { id: GroupId, name: String, last_read: Option<MessageId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subscription {
    MessageAdded { group_ids: Vec<GroupId> },
    GroupAdded { user_id: UserId },
}

impl Subscription {
    /// Whether a pushed event belongs to this feed.
    pub fn matches(&self, event: &SubscriptionEvent) -> bool {
        match (self, event) {
            (Subscription::MessageAdded { group_ids }, SubscriptionEvent::MessageAdded(m)) => {
                group_ids.contains(&m.to.id)
            }
            (Subscription::GroupAdded { user_id }, SubscriptionEvent::GroupAdded { user_id: to, .. }) => {
                user_id == to
            }
            _ => false,
        }
    }
}

/// Result of a query. `None` means the entity does not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum QueryResult {
    User(Option<UserData>),
    Group(Option<GroupData>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MutationResult {
    MessageCreated(Message),
    GroupUpdated(GroupData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    MessageAdded(Message),
    /// `user_id` is the member the group was added for.
    GroupAdded { user_id: UserId, group: GroupData },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Query(QueryResult),
    Mutation(MutationResult),
}

impl Payload {
    pub fn into_query(self) -> Result<QueryResult, Error> {
        match self {
            Payload::Query(result) => Ok(result),
            Payload::Mutation(_) => Err(Error::UnexpectedPayload { expected: "query result" }),
        }
    }

    pub fn into_mutation(self) -> Result<MutationResult, Error> {
        match self {
            Payload::Mutation(result) => Ok(result),
            Payload::Query(_) => Err(Error::UnexpectedPayload { expected: "mutation result" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    Query { id: RequestId, query: Query },
    Mutate { id: RequestId, mutation: Mutation },
    Subscribe { id: RequestId, subscription: Subscription },
    Unsubscribe { id: RequestId },
}

impl ClientMsg {
    pub fn id(&self) -> RequestId {
        match self {
            ClientMsg::Query { id, .. }
            | ClientMsg::Mutate { id, .. }
            | ClientMsg::Subscribe { id, .. }
            | ClientMsg::Unsubscribe { id } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Data { id: RequestId, payload: Payload },
    Event { id: RequestId, event: SubscriptionEvent },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<RequestId>,
        message: String,
    },
    Complete { id: RequestId },
}

/// Encode a frame for the wire.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, Error> {
    serde_json::to_string(frame).map_err(Error::Encode)
}

/// Decode a frame received from the wire.
pub fn decode<'a, T: Deserialize<'a>>(text: &'a str) -> Result<T, Error> {
    serde_json::from_str(text).map_err(Error::Decode)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::model::{GroupRef, UserRef};

    fn message(id: i64, group: i64) -> Message {
        Message {
            id: MessageId(id),
            text: "hi".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            from: UserRef { id: UserId(1), username: "ada".into() },
            to: GroupRef { id: GroupId(group) },
        }
    }

    #[test]
    fn client_frames_are_type_tagged() {
        let frame = ClientMsg::Query {
            id: 3,
            query: Query::Group { group_id: GroupId(42), offset: 0, limit: ITEMS_PER_PAGE },
        };
        let json: serde_json::Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "query");
        assert_eq!(json["id"], 3);
        assert_eq!(json["query"]["kind"], "group");
        assert_eq!(json["query"]["group_id"], 42);
        assert_eq!(json["query"]["limit"], 10);
    }

    #[test]
    fn server_error_without_id_decodes() {
        let msg: ServerMessage = decode(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Error { id: None, message: "boom".into() });
    }

    #[test]
    fn event_frame_carries_iso_timestamps() {
        let frame = ServerMessage::Event { id: 9, event: SubscriptionEvent::MessageAdded(message(6, 42)) };
        let text = encode(&frame).unwrap();
        assert!(text.contains("2024-05-01T12:00:00Z"), "{text}");
        assert_eq!(decode::<ServerMessage>(&text).unwrap(), frame);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(decode::<ServerMessage>("{nope"), Err(Error::Decode(_))));
    }

    #[test]
    fn payload_kind_mismatch_is_reported() {
        let payload = Payload::Mutation(MutationResult::MessageCreated(message(6, 42)));
        assert!(matches!(
            payload.clone().into_query(),
            Err(Error::UnexpectedPayload { expected: "query result" })
        ));
        assert!(payload.into_mutation().is_ok());
    }

    #[test]
    fn message_feed_filters_by_group() {
        let feed = Subscription::MessageAdded { group_ids: vec![GroupId(1), GroupId(42)] };
        assert!(feed.matches(&SubscriptionEvent::MessageAdded(message(6, 42))));
        assert!(!feed.matches(&SubscriptionEvent::MessageAdded(message(7, 5))));
    }

    #[test]
    fn group_feed_filters_by_member() {
        let feed = Subscription::GroupAdded { user_id: UserId(1) };
        let group = GroupData {
            id: GroupId(3),
            name: "new".into(),
            icon: None,
            users: vec![],
            messages: vec![],
            last_read: None,
            unread_count: 0,
        };
        assert!(feed.matches(&SubscriptionEvent::GroupAdded { user_id: UserId(1), group: group.clone() }));
        assert!(!feed.matches(&SubscriptionEvent::GroupAdded { user_id: UserId(2), group }));
    }
}
