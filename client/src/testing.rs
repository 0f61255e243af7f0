//! Recording data layer for unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use chatty_common::protocol::{Mutation, MutationResult, Query, QueryResult, Subscription, SubscriptionEvent};
use chatty_common::{GroupData, GroupId, GroupRef, Message, MessageId, UserData, UserId, UserRef};

use crate::config::ClientConfig;
use crate::context::ClientContext;
use crate::error::ClientError;
use crate::transport::{DataLayer, EventStream, ReconnectHub};

pub const GROUP: GroupId = GroupId(42);

pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
}

pub fn ada() -> UserRef {
    UserRef { id: UserId(1), username: "ada".into() }
}

pub fn message(id: i64, group: i64, text: &str, minute: i64) -> Message {
    Message { id: MessageId(id), text: text.into(), created_at: at(minute), from: ada(), to: GroupRef { id: GroupId(group) } }
}

pub fn group(id: i64, messages: Vec<Message>) -> GroupData {
    GroupData {
        id: GroupId(id),
        name: format!("group {id}"),
        icon: None,
        users: vec![ada(), UserRef { id: UserId(2), username: "grace".into() }],
        messages,
        last_read: None,
        unread_count: 1,
    }
}

pub fn user(groups: Vec<GroupData>) -> UserData {
    UserData { id: UserId(1), email: "ada@example.com".into(), username: "ada".into(), groups }
}

#[derive(Default)]
struct State {
    user: Option<UserData>,
    groups: BTreeMap<GroupId, GroupData>,
    queries: Vec<Query>,
    mutations: Vec<Mutation>,
    subscriptions: Vec<Subscription>,
    feeds: Vec<mpsc::UnboundedSender<SubscriptionEvent>>,
    fail_next: Option<String>,
    fail_next_query: Option<String>,
}

/// Answers queries from scripted data, records every call and lets tests
/// push subscription events and hold requests in flight.
#[derive(Clone)]
pub struct FakeDataLayer {
    state: Arc<Mutex<State>>,
    gate: Arc<watch::Sender<bool>>,
    closed: Arc<watch::Sender<usize>>,
    hub: ReconnectHub,
}

/// Counts a feed as closed when its stream is dropped.
struct ClosedOnDrop(Arc<watch::Sender<usize>>);

impl Drop for ClosedOnDrop {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n += 1);
    }
}

impl FakeDataLayer {
    pub fn new() -> Self {
        FakeDataLayer {
            state: Arc::default(),
            gate: Arc::new(watch::channel(true).0),
            closed: Arc::new(watch::channel(0).0),
            hub: ReconnectHub::new(),
        }
    }

    pub fn context(&self) -> ClientContext {
        ClientContext::new(ClientConfig::default(), Arc::new(self.clone()), Arc::new(self.hub.clone()))
    }

    pub fn hub(&self) -> &ReconnectHub {
        &self.hub
    }

    pub fn set_user(&self, user: UserData) {
        self.state.lock().user = Some(user);
    }

    /// Script the full message history of a group, newest first.
    pub fn set_group(&self, group: GroupData) {
        self.state.lock().groups.insert(group.id, group);
    }

    pub fn fail_next_mutation(&self, message: &str) {
        self.state.lock().fail_next = Some(message.to_string());
    }

    pub fn fail_next_query(&self, message: &str) {
        self.state.lock().fail_next_query = Some(message.to_string());
    }

    /// Keep queries and mutations pending until [`FakeDataLayer::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn push(&self, event: SubscriptionEvent) {
        let mut state = self.state.lock();
        state.feeds.retain(|feed| feed.send(event.clone()).is_ok());
    }

    pub fn queries(&self) -> Vec<Query> {
        self.state.lock().queries.clone()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().mutations.clone()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().subscriptions.clone()
    }

    pub async fn wait_for_closed_feeds(&self, count: usize) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|n| *n >= count).await;
    }

    async fn pass_gate(&self) {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
    }

    fn create_message(&self, group_id: GroupId, user_id: UserId, text: String) -> Result<Message, ClientError> {
        let mut state = self.state.lock();
        let username = state.user.as_ref().filter(|u| u.id == user_id).map_or("ada".to_string(), |u| u.username.clone());
        let group = state.groups.get_mut(&group_id).ok_or(ClientError::NotFound("group", group_id.0))?;
        let id = group.messages.iter().map(|m| m.id.0).max().unwrap_or(0) + 1;
        let created = Message {
            id: MessageId(id),
            text,
            created_at: at(id),
            from: UserRef { id: user_id, username },
            to: GroupRef { id: group_id },
        };
        group.messages.insert(0, created.clone());
        Ok(created)
    }
}

#[async_trait]
impl DataLayer for FakeDataLayer {
    async fn query(&self, query: Query) -> Result<QueryResult, ClientError> {
        self.state.lock().queries.push(query.clone());
        self.pass_gate().await;
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next_query.take() {
            return Err(ClientError::Server(message));
        }
        Ok(match query {
            Query::User { id } => QueryResult::User(state.user.clone().filter(|u| u.id == id)),
            Query::Group { group_id, offset, limit } => QueryResult::Group(state.groups.get(&group_id).map(|g| {
                let messages = g.messages.iter().skip(offset).take(limit).cloned().collect();
                GroupData { messages, ..g.clone() }
            })),
        })
    }

    async fn mutate(&self, mutation: Mutation) -> Result<MutationResult, ClientError> {
        self.state.lock().mutations.push(mutation.clone());
        self.pass_gate().await;
        if let Some(message) = self.state.lock().fail_next.take() {
            return Err(ClientError::Server(message));
        }
        match mutation {
            Mutation::CreateMessage { group_id, user_id, text } => {
                self.create_message(group_id, user_id, text).map(MutationResult::MessageCreated)
            }
            Mutation::UpdateGroup { id, name, last_read } => {
                let mut state = self.state.lock();
                let record = state.groups.entry(id).or_insert_with(|| group(id.0, vec![]));
                record.name = name;
                record.last_read = last_read;
                record.unread_count = 0;
                Ok(MutationResult::GroupUpdated(GroupData { messages: vec![], ..record.clone() }))
            }
        }
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<EventStream, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            state.subscriptions.push(subscription);
            state.feeds.push(tx);
        }
        let guard = ClosedOnDrop(self.closed.clone());
        let events = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|event| (event, (rx, guard)))
        });
        Ok(events.boxed())
    }
}
