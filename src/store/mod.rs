// Collaborator seams for the hosted backend.
// The messaging screen only ever talks to these traits; `memory`, `rest` and
// `realtime` provide the concrete wiring.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{Message, MessageId, NewMessage, Profile, UserId};

pub mod memory;
pub mod realtime;
pub mod rest;

pub const MESSAGES_TABLE: &str = "messages";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Not connected to the change feed")]
    NotConnected,

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Message columns the filters can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    SenderId,
    RecipientId,
}

impl Column {
    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::SenderId => "sender_id",
            Column::RecipientId => "recipient_id",
        }
    }
}

/// The query shapes the messaging core needs from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageFilter {
    /// `sender = user OR recipient = user`
    Participant(UserId),
    /// `(sender = a AND recipient = b) OR (sender = b AND recipient = a)`
    Thread(UserId, UserId),
    /// `recipient = user AND id IN (...)`
    RecipientIn { recipient: UserId, ids: Vec<MessageId> },
}

impl MessageFilter {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            MessageFilter::Participant(user) => message.sender_id == *user || message.recipient_id == *user,
            MessageFilter::Thread(a, b) => message.is_between(a, b),
            MessageFilter::RecipientIn { recipient, ids } => {
                message.recipient_id == *recipient && ids.iter().any(|id| *id == message.id)
            }
        }
    }

    /// PostgREST query parameters for this filter.
    pub fn to_query(&self) -> Vec<(String, String)> {
        match self {
            MessageFilter::Participant(user) => vec![(
                "or".to_string(),
                format!("(sender_id.eq.{user},recipient_id.eq.{user})"),
            )],
            MessageFilter::Thread(a, b) => vec![(
                "or".to_string(),
                format!(
                    "(and(sender_id.eq.{a},recipient_id.eq.{b}),and(sender_id.eq.{b},recipient_id.eq.{a}))"
                ),
            )],
            MessageFilter::RecipientIn { recipient, ids } => vec![
                ("recipient_id".to_string(), format!("eq.{recipient}")),
                ("id".to_string(), format!("in.({})", ids.join(","))),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    CreatedAtAscending,
    CreatedAtDescending,
}

impl Order {
    pub fn to_query(&self) -> (String, String) {
        let direction = match self {
            Order::CreatedAtAscending => "asc",
            Order::CreatedAtDescending => "desc",
        };
        ("order".to_string(), format!("created_at.{direction}"))
    }
}

/// Partial update. Only the read flag is ever mutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MessagePatch {
    pub is_read: bool,
}

impl MessagePatch {
    pub fn mark_read() -> Self {
        MessagePatch { is_read: true }
    }
}

/// Change feed filter: insert events on `messages` where `column = value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub column: Column,
    pub value: String,
}

impl FeedFilter {
    pub fn sender(user: &str) -> Self {
        FeedFilter { column: Column::SenderId, value: user.to_string() }
    }

    pub fn recipient(user: &str) -> Self {
        FeedFilter { column: Column::RecipientId, value: user.to_string() }
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self.column {
            Column::Id => message.id == self.value,
            Column::SenderId => message.sender_id == self.value,
            Column::RecipientId => message.recipient_id == self.value,
        }
    }
}

impl fmt::Display for FeedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column.as_str(), self.value)
    }
}

/// Opaque id of a live feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Hands out process-unique subscription handles.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub fn allocate(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.next.fetch_add(1, AtomicOrdering::SeqCst) + 1)
    }
}

/// A newly inserted record delivered by a subscription.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub handle: SubscriptionHandle,
    pub record: Message,
}

pub type FeedSink = mpsc::UnboundedSender<FeedEvent>;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user's id, or `None` when there is no session.
    async fn current_user(&self) -> StoreResult<Option<UserId>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: NewMessage) -> StoreResult<Message>;
    async fn read_many(&self, filter: &MessageFilter, order: Order) -> StoreResult<Vec<Message>>;
    /// Returns the number of rows touched.
    async fn update(&self, filter: &MessageFilter, patch: MessagePatch) -> StoreResult<usize>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn profiles(&self, ids: &[UserId]) -> StoreResult<HashMap<UserId, Profile>>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Start delivering inserts on `messages` matching `filter` into `sink`.
    async fn subscribe(&self, filter: FeedFilter, sink: FeedSink) -> StoreResult<SubscriptionHandle>;
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()>;
}

/// Everything the messaging screen needs from the backend.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityProvider>,
    pub messages: Arc<dyn MessageStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub feed: Arc<dyn ChangeFeed>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: &str, from: &str, to: &str) -> Message {
        Message {
            id: id.to_string(),
            sender_id: from.to_string(),
            recipient_id: to.to_string(),
            body: "hi".to_string(),
            created_at: Utc::now(),
            is_read: false,
        }
    }

    #[test]
    fn filters_match_like_the_backend() {
        let m = message("7", "alice", "bob");
        assert!(MessageFilter::Participant("alice".into()).matches(&m));
        assert!(MessageFilter::Participant("bob".into()).matches(&m));
        assert!(!MessageFilter::Participant("carol".into()).matches(&m));
        assert!(MessageFilter::Thread("bob".into(), "alice".into()).matches(&m));
        assert!(!MessageFilter::Thread("alice".into(), "carol".into()).matches(&m));

        let receipt = MessageFilter::RecipientIn { recipient: "bob".into(), ids: vec!["7".into()] };
        assert!(receipt.matches(&m));
        let wrong_recipient = MessageFilter::RecipientIn { recipient: "alice".into(), ids: vec!["7".into()] };
        assert!(!wrong_recipient.matches(&m));
    }

    #[test]
    fn query_strings_use_postgrest_syntax() {
        assert_eq!(
            MessageFilter::Thread("a".into(), "b".into()).to_query(),
            vec![(
                "or".to_string(),
                "(and(sender_id.eq.a,recipient_id.eq.b),and(sender_id.eq.b,recipient_id.eq.a))".to_string()
            )]
        );
        let receipt = MessageFilter::RecipientIn { recipient: "me".into(), ids: vec!["1".into(), "2".into()] };
        assert_eq!(receipt.to_query()[1], ("id".to_string(), "in.(1,2)".to_string()));
        assert_eq!(Order::CreatedAtDescending.to_query().1, "created_at.desc");
        assert_eq!(FeedFilter::recipient("me").to_string(), "recipient_id=eq.me");
    }

    #[test]
    fn handles_are_unique() {
        let allocator = HandleAllocator::default();
        let a = allocator.allocate();
        let b = allocator.allocate();
        assert_ne!(a, b);
    }
}
