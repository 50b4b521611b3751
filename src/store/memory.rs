// In-process backend: a message table, a users table, a session and a change feed
// sharing one lock. Used by the test suite and by `--demo`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ChangeFeed, FeedEvent, FeedFilter, FeedSink, HandleAllocator, IdentityProvider, MessageFilter,
    MessagePatch, MessageStore, Order, ProfileStore, Services, StoreError, StoreResult,
    SubscriptionHandle,
};
use crate::models::{Message, MessageId, NewMessage, Profile, UserId};

#[derive(Default)]
struct State {
    current_user: Option<UserId>,
    messages: Vec<Message>,
    profiles: HashMap<UserId, Profile>,
    subscriptions: HashMap<SubscriptionHandle, (FeedFilter, FeedSink)>,
    next_id: u64,
    fail_next_create: Option<String>,
    fail_reads: bool,
    fail_updates: bool,
    fail_profiles: bool,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    handles: Arc<HandleAllocator>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let backend = MemoryBackend::default();
        backend.lock().next_id = 1;
        backend
    }

    /// Bundle this backend as every collaborator of the messaging screen.
    pub fn services(&self) -> Services {
        Services {
            identity: Arc::new(self.clone()),
            messages: Arc::new(self.clone()),
            profiles: Arc::new(self.clone()),
            feed: Arc::new(self.clone()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-update; the data is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sign_in(&self, user: &str) {
        self.lock().current_user = Some(user.to_string());
    }

    pub fn sign_out(&self) {
        self.lock().current_user = None;
    }

    pub fn add_profile(&self, id: &str, full_name: Option<&str>, email: Option<&str>) {
        self.lock().profiles.insert(
            id.to_string(),
            Profile {
                id: id.to_string(),
                full_name: full_name.map(|s| s.to_string()),
                email: email.map(|s| s.to_string()),
            },
        );
    }

    /// Store a historical message without notifying subscribers.
    pub fn seed(&self, sender: &str, recipient: &str, body: &str, created_at: DateTime<Utc>, is_read: bool) -> Message {
        let mut state = self.lock();
        let message = Message {
            id: Self::take_id(&mut state),
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            body: body.to_string(),
            created_at,
            is_read,
        };
        state.messages.push(message.clone());
        message
    }

    /// Ids handed out by subsequent inserts start at `next`.
    pub fn set_next_id(&self, next: u64) {
        self.lock().next_id = next;
    }

    pub fn fail_next_create(&self, reason: &str) {
        self.lock().fail_next_create = Some(reason.to_string());
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.lock().fail_updates = fail;
    }

    pub fn set_fail_profiles(&self, fail: bool) {
        self.lock().fail_profiles = fail;
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn all_messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Filters of every live subscription, in no particular order.
    pub fn active_subscriptions(&self) -> Vec<FeedFilter> {
        self.lock().subscriptions.values().map(|(filter, _)| filter.clone()).collect()
    }

    /// Push a record straight to one subscription, ignoring its filter. Mimics a
    /// server replaying a row the client already holds. Returns false when the
    /// handle is unknown.
    pub fn deliver(&self, handle: SubscriptionHandle, record: Message) -> bool {
        let state = self.lock();
        match state.subscriptions.get(&handle) {
            Some((_, sink)) => sink.send(FeedEvent { handle, record }).is_ok(),
            None => false,
        }
    }

    fn take_id(state: &mut State) -> MessageId {
        let id = state.next_id.max(1);
        state.next_id = id + 1;
        id.to_string()
    }

    fn publish(state: &mut State, record: &Message) {
        let mut closed = Vec::new();
        for (handle, (filter, sink)) in state.subscriptions.iter() {
            if !filter.matches(record) {
                continue;
            }
            let event = FeedEvent { handle: *handle, record: record.clone() };
            if sink.send(event).is_err() {
                closed.push(*handle);
            }
        }
        for handle in closed {
            debug!("Dropping subscription {} with a closed sink", handle);
            state.subscriptions.remove(&handle);
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn current_user(&self) -> StoreResult<Option<UserId>> {
        Ok(self.lock().current_user.clone())
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn create(&self, new: NewMessage) -> StoreResult<Message> {
        let mut state = self.lock();
        if let Some(reason) = state.fail_next_create.take() {
            return Err(StoreError::Rejected(reason));
        }
        let message = Message {
            id: Self::take_id(&mut state),
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            body: new.body,
            created_at: Utc::now(),
            is_read: new.is_read,
        };
        state.messages.push(message.clone());
        Self::publish(&mut state, &message);
        Ok(message)
    }

    async fn read_many(&self, filter: &MessageFilter, order: Order) -> StoreResult<Vec<Message>> {
        let state = self.lock();
        if state.fail_reads {
            return Err(StoreError::Status { status: 503, body: "reads disabled".to_string() });
        }
        let mut rows: Vec<Message> = state.messages.iter().filter(|m| filter.matches(m)).cloned().collect();
        match order {
            Order::CreatedAtAscending => rows.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            Order::CreatedAtDescending => rows.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        Ok(rows)
    }

    async fn update(&self, filter: &MessageFilter, patch: MessagePatch) -> StoreResult<usize> {
        let mut state = self.lock();
        if state.fail_updates {
            return Err(StoreError::Status { status: 403, body: "updates disabled".to_string() });
        }
        let mut touched = 0;
        for message in state.messages.iter_mut().filter(|m| filter.matches(m)) {
            message.is_read = patch.is_read;
            touched += 1;
        }
        Ok(touched)
    }
}

#[async_trait]
impl ProfileStore for MemoryBackend {
    async fn profiles(&self, ids: &[UserId]) -> StoreResult<HashMap<UserId, Profile>> {
        let state = self.lock();
        if state.fail_profiles {
            return Err(StoreError::Status { status: 500, body: "profiles unavailable".to_string() });
        }
        Ok(ids
            .iter()
            .filter_map(|id| state.profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, filter: FeedFilter, sink: FeedSink) -> StoreResult<SubscriptionHandle> {
        let handle = self.handles.allocate();
        info!("Memory feed: {} subscribed to {}", handle, filter);
        self.lock().subscriptions.insert(handle, (filter, sink));
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()> {
        if self.lock().subscriptions.remove(&handle).is_some() {
            info!("Memory feed: {} unsubscribed", handle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn create_publishes_to_matching_subscriptions_only() {
        let backend = MemoryBackend::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let to_bob = backend.subscribe(FeedFilter::recipient("bob"), tx.clone()).await.unwrap();
        let _from_bob = backend.subscribe(FeedFilter::sender("bob"), tx).await.unwrap();

        let sent = backend.create(NewMessage::new("alice", "bob", "hello")).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.handle, to_bob);
        assert_eq!(event.record, sent);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ids_follow_set_next_id() {
        let backend = MemoryBackend::new();
        backend.set_next_id(42);
        let message = backend.create(NewMessage::new("a", "b", "x")).await.unwrap();
        assert_eq!(message.id, "42");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let backend = MemoryBackend::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = backend.subscribe(FeedFilter::recipient("bob"), tx).await.unwrap();
        backend.unsubscribe(handle).await.unwrap();

        backend.create(NewMessage::new("alice", "bob", "hello")).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(backend.active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn deliver_targets_one_handle() {
        let backend = MemoryBackend::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = backend.subscribe(FeedFilter::sender("bob"), tx).await.unwrap();
        let record = backend.seed("alice", "bob", "replayed", Utc::now(), false);

        assert!(backend.deliver(handle, record.clone()));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.handle, handle);
        assert_eq!(event.record, record);

        backend.unsubscribe(handle).await.unwrap();
        assert!(!backend.deliver(handle, record));
    }

    #[tokio::test]
    async fn injected_create_failure_is_one_shot() {
        let backend = MemoryBackend::new();
        backend.fail_next_create("offline");
        assert!(backend.create(NewMessage::new("a", "b", "x")).await.is_err());
        assert!(backend.create(NewMessage::new("a", "b", "x")).await.is_ok());
    }
}
