// Active-chat subscription: one live feed for the open conversation, keyed to
// (me, partner), torn down before any other chat is opened.

use log::{debug, error, info, warn};
use std::sync::Arc;

use super::view::{self, Bubble, BubbleKey, PanelState, ThreadView};
use super::{ActiveChat, MessagingScreen, ScreenEvent};
use crate::models::Message;
use crate::store::{FeedFilter, MessageFilter, Order, StoreResult};

impl MessagingScreen {
    /// Switch the open chat to `partner_id`.
    ///
    /// The previous chat subscription is released first, then the new one is
    /// established before the history is requested so nothing sent during the
    /// load is missed; bubbles are de-duplicated by message id. The thread shows
    /// its loading state until the `ThreadLoaded` event is dispatched.
    pub async fn open_chat(&mut self, partner_id: &str, partner_name: Option<&str>) {
        self.close_active_subscription().await;

        let name = self.partner_display_name(partner_id, partner_name);
        self.sidebar.set_active(partner_id);
        self.thread = Some(ThreadView::loading(partner_id, &name));
        if self.toast.as_ref().is_some_and(|t| t.sender_id == partner_id) {
            self.toast = None;
        }

        // Only the partner's own inserts; ours are rendered optimistically.
        match self
            .services
            .feed
            .subscribe(FeedFilter::sender(partner_id), self.feed_tx.clone())
            .await
        {
            Ok(handle) => {
                info!("Chat subscription {} opened for {}", handle, partner_id);
                self.active_chat = Some(ActiveChat { partner_id: partner_id.to_string(), handle });
            }
            Err(e) => error!("Chat subscription for {} failed, no live updates: {}", partner_id, e),
        }

        self.request_thread(partner_id);
    }

    async fn close_active_subscription(&mut self) {
        if let Some(previous) = self.active_chat.take() {
            match self.services.feed.unsubscribe(previous.handle).await {
                Ok(()) => debug!("Closed chat subscription {} for {}", previous.handle, previous.partner_id),
                Err(e) => warn!("Failed to close chat subscription {}: {}", previous.handle, e),
            }
        }
    }

    fn request_thread(&mut self, partner_id: &str) {
        self.thread_generation += 1;
        let generation = self.thread_generation;
        let filter = MessageFilter::Thread(self.me.clone(), partner_id.to_string());
        let store = Arc::clone(&self.services.messages);
        let results = self.task_tx.clone();
        let partner_id = partner_id.to_string();
        tokio::spawn(async move {
            let result = store.read_many(&filter, Order::CreatedAtAscending).await;
            if results.send(ScreenEvent::ThreadLoaded { partner_id, generation, result }).is_err() {
                debug!("Screen closed before a thread finished loading");
            }
        });
    }

    /// Install loaded history, keeping anything that arrived live or was sent
    /// while the load was in flight.
    pub(super) fn apply_thread(&mut self, partner_id: &str, generation: u64, result: StoreResult<Vec<Message>>) {
        if generation != self.thread_generation || self.open_partner() != Some(partner_id) {
            debug!("Dropping stale history for {}", partner_id);
            return;
        }

        let messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                error!("Error loading thread with {}: {}", partner_id, e);
                if let Some(thread) = self.thread.as_mut() {
                    thread.state = PanelState::Error(view::MESSAGES_ERROR.to_string());
                }
                return;
            }
        };

        let history: Vec<Bubble> = messages.iter().map(|m| self.bubble_for(m)).collect();
        let unread: Vec<String> = messages
            .iter()
            .filter(|m| m.is_unread_for(&self.me))
            .map(|m| m.id.clone())
            .collect();

        let Some(thread) = self.thread.as_mut() else { return };
        let live: Vec<Bubble> = std::mem::take(&mut thread.bubbles)
            .into_iter()
            .filter(|b| match &b.key {
                BubbleKey::Stored(id) => !messages.iter().any(|m| &m.id == id),
                BubbleKey::Pending(_) => true,
            })
            .collect();
        thread.bubbles = history;
        thread.bubbles.extend(live);
        thread.state = if thread.bubbles.is_empty() { PanelState::Empty } else { PanelState::Ready };
        debug!("Loaded {} message(s) with {}", messages.len(), partner_id);

        if !unread.is_empty() {
            self.spawn_read_receipt(MessageFilter::RecipientIn { recipient: self.me.clone(), ids: unread });
        }
    }

    /// Feed insert from the open chat's subscription.
    pub(super) fn on_chat_insert(&mut self, record: Message) {
        let Some(partner) = self.active_chat.as_ref().map(|c| c.partner_id.clone()) else {
            return;
        };
        if !record.is_between(&self.me, &partner) {
            debug!("Chat feed delivered message {} outside the open pair", record.id);
            return;
        }

        let bubble = self.bubble_for(&record);
        let Some(thread) = self.thread.as_mut().filter(|t| t.partner_id == partner) else {
            return;
        };
        if thread.contains_message(&record.id) {
            debug!("Message {} already rendered", record.id);
            return;
        }
        thread.append(bubble);

        if record.recipient_id == self.me {
            self.spawn_read_receipt(MessageFilter::RecipientIn {
                recipient: self.me.clone(),
                ids: vec![record.id.clone()],
            });
        }
    }

    pub(super) fn bubble_for(&self, message: &Message) -> Bubble {
        Bubble {
            key: BubbleKey::Stored(message.id.clone()),
            body: message.body.clone(),
            outgoing: message.sender_id == self.me,
            time_label: self.formatter.format_time(&message.created_at),
            sending: false,
        }
    }
}
