// Messaging screen controller.
// Owns the session identity, the open-chat state, both live subscriptions and
// the render cache. Loads and sends run as background tasks; their results and
// feed events are applied one at a time through `dispatch`, so the caller's
// loop keeps drawing while the network is busy.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DisplayConfig;
use crate::conversations::{build_conversations, partner_ids};
use crate::models::{Conversation, ConversationTarget, Message, UserId};
use crate::store::{
    FeedEvent, FeedFilter, FeedSink, MessageFilter, MessagePatch, Order, Services, StoreResult,
    SubscriptionHandle,
};
use crate::timestamps::TimeFormatter;

pub mod active_chat;
pub mod inbox;
pub mod send;
pub mod view;

pub use send::PendingSend;
pub use view::{Bubble, BubbleKey, PanelState, Sidebar, ThreadView, Toast};

const FALLBACK_PARTNER_NAME: &str = "User";

/// Outcome of opening the messaging screen.
pub enum Launch {
    Ready(MessagingScreen),
    /// No signed-in user: send them to the login view instead.
    RedirectToLogin,
}

/// Something the screen must react to.
#[derive(Debug)]
pub enum ScreenEvent {
    Feed(FeedEvent),
    SendFinished(PendingSend, StoreResult<Message>),
    /// History for a chat; dropped unless `generation` is still the latest request.
    ThreadLoaded {
        partner_id: UserId,
        generation: u64,
        result: StoreResult<Vec<Message>>,
    },
    ConversationsLoaded {
        generation: u64,
        result: StoreResult<Vec<Conversation>>,
    },
}

struct ActiveChat {
    partner_id: UserId,
    handle: SubscriptionHandle,
}

pub struct MessagingScreen {
    services: Services,
    me: UserId,
    formatter: TimeFormatter,
    toast_seconds: u64,
    sidebar: Sidebar,
    thread: Option<ThreadView>,
    active_chat: Option<ActiveChat>,
    inbox: Option<SubscriptionHandle>,
    input: String,
    toast: Option<Toast>,
    alert: Option<String>,
    feed_tx: FeedSink,
    feed_rx: mpsc::UnboundedReceiver<FeedEvent>,
    task_tx: mpsc::UnboundedSender<ScreenEvent>,
    task_rx: mpsc::UnboundedReceiver<ScreenEvent>,
    thread_generation: u64,
    sidebar_generation: u64,
    receipts: Vec<JoinHandle<()>>,
}

impl MessagingScreen {
    /// Resolve the session, build the sidebar, start the inbox feed and open
    /// `target` if one was requested.
    ///
    /// The sidebar is loaded before this returns; the target's history arrives
    /// later as a `ThreadLoaded` event.
    pub async fn start(services: Services, display: DisplayConfig, target: Option<ConversationTarget>) -> Launch {
        let me = match services.identity.current_user().await {
            Ok(Some(user)) => user,
            Ok(None) => {
                info!("No signed-in user, redirecting to login");
                return Launch::RedirectToLogin;
            }
            Err(e) => {
                error!("Failed to resolve the current user: {}", e);
                return Launch::RedirectToLogin;
            }
        };

        let mut screen = MessagingScreen::new(services, me, display);
        screen.load_conversations(target.as_ref()).await;
        screen.subscribe_inbox().await;
        if let Some(target) = target {
            screen.open_chat(&target.partner_id, target.partner_name.as_deref()).await;
        }
        Launch::Ready(screen)
    }

    fn new(services: Services, me: UserId, display: DisplayConfig) -> Self {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        MessagingScreen {
            services,
            me,
            formatter: TimeFormatter::new(display.offset_minutes),
            toast_seconds: display.toast_seconds,
            sidebar: Sidebar::new(),
            thread: None,
            active_chat: None,
            inbox: None,
            input: String::new(),
            toast: None,
            alert: None,
            feed_tx,
            feed_rx,
            task_tx,
            task_rx,
            thread_generation: 0,
            sidebar_generation: 0,
            receipts: Vec::new(),
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn sidebar(&self) -> &Sidebar {
        &self.sidebar
    }

    pub fn thread(&self) -> Option<&ThreadView> {
        self.thread.as_ref()
    }

    /// Partner of the chat currently shown, if any.
    pub fn open_partner(&self) -> Option<&str> {
        self.thread.as_ref().map(|t| t.partner_id.as_str())
    }

    pub fn inbox_subscription(&self) -> Option<SubscriptionHandle> {
        self.inbox
    }

    pub fn chat_subscription(&self) -> Option<(&str, SubscriptionHandle)> {
        self.active_chat.as_ref().map(|c| (c.partner_id.as_str(), c.handle))
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: &str) {
        self.input = text.to_string();
    }

    pub fn toast(&self) -> Option<&Toast> {
        self.toast.as_ref()
    }

    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    pub fn formatter(&self) -> &TimeFormatter {
        &self.formatter
    }

    /// Rebuild the sidebar from the full message set and wait for the result.
    ///
    /// The open chat's partner is kept as a placeholder so a brand new
    /// conversation does not vanish on reload.
    pub async fn load_conversations(&mut self, target: Option<&ConversationTarget>) {
        let generation = self.next_sidebar_generation();
        self.sidebar.set_loading();
        let target = self.reload_target(target);
        let result = fetch_conversations(self.services.clone(), self.me.clone(), target).await;
        self.apply_conversations(generation, result);
    }

    /// Rebuild the sidebar in the background. The current list stays on screen
    /// until the `ConversationsLoaded` event replaces it.
    pub fn reload_conversations(&mut self) {
        let generation = self.next_sidebar_generation();
        if self.sidebar.conversations.is_empty() {
            self.sidebar.set_loading();
        }
        let target = self.reload_target(None);
        let services = self.services.clone();
        let me = self.me.clone();
        let results = self.task_tx.clone();
        tokio::spawn(async move {
            let result = fetch_conversations(services, me, target).await;
            if results.send(ScreenEvent::ConversationsLoaded { generation, result }).is_err() {
                debug!("Screen closed before the conversation list loaded");
            }
        });
    }

    fn next_sidebar_generation(&mut self) -> u64 {
        self.sidebar_generation += 1;
        self.sidebar_generation
    }

    fn reload_target(&self, explicit: Option<&ConversationTarget>) -> Option<ConversationTarget> {
        explicit.cloned().or_else(|| {
            self.thread
                .as_ref()
                .map(|t| ConversationTarget::new(&t.partner_id, Some(&t.partner_name)))
        })
    }

    fn apply_conversations(&mut self, generation: u64, result: StoreResult<Vec<Conversation>>) {
        if generation != self.sidebar_generation {
            debug!("Dropping superseded conversation load {}", generation);
            return;
        }
        let conversations = match result {
            Ok(conversations) => conversations,
            Err(e) => {
                error!("Error loading messages: {}", e);
                self.sidebar.set_error(view::CONVERSATIONS_ERROR);
                return;
            }
        };
        self.sidebar.set_conversations(conversations);

        if let Some(active) = self.sidebar.active.clone() {
            self.sidebar.set_active(&active);
        }
        // A toast raised before the sender had an entry carries the fallback name.
        if let Some(toast) = self.toast.as_mut() {
            if let Some(entry) = self.sidebar.get(&toast.sender_id) {
                toast.sender_name = entry.partner_name.clone();
            }
        }
    }

    async fn subscribe_inbox(&mut self) {
        match self
            .services
            .feed
            .subscribe(FeedFilter::recipient(&self.me), self.feed_tx.clone())
            .await
        {
            Ok(handle) => {
                info!("Inbox subscription {} established", handle);
                self.inbox = Some(handle);
            }
            Err(e) => error!("Inbox subscription failed, sidebar will not update live: {}", e),
        }
    }

    /// Wait for the next feed event, load result or send completion.
    pub async fn next_event(&mut self) -> Option<ScreenEvent> {
        tokio::select! {
            Some(event) = self.feed_rx.recv() => Some(ScreenEvent::Feed(event)),
            Some(event) = self.task_rx.recv() => Some(event),
            else => None,
        }
    }

    /// Non-blocking variant of `next_event` for the UI poll loop.
    pub fn try_next_event(&mut self) -> Option<ScreenEvent> {
        if let Ok(event) = self.feed_rx.try_recv() {
            return Some(ScreenEvent::Feed(event));
        }
        self.task_rx.try_recv().ok()
    }

    /// Apply one event. Never waits on the network.
    pub fn dispatch(&mut self, event: ScreenEvent) {
        match event {
            ScreenEvent::Feed(event) => self.handle_feed_event(event),
            ScreenEvent::SendFinished(pending, result) => self.finish_send(pending, result),
            ScreenEvent::ThreadLoaded { partner_id, generation, result } => {
                self.apply_thread(&partner_id, generation, result)
            }
            ScreenEvent::ConversationsLoaded { generation, result } => self.apply_conversations(generation, result),
        }
    }

    fn handle_feed_event(&mut self, event: FeedEvent) {
        if self.inbox == Some(event.handle) {
            self.on_inbox_insert(event.record);
        } else if self.active_chat.as_ref().map(|c| c.handle) == Some(event.handle) {
            self.on_chat_insert(event.record);
        } else {
            debug!("Ignoring message {} from stale subscription {}", event.record.id, event.handle);
        }
    }

    /// Expire the toast once it has been visible long enough.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if self.toast.as_ref().is_some_and(|t| t.is_expired(now, self.toast_seconds)) {
            debug!("Auto-dismissing message toast");
            self.toast = None;
        }
    }

    pub fn dismiss_toast(&mut self) {
        self.toast = None;
    }

    /// Open the conversation the toast is about.
    pub async fn activate_toast(&mut self) {
        if let Some(toast) = self.toast.take() {
            self.open_chat(&toast.sender_id, Some(&toast.sender_name)).await;
        }
    }

    fn partner_display_name(&self, partner_id: &str, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| self.sidebar.get(partner_id).map(|c| c.partner_name.clone()))
            .unwrap_or_else(|| FALLBACK_PARTNER_NAME.to_string())
    }

    /// Mark messages read in the background. Failures are only logged.
    fn spawn_read_receipt(&mut self, filter: MessageFilter) {
        let store = Arc::clone(&self.services.messages);
        let task = tokio::spawn(async move {
            match store.update(&filter, MessagePatch::mark_read()).await {
                Ok(count) => debug!("Marked {} message(s) read", count),
                Err(e) => warn!("Failed to mark messages read: {}", e),
            }
        });
        self.receipts.retain(|t| !t.is_finished());
        self.receipts.push(task);
    }

    /// Wait for outstanding read-receipt writes.
    pub async fn flush_receipts(&mut self) {
        for task in self.receipts.drain(..) {
            if let Err(e) = task.await {
                warn!("Read receipt task failed: {}", e);
            }
        }
    }

    /// Release both subscriptions.
    pub async fn shutdown(&mut self) {
        if let Some(chat) = self.active_chat.take() {
            if let Err(e) = self.services.feed.unsubscribe(chat.handle).await {
                warn!("Failed to release chat subscription {}: {}", chat.handle, e);
            }
        }
        if let Some(handle) = self.inbox.take() {
            if let Err(e) = self.services.feed.unsubscribe(handle).await {
                warn!("Failed to release inbox subscription {}: {}", handle, e);
            }
        }
        self.flush_receipts().await;
    }
}

/// Read every message involving `me`, resolve partner names and fold them into
/// sidebar entries. A failed profile lookup only costs the names.
async fn fetch_conversations(
    services: Services,
    me: UserId,
    target: Option<ConversationTarget>,
) -> StoreResult<Vec<Conversation>> {
    let messages = services
        .messages
        .read_many(&MessageFilter::Participant(me.clone()), Order::CreatedAtDescending)
        .await?;

    let mut ids = partner_ids(&me, &messages);
    if let Some(target) = &target {
        if !ids.contains(&target.partner_id) {
            ids.push(target.partner_id.clone());
        }
    }
    let profiles = match services.profiles.profiles(&ids).await {
        Ok(profiles) => profiles,
        Err(e) => {
            warn!("Could not load partner profiles, using fallback names: {}", e);
            HashMap::new()
        }
    };

    let conversations = build_conversations(&me, &messages, &profiles, target.as_ref(), Utc::now());
    debug!("Built {} conversations from {} messages", conversations.len(), messages.len());
    Ok(conversations)
}
