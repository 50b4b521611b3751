// Render cache for the messaging screen: what the TUI draws.

use chrono::{DateTime, Duration, Utc};

use crate::conversations::sort_conversations;
use crate::models::{Conversation, MessageId, UserId};

pub const LOADING_CONVERSATIONS: &str = "Loading conversations...";
pub const NO_CONVERSATIONS: &str = "No conversations yet.";
pub const CONVERSATIONS_ERROR: &str = "Error loading chats.";
pub const LOADING_MESSAGES: &str = "Loading...";
pub const NO_MESSAGES: &str = "No messages yet. Say hello!";
pub const MESSAGES_ERROR: &str = "Error loading messages";
pub const SEND_FAILED: &str = "Failed to send message.";

const TOAST_EXCERPT_CHARS: usize = 40;

/// State of a panel that is filled by a network load.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelState {
    Loading,
    Empty,
    Ready,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct Sidebar {
    pub state: PanelState,
    pub conversations: Vec<Conversation>,
    pub active: Option<UserId>,
}

impl Sidebar {
    pub fn new() -> Self {
        Sidebar {
            state: PanelState::Loading,
            conversations: Vec::new(),
            active: None,
        }
    }

    pub fn set_loading(&mut self) {
        self.state = PanelState::Loading;
    }

    pub fn set_error(&mut self, message: &str) {
        self.state = PanelState::Error(message.to_string());
        self.conversations.clear();
    }

    pub fn set_conversations(&mut self, conversations: Vec<Conversation>) {
        self.state = if conversations.is_empty() { PanelState::Empty } else { PanelState::Ready };
        self.conversations = conversations;
    }

    pub fn get(&self, partner_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.partner_id == partner_id)
    }

    pub fn position(&self, partner_id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.partner_id == partner_id)
    }

    /// Refresh a partner's preview. Returns false if the partner has no entry.
    pub fn update_preview(&mut self, partner_id: &str, body: &str, at: DateTime<Utc>, mark_unread: bool) -> bool {
        let Some(entry) = self.conversations.iter_mut().find(|c| c.partner_id == partner_id) else {
            return false;
        };
        entry.last_message = body.to_string();
        if at > entry.last_activity {
            entry.last_activity = at;
        }
        entry.is_new = false;
        if mark_unread {
            entry.unread_count += 1;
        }
        sort_conversations(&mut self.conversations);
        true
    }

    pub fn set_active(&mut self, partner_id: &str) {
        self.active = Some(partner_id.to_string());
        if let Some(entry) = self.conversations.iter_mut().find(|c| c.partner_id == partner_id) {
            entry.unread_count = 0;
        }
    }
}

impl Default for Sidebar {
    fn default() -> Self {
        Sidebar::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BubbleKey {
    /// Locally generated id of an unconfirmed send.
    Pending(String),
    Stored(MessageId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bubble {
    pub key: BubbleKey,
    pub body: String,
    pub outgoing: bool,
    pub time_label: String,
    pub sending: bool,
}

/// The open chat's message list.
#[derive(Debug, Clone)]
pub struct ThreadView {
    pub partner_id: UserId,
    pub partner_name: String,
    pub state: PanelState,
    pub bubbles: Vec<Bubble>,
}

impl ThreadView {
    pub fn loading(partner_id: &str, partner_name: &str) -> Self {
        ThreadView {
            partner_id: partner_id.to_string(),
            partner_name: partner_name.to_string(),
            state: PanelState::Loading,
            bubbles: Vec::new(),
        }
    }

    pub fn contains_message(&self, id: &str) -> bool {
        self.bubbles.iter().any(|b| matches!(&b.key, BubbleKey::Stored(stored) if stored == id))
    }

    /// Append a bubble, replacing any empty/loading placeholder.
    pub fn append(&mut self, bubble: Bubble) {
        self.state = PanelState::Ready;
        self.bubbles.push(bubble);
    }

    /// Turn a pending bubble into a stored one. Returns false if it is gone.
    pub fn confirm(&mut self, temp_id: &str, message_id: &str, time_label: &str) -> bool {
        let Some(bubble) = self
            .bubbles
            .iter_mut()
            .find(|b| matches!(&b.key, BubbleKey::Pending(t) if t == temp_id))
        else {
            return false;
        };
        bubble.key = BubbleKey::Stored(message_id.to_string());
        bubble.sending = false;
        bubble.time_label = time_label.to_string();
        true
    }

    /// Drop a pending bubble after a failed send.
    pub fn discard(&mut self, temp_id: &str) -> bool {
        let before = self.bubbles.len();
        self.bubbles.retain(|b| !matches!(&b.key, BubbleKey::Pending(t) if t == temp_id));
        if self.bubbles.is_empty() && self.state == PanelState::Ready {
            self.state = PanelState::Empty;
        }
        self.bubbles.len() != before
    }
}

/// Transient "new message" notification for a conversation that is not open.
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub sender_id: UserId,
    pub sender_name: String,
    pub excerpt: String,
    pub shown_at: DateTime<Utc>,
}

impl Toast {
    pub fn new(sender_id: &str, sender_name: &str, body: &str, shown_at: DateTime<Utc>) -> Self {
        Toast {
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            excerpt: excerpt(body, TOAST_EXCERPT_CHARS),
            shown_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl_seconds: u64) -> bool {
        now - self.shown_at >= Duration::seconds(ttl_seconds as i64)
    }
}

fn excerpt(body: &str, max_chars: usize) -> String {
    let single_line = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let cut: String = single_line.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn conversation(id: &str, secs: i64) -> Conversation {
        Conversation {
            partner_id: id.to_string(),
            partner_name: id.to_uppercase(),
            last_message: String::new(),
            last_activity: Utc.timestamp_opt(secs, 0).unwrap(),
            unread_count: 0,
            is_new: false,
        }
    }

    #[test]
    fn preview_update_resorts_and_marks_unread() {
        let mut sidebar = Sidebar::new();
        sidebar.set_conversations(vec![conversation("a", 20), conversation("b", 10)]);

        assert!(sidebar.update_preview("b", "fresh", Utc.timestamp_opt(30, 0).unwrap(), true));
        assert_eq!(sidebar.conversations[0].partner_id, "b");
        assert_eq!(sidebar.conversations[0].last_message, "fresh");
        assert!(sidebar.conversations[0].has_unread());

        assert!(!sidebar.update_preview("zzz", "x", Utc::now(), false));
    }

    #[test]
    fn activating_clears_unread() {
        let mut sidebar = Sidebar::new();
        let mut unread = conversation("a", 1);
        unread.unread_count = 3;
        sidebar.set_conversations(vec![unread]);
        sidebar.set_active("a");
        assert_eq!(sidebar.get("a").unwrap().unread_count, 0);
        assert_eq!(sidebar.active.as_deref(), Some("a"));
    }

    #[test]
    fn pending_bubble_lifecycle() {
        let mut thread = ThreadView::loading("p", "P");
        thread.state = PanelState::Empty;
        thread.append(Bubble {
            key: BubbleKey::Pending("temp-1".into()),
            body: "hi".into(),
            outgoing: true,
            time_label: "10:00 AM".into(),
            sending: true,
        });
        assert_eq!(thread.state, PanelState::Ready);
        assert!(thread.confirm("temp-1", "42", "10:01 AM"));
        assert!(thread.contains_message("42"));
        assert!(!thread.bubbles[0].sending);
        assert!(!thread.discard("temp-1"));
    }

    #[test]
    fn toast_expiry_and_excerpt() {
        let shown = Utc.timestamp_opt(100, 0).unwrap();
        let toast = Toast::new("p", "P", &"word ".repeat(30), shown);
        assert!(toast.excerpt.ends_with('…'));
        assert!(toast.excerpt.chars().count() <= TOAST_EXCERPT_CHARS);
        assert!(!toast.is_expired(shown + Duration::seconds(3), 4));
        assert!(toast.is_expired(shown + Duration::seconds(4), 4));
    }
}
