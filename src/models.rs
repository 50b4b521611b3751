use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::timestamps;

pub type UserId = String;
pub type MessageId = String;

/// A persisted direct message between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub body: String,
    #[serde(
        deserialize_with = "timestamps::deserialize_store_timestamp",
        serialize_with = "timestamps::serialize_store_timestamp"
    )]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// The other participant from `me`'s point of view.
    ///
    /// Returns `None` when `me` is neither sender nor recipient.
    pub fn partner_of(&self, me: &str) -> Option<&str> {
        if self.sender_id == me {
            Some(&self.recipient_id)
        } else if self.recipient_id == me {
            Some(&self.sender_id)
        } else {
            None
        }
    }

    /// True when the message travels between `a` and `b` in either direction.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }

    pub fn is_unread_for(&self, me: &str) -> bool {
        self.recipient_id == me && !self.is_read
    }
}

/// Insert payload for the message store. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub body: String,
    pub is_read: bool,
}

impl NewMessage {
    pub fn new(sender_id: &str, recipient_id: &str, body: &str) -> Self {
        NewMessage {
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            body: body.to_string(),
            is_read: false,
        }
    }
}

/// Row of the `users` table, used only for display names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Profile {
    pub fn display_name(&self) -> String {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.email.as_deref().filter(|e| !e.trim().is_empty()))
            .unwrap_or(UNKNOWN_USER)
            .to_string()
    }
}

pub const UNKNOWN_USER: &str = "Unknown User";
pub const NEW_CONTACT: &str = "New Contact";
pub const START_A_CONVERSATION: &str = "Start a conversation";

/// Sidebar entry derived from the message set. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub partner_id: UserId,
    pub partner_name: String,
    pub last_message: String,
    pub last_activity: DateTime<Utc>,
    pub unread_count: usize,
    /// Placeholder synthesized for a "message this user" navigation.
    pub is_new: bool,
}

impl Conversation {
    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}

/// Incoming navigation request to open a chat with someone.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTarget {
    pub partner_id: UserId,
    pub partner_name: Option<String>,
}

impl ConversationTarget {
    pub fn new(partner_id: &str, partner_name: Option<&str>) -> Self {
        ConversationTarget {
            partner_id: partner_id.to_string(),
            partner_name: partner_name.map(|n| n.to_string()),
        }
    }

    /// Builds a target from optional navigation parameters.
    ///
    /// A name without a recipient id is meaningless and is dropped.
    pub fn from_params(recipient_id: Option<&str>, name: Option<&str>) -> Option<Self> {
        match recipient_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Some(ConversationTarget::new(id, name)),
            None => {
                if let Some(name) = name {
                    log::warn!("Ignoring navigation name '{}' without a recipient id", name);
                }
                None
            }
        }
    }
}

// Ids come back as JSON numbers from integer primary keys and as strings from uuid keys.
fn deserialize_id<'de, D>(deserializer: D) -> Result<MessageId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Int(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}
