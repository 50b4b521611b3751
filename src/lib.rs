// Re-export needed modules for testing
pub mod config;
pub mod conversations;
pub mod messaging;
pub mod models;
pub mod store;
pub mod timestamps;

// Re-export main types for convenience
pub use messaging::{Launch, MessagingScreen, ScreenEvent};
pub use models::*;
pub use store::Services;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: &str, sender: &str, recipient: &str) -> Message {
        Message {
            id: id.to_string(),
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            body: "Hello, world!".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            is_read: false,
        }
    }

    #[test]
    fn test_partner_resolution() {
        let msg = message("msg123", "volunteer", "org");

        assert_eq!(msg.partner_of("volunteer"), Some("org"));
        assert_eq!(msg.partner_of("org"), Some("volunteer"));
        assert_eq!(msg.partner_of("someone-else"), None);
        assert!(msg.is_between("org", "volunteer"));
        assert!(!msg.is_between("org", "admin"));
    }

    #[test]
    fn test_unread_only_counts_for_recipient() {
        let mut msg = message("msg123", "volunteer", "org");

        assert!(msg.is_unread_for("org"));
        assert!(!msg.is_unread_for("volunteer"));

        msg.is_read = true;
        assert!(!msg.is_unread_for("org"));
    }

    #[test]
    fn test_profile_display_name_fallbacks() {
        let full = Profile {
            id: "u1".to_string(),
            full_name: Some("River Food Bank".to_string()),
            email: Some("hello@river.org".to_string()),
        };
        let email_only = Profile { id: "u2".to_string(), full_name: Some("  ".to_string()), email: Some("x@y.org".to_string()) };
        let anonymous = Profile { id: "u3".to_string(), full_name: None, email: None };

        assert_eq!(full.display_name(), "River Food Bank");
        assert_eq!(email_only.display_name(), "x@y.org");
        assert_eq!(anonymous.display_name(), UNKNOWN_USER);
    }

    #[test]
    fn test_navigation_target_requires_recipient() {
        assert_eq!(
            ConversationTarget::from_params(Some("org-1"), Some("Shelter")),
            Some(ConversationTarget::new("org-1", Some("Shelter")))
        );
        assert_eq!(ConversationTarget::from_params(None, Some("Shelter")), None);
        assert_eq!(ConversationTarget::from_params(Some("  "), None), None);
    }

    #[test]
    fn test_message_wire_format() {
        let json = r#"{"id": "b0c1", "sender_id": "a", "recipient_id": "b", "body": "hi",
                       "created_at": "2024-05-01T10:00:00", "is_read": true}"#;
        let msg: Message = serde_json::from_str(json).unwrap();

        assert_eq!(msg.id, "b0c1");
        assert_eq!(msg.created_at, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert!(msg.is_read);

        let insert = serde_json::to_value(NewMessage::new("a", "b", "hi")).unwrap();
        assert_eq!(insert["is_read"], false);
        assert!(insert.get("id").is_none());
    }
}
