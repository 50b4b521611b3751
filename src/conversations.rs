// Conversation List Builder: folds the flat message set into one sidebar entry per partner.

use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;

use crate::models::{
    Conversation, ConversationTarget, Message, Profile, UserId, NEW_CONTACT, START_A_CONVERSATION,
    UNKNOWN_USER,
};

/// Build the ordered conversation list for `me`.
///
/// `messages` may arrive in any order. Each partner's entry previews their most
/// recent message, and counts every unread message addressed to `me`. When
/// `target` names a partner with no history, a placeholder entry stamped `now`
/// is added. The result is sorted newest first, ties broken by partner id.
pub fn build_conversations(
    me: &str,
    messages: &[Message],
    profiles: &HashMap<UserId, Profile>,
    target: Option<&ConversationTarget>,
    now: DateTime<Utc>,
) -> Vec<Conversation> {
    let mut by_partner: HashMap<&str, Conversation> = HashMap::new();

    for message in messages {
        let Some(partner) = message.partner_of(me) else {
            debug!("Skipping message {} that does not involve {}", message.id, me);
            continue;
        };

        let entry = by_partner.entry(partner).or_insert_with(|| Conversation {
            partner_id: partner.to_string(),
            partner_name: partner_name(profiles, partner),
            last_message: message.body.clone(),
            last_activity: message.created_at,
            unread_count: 0,
            is_new: false,
        });

        if message.created_at > entry.last_activity {
            entry.last_message = message.body.clone();
            entry.last_activity = message.created_at;
        }
        if message.is_unread_for(me) {
            entry.unread_count += 1;
        }
    }

    let mut conversations: Vec<Conversation> = by_partner.into_values().collect();

    if let Some(target) = target {
        if !conversations.iter().any(|c| c.partner_id == target.partner_id) {
            let name = target
                .partner_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .or_else(|| profiles.get(&target.partner_id).map(Profile::display_name))
                .unwrap_or_else(|| NEW_CONTACT.to_string());
            conversations.push(Conversation {
                partner_id: target.partner_id.clone(),
                partner_name: name,
                last_message: START_A_CONVERSATION.to_string(),
                last_activity: now,
                unread_count: 0,
                is_new: true,
            });
        }
    }

    sort_conversations(&mut conversations);
    conversations
}

/// Newest activity first; equal timestamps fall back to partner id.
pub fn sort_conversations(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.partner_id.cmp(&b.partner_id))
    });
}

/// Ids of everyone `me` has exchanged messages with.
pub fn partner_ids(me: &str, messages: &[Message]) -> Vec<UserId> {
    let mut ids: Vec<UserId> = messages
        .iter()
        .filter_map(|m| m.partner_of(me).map(str::to_string))
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

fn partner_name(profiles: &HashMap<UserId, Profile>, partner: &str) -> String {
    profiles
        .get(partner)
        .map(Profile::display_name)
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_557_600 + secs, 0).unwrap()
    }

    fn msg(id: &str, from: &str, to: &str, body: &str, t: i64, is_read: bool) -> Message {
        Message {
            id: id.to_string(),
            sender_id: from.to_string(),
            recipient_id: to.to_string(),
            body: body.to_string(),
            created_at: at(t),
            is_read,
        }
    }

    #[test]
    fn latest_message_wins_regardless_of_input_order() {
        let messages = vec![
            msg("2", "p", "me", "B", 2, true),
            msg("1", "me", "p", "A", 1, true),
        ];
        let list = build_conversations("me", &messages, &HashMap::new(), None, at(10));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].last_message, "B");
        assert_eq!(list[0].last_activity, at(2));

        let reversed: Vec<Message> = messages.into_iter().rev().collect();
        let list = build_conversations("me", &reversed, &HashMap::new(), None, at(10));
        assert_eq!(list[0].last_message, "B");
    }

    #[test]
    fn unread_counts_only_incoming_unread() {
        let messages = vec![
            msg("1", "p", "me", "old unread", 1, false),
            msg("2", "me", "p", "my reply", 2, false),
            msg("3", "q", "me", "seen", 3, true),
        ];
        let list = build_conversations("me", &messages, &HashMap::new(), None, at(10));
        let p = list.iter().find(|c| c.partner_id == "p").unwrap();
        let q = list.iter().find(|c| c.partner_id == "q").unwrap();
        assert!(p.has_unread());
        assert_eq!(p.unread_count, 1);
        assert!(!q.has_unread());
    }

    #[test]
    fn ordered_newest_first() {
        let messages = vec![
            msg("1", "a", "me", "a", 5, true),
            msg("2", "b", "me", "b", 9, true),
            msg("3", "c", "me", "c", 1, true),
        ];
        let list = build_conversations("me", &messages, &HashMap::new(), None, at(10));
        let order: Vec<&str> = list.iter().map(|c| c.partner_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn target_without_history_gets_placeholder() {
        let messages = vec![msg("1", "a", "me", "hey", 1, true)];
        let target = ConversationTarget::new("org-7", Some("Food Bank"));
        let list = build_conversations("me", &messages, &HashMap::new(), Some(&target), at(10));

        assert_eq!(list.len(), 2);
        assert_eq!(list[0].partner_id, "org-7");
        assert_eq!(list[0].partner_name, "Food Bank");
        assert_eq!(list[0].last_message, START_A_CONVERSATION);
        assert_eq!(list[0].unread_count, 0);
        assert!(list[0].is_new);
    }

    #[test]
    fn target_with_history_is_not_duplicated() {
        let messages = vec![msg("1", "a", "me", "hey", 1, true)];
        let target = ConversationTarget::new("a", None);
        let list = build_conversations("me", &messages, &HashMap::new(), Some(&target), at(10));
        assert_eq!(list.len(), 1);
        assert!(!list[0].is_new);
    }

    #[test]
    fn names_come_from_profiles() {
        let mut profiles = HashMap::new();
        profiles.insert(
            "a".to_string(),
            Profile { id: "a".into(), full_name: None, email: Some("a@example.org".into()) },
        );
        let messages = vec![msg("1", "a", "me", "hey", 1, true), msg("2", "b", "me", "yo", 2, true)];
        let list = build_conversations("me", &messages, &profiles, None, at(10));
        let a = list.iter().find(|c| c.partner_id == "a").unwrap();
        let b = list.iter().find(|c| c.partner_id == "b").unwrap();
        assert_eq!(a.partner_name, "a@example.org");
        assert_eq!(b.partner_name, UNKNOWN_USER);
    }

    #[test]
    fn foreign_messages_are_ignored() {
        let messages = vec![msg("1", "x", "y", "not mine", 1, false)];
        assert!(build_conversations("me", &messages, &HashMap::new(), None, at(10)).is_empty());
        assert!(partner_ids("me", &messages).is_empty());
    }
}
