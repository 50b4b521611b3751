// Inbox subscription handler: every insert addressed to me, for the lifetime of the screen.

use chrono::Utc;
use log::debug;

use super::view::Toast;
use super::{MessagingScreen, FALLBACK_PARTNER_NAME};
use crate::models::Message;

impl MessagingScreen {
    /// Apply an inbox insert to the sidebar.
    ///
    /// Messages from the open chat's partner only refresh the preview; the
    /// chat subscription renders their bubble. Anything else is marked unread
    /// and announced with a toast.
    pub(super) fn on_inbox_insert(&mut self, record: Message) {
        if record.recipient_id != self.me {
            debug!("Inbox feed delivered message {} not addressed to me", record.id);
            return;
        }

        let sender = record.sender_id.clone();
        let chat_is_open = self.open_partner() == Some(sender.as_str());

        let known = self
            .sidebar
            .update_preview(&sender, &record.body, record.created_at, !chat_is_open);
        if !known {
            // First message from someone new: the sidebar needs their name and entry.
            // The toast below is renamed once the reload lands.
            self.reload_conversations();
        }

        if !chat_is_open {
            let sender_name = self
                .sidebar
                .get(&sender)
                .map(|c| c.partner_name.clone())
                .unwrap_or_else(|| FALLBACK_PARTNER_NAME.to_string());
            self.toast = Some(Toast::new(&sender, &sender_name, &record.body, Utc::now()));
        }
    }
}
