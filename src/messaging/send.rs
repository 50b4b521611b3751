// Send pipeline with optimistic local state.

use chrono::{DateTime, Utc};
use log::{error, info};
use std::sync::Arc;
use uuid::Uuid;

use super::view::{self, Bubble, BubbleKey};
use super::{MessagingScreen, ScreenEvent};
use crate::models::{Message, NewMessage, UserId};
use crate::store::StoreResult;

/// A send in flight. Everything needed to reconcile it is captured here, so a
/// completion arriving after the user switched chats only touches this partner.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub temp_id: String,
    pub partner_id: UserId,
    pub body: String,
    /// Input exactly as typed, restored if the send fails.
    pub original_input: String,
    pub queued_at: DateTime<Utc>,
}

impl MessagingScreen {
    /// Render the optimistic bubble and clear the input.
    ///
    /// Returns `None` (and changes nothing) when no chat is open or the input is blank.
    pub fn begin_send(&mut self) -> Option<PendingSend> {
        let partner_id = self.open_partner()?.to_string();
        let body = self.input.trim().to_string();
        if body.is_empty() {
            return None;
        }

        let queued_at = Utc::now();
        let temp_id = format!("temp-{}", Uuid::new_v4());
        let bubble = Bubble {
            key: BubbleKey::Pending(temp_id.clone()),
            body: body.clone(),
            outgoing: true,
            time_label: self.formatter.format_time(&queued_at),
            sending: true,
        };
        if let Some(thread) = self.thread.as_mut() {
            thread.append(bubble);
        }
        let original_input = std::mem::take(&mut self.input);

        Some(PendingSend { temp_id, partner_id, body, original_input, queued_at })
    }

    /// Issue the create in the background; the outcome comes back through `next_event`.
    pub fn spawn_send(&self, pending: PendingSend) {
        let store = Arc::clone(&self.services.messages);
        let results = self.task_tx.clone();
        let new_message = NewMessage::new(&self.me, &pending.partner_id, &pending.body);
        tokio::spawn(async move {
            let result = store.create(new_message).await;
            if results.send(ScreenEvent::SendFinished(pending, result)).is_err() {
                error!("Screen closed before a send completed");
            }
        });
    }

    /// `begin_send` + `spawn_send`. Returns whether anything was sent.
    pub fn submit(&mut self) -> bool {
        match self.begin_send() {
            Some(pending) => {
                self.spawn_send(pending);
                true
            }
            None => false,
        }
    }

    /// Reconcile a finished send with the view.
    pub fn finish_send(&mut self, pending: PendingSend, result: StoreResult<Message>) {
        let still_open = self.open_partner() == Some(pending.partner_id.as_str());

        match result {
            Ok(message) => {
                info!("Message {} delivered to {}", message.id, pending.partner_id);
                if still_open {
                    let bubble = self.bubble_for(&message);
                    if let Some(thread) = self.thread.as_mut() {
                        if thread.contains_message(&message.id) {
                            // A history load already rendered the stored row.
                            thread.discard(&pending.temp_id);
                        } else if !thread.confirm(&pending.temp_id, &message.id, &bubble.time_label) {
                            // The chat was reopened while the send was in flight.
                            thread.append(bubble);
                        }
                    }
                }
                let known = self
                    .sidebar
                    .update_preview(&pending.partner_id, &pending.body, message.created_at, false);
                if !known {
                    self.reload_conversations();
                }
            }
            Err(e) => {
                error!("Send error: {}", e);
                if still_open {
                    if let Some(thread) = self.thread.as_mut() {
                        thread.discard(&pending.temp_id);
                    }
                    self.input = pending.original_input;
                }
                self.alert = Some(view::SEND_FAILED.to_string());
            }
        }
    }
}
