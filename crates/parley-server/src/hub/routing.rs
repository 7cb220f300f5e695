//! Per-kind handling of inbound chat events.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, instrument, warn};

use parley_core::events::{ChatEvent, EventKind};
use parley_core::ids::{ConversationId, UserId};
use parley_store::NewMessage;

use super::{Hub, HubError};
use crate::metrics::HUB_MESSAGES_PERSISTED_TOTAL;

impl Hub {
    pub(super) async fn route(&mut self, event: ChatEvent) -> Result<(), HubError> {
        match event.kind {
            EventKind::MessageSend => self.route_message(event).await,
            EventKind::Presence => {
                debug!(sender_id = %event.sender_id, content = %event.content, "client presence ignored");
                Ok(())
            }
            other => {
                debug!(sender_id = %event.sender_id, kind = %other, "dropping unroutable event");
                Ok(())
            }
        }
    }

    async fn route_message(&mut self, event: ChatEvent) -> Result<(), HubError> {
        self.validate_content(&event.content)?;
        match (event.receiver_id, event.conversation_id) {
            (Some(receiver), _) => self.send_private(event.sender_id, receiver, event.content).await,
            (None, Some(conversation)) => {
                self.send_group(event.sender_id, conversation, event.content).await
            }
            (None, None) => Err(HubError::MissingRecipient),
        }
    }

    fn validate_content(&self, content: &str) -> Result<(), HubError> {
        if content.trim().is_empty() {
            return Err(HubError::EmptyContent);
        }
        let len = content.chars().count();
        if len > self.config.max_content_len {
            return Err(HubError::ContentTooLong {
                len,
                max: self.config.max_content_len,
            });
        }
        Ok(())
    }

    /// Persist then fan out to the sender and the receiver. Nothing is
    /// delivered unless the message row was written.
    #[instrument(skip_all, fields(sender_id = %sender, receiver_id = %receiver))]
    async fn send_private(
        &mut self,
        sender: UserId,
        receiver: UserId,
        content: String,
    ) -> Result<(), HubError> {
        let conversation_id = self
            .store
            .find_or_create_private_conversation(sender, receiver)
            .await?;
        let payload = self
            .persist(conversation_id, sender, Some(receiver), content)
            .await?;

        let _ = self.deliver(sender, &payload);
        if receiver != sender {
            let _ = self.deliver(receiver, &payload);
        }
        Ok(())
    }

    /// Persist then fan out to every online member of the conversation.
    #[instrument(skip_all, fields(sender_id = %sender, conversation_id = %conversation_id))]
    async fn send_group(
        &mut self,
        sender: UserId,
        conversation_id: ConversationId,
        content: String,
    ) -> Result<(), HubError> {
        let members = self.store.conversation_members(conversation_id).await?;
        if !members.contains(&sender) {
            return Err(HubError::NotMember {
                user_id: sender,
                conversation_id,
            });
        }
        let payload = self.persist(conversation_id, sender, None, content).await?;

        let mut delivered = 0usize;
        for member in members {
            if self.deliver(member, &payload) {
                delivered += 1;
            }
        }
        debug!(delivered, "group message fanned out");
        Ok(())
    }

    /// Store the message, bump the conversation and encode the
    /// `message_received` event once for every recipient.
    async fn persist(
        &mut self,
        conversation_id: ConversationId,
        sender: UserId,
        receiver: Option<UserId>,
        content: String,
    ) -> Result<Arc<String>, HubError> {
        let sent_at = Utc::now();
        let message_id = self
            .store
            .create_message(NewMessage {
                conversation_id,
                sender_id: sender,
                receiver_id: receiver,
                content: content.clone(),
                sent_at,
            })
            .await?;
        counter!(HUB_MESSAGES_PERSISTED_TOTAL).increment(1);

        if let Err(e) = self.store.touch_conversation(conversation_id).await {
            warn!(conversation_id = %conversation_id, error = %e, "failed to touch conversation");
        }

        let event = ChatEvent::message_received(
            sender,
            receiver,
            conversation_id,
            message_id,
            content,
            sent_at,
        );
        Ok(Arc::new(event.to_json()?))
    }
}
