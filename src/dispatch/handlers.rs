//! Production event handlers.

use super::{EventHandler, HandlerOutcome};
use crate::device::{phone_from_jid, DeviceStatus, DeviceStore};
use crate::event::{AckLevel, WebhookEvent};
use crate::ledger::{
    ApplyOutcome, CreateOutcome, DeliveryLedger, DeliveryStatus, OutgoingMessage,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stores the handlers read and write.
pub struct HandlerDeps {
    pub devices: Arc<dyn DeviceStore>,
    pub ledger: Arc<DeliveryLedger>,
}

/// Default for kinds without a registered handler.
pub struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome> {
        debug!(event = %event.kind(), session = %event.session(), "No handler registered");
        Ok(HandlerOutcome::Ignored)
    }
}

/// Logs events that never touch the ledger or quota.
pub struct ObservabilityHandler;

#[async_trait]
impl EventHandler for ObservabilityHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome> {
        let session = event.session();
        match event {
            WebhookEvent::Reaction { reaction, .. } => debug!(
                session = %session,
                message_id = %reaction.reaction.message_id.as_str(),
                reaction = reaction.reaction.text.as_deref().unwrap_or(""),
                "Reaction received"
            ),
            WebhookEvent::Call { kind, call, .. } => info!(
                event = %kind,
                session = %session,
                call_id = %call.id,
                from = %call.from,
                video = call.is_video,
                "Call event"
            ),
            WebhookEvent::Presence { presence, .. } => debug!(
                session = %session,
                chat = %presence.id,
                entries = presence.presences.len(),
                "Presence update"
            ),
            WebhookEvent::Label { kind, label, .. } => debug!(
                event = %kind,
                session = %session,
                label = ?label.id.as_ref().or(label.label_id.as_ref()),
                chat = ?label.chat_id,
                "Label event"
            ),
            other => debug!(event = %other.kind(), session = %session, "Event observed"),
        }
        Ok(HandlerOutcome::Ignored)
    }
}

/// `message` / `message.any`: records outgoing campaign messages.
pub struct MessageHandler {
    deps: Arc<HandlerDeps>,
}

impl MessageHandler {
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl EventHandler for MessageHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome> {
        let WebhookEvent::Message {
            kind,
            session,
            message,
        } = event
        else {
            return Ok(HandlerOutcome::Ignored);
        };

        if !message.from_me {
            debug!(event = %kind, session = %session, "Incoming message observed");
            return Ok(HandlerOutcome::Ignored);
        }

        let Some(device) = self.deps.devices.find_by_session(session)? else {
            warn!(event = %kind, session = %session, "Message for unknown session");
            return Ok(HandlerOutcome::Ignored);
        };
        let Some(to) = message.to.as_deref() else {
            return Ok(HandlerOutcome::Ignored);
        };
        let recipient = phone_from_jid(to);

        let store = self.deps.ledger.store();
        let Some(campaign_id) = store.find_pending_campaign(&device.id, recipient)? else {
            debug!(
                session = %session,
                message_id = %message.id.as_str(),
                "Outgoing message does not belong to a campaign"
            );
            return Ok(HandlerOutcome::Ignored);
        };

        let status = match message.ack_level()? {
            Some(level) => level.status(),
            None => DeliveryStatus::Sent,
        };
        let sender_phone = device.phone_number.clone().or_else(|| {
            message
                .from
                .as_deref()
                .map(|from| phone_from_jid(from).to_string())
        });

        let outcome = store.create_if_absent(&OutgoingMessage {
            campaign_id: campaign_id.clone(),
            provider_message_id: message.id.as_str().to_string(),
            recipient: recipient.to_string(),
            device_id: device.id.clone(),
            sender_phone,
            status,
            at: message.sent_at().unwrap_or_else(Utc::now),
        })?;

        match outcome {
            CreateOutcome::Bound | CreateOutcome::Inserted => {
                info!(
                    campaign_id = %campaign_id,
                    device_id = %device.id,
                    message_id = %message.id.as_str(),
                    status = %status,
                    outcome = ?outcome,
                    "Campaign message recorded"
                );
                Ok(HandlerOutcome::Applied)
            }
            CreateOutcome::AlreadyPresent => {
                debug!(message_id = %message.id.as_str(), "Duplicate message event");
                Ok(HandlerOutcome::Ignored)
            }
        }
    }
}

/// `message.ack`: advances the delivery record.
pub struct AckHandler {
    deps: Arc<HandlerDeps>,
}

impl AckHandler {
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl EventHandler for AckHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome> {
        let WebhookEvent::Ack { ack, .. } = event else {
            return Ok(HandlerOutcome::Ignored);
        };

        // Records start out queued; a pending ack carries no progress
        if ack.level == AckLevel::Pending {
            return Ok(HandlerOutcome::Ignored);
        }

        let outcome = self
            .deps
            .ledger
            .apply_ack(ack.id.as_str(), ack.level.status(), ack.at.unwrap_or_else(Utc::now))
            .await?;

        Ok(match outcome {
            ApplyOutcome::Applied(_) => HandlerOutcome::Applied,
            ApplyOutcome::Stale | ApplyOutcome::Missing => HandlerOutcome::Ignored,
        })
    }
}

/// `session.status`: keeps the device's connection state and number current.
///
/// Disconnection does not pause campaigns; that is left to the sender.
pub struct SessionStatusHandler {
    deps: Arc<HandlerDeps>,
}

impl SessionStatusHandler {
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl EventHandler for SessionStatusHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome> {
        let WebhookEvent::SessionStatus { session, status } = event else {
            return Ok(HandlerOutcome::Ignored);
        };

        let Some(device) = self.deps.devices.find_by_session(session)? else {
            warn!(session = %session, state = %status.status, "Status for unknown session");
            return Ok(HandlerOutcome::Ignored);
        };

        let mut changed = false;

        if let Some(me) = &status.me {
            let phone = phone_from_jid(&me.id);
            if !phone.is_empty() && device.phone_number.as_deref() != Some(phone) {
                self.deps.devices.set_phone_number(&device.id, phone)?;
                changed = true;
            }
        }

        match DeviceStatus::from_session_state(&status.status) {
            Some(next) if next != device.status => {
                self.deps.devices.update_status(&device.id, next)?;
                info!(
                    device_id = %device.id,
                    session = %session,
                    from = %device.status,
                    to = %next,
                    "Device status changed"
                );
                changed = true;
            }
            Some(_) => {}
            None => debug!(session = %session, state = %status.status, "Transitional session state"),
        }

        Ok(if changed {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Ignored
        })
    }
}
