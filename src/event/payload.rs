//! Per-tag payload schemas.
//!
//! Each recognized tag decodes into a typed struct; a payload that does not
//! match its schema is rejected instead of being read field by field.

use super::{EventKind, WebhookEnvelope};
use crate::ledger::DeliveryStatus;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Payload decode errors.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    UnknownEvent(String),
    PayloadNotObject(EventKind),
    Schema { kind: EventKind, reason: String },
    UnknownAckLevel(i64),
    MissingAck,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownEvent(tag) => write!(f, "unrecognized event '{}'", tag),
            DecodeError::PayloadNotObject(kind) => {
                write!(f, "payload for '{}' must be a JSON object", kind)
            }
            DecodeError::Schema { kind, reason } => {
                write!(f, "invalid '{}' payload: {}", kind, reason)
            }
            DecodeError::UnknownAckLevel(level) => write!(f, "unknown ack level {}", level),
            DecodeError::MissingAck => write!(f, "ack payload carries neither ack nor ackName"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Provider message id: either a plain string or the serialized-key object
/// some engines send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Plain(String),
    Keyed {
        #[serde(rename = "_serialized")]
        serialized: String,
    },
}

impl MessageId {
    pub fn as_str(&self) -> &str {
        match self {
            MessageId::Plain(id) => id,
            MessageId::Keyed { serialized } => serialized,
        }
    }
}

/// Provider delivery progress for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckLevel {
    Error,
    Pending,
    Server,
    Device,
    Read,
    Played,
}

impl AckLevel {
    pub fn from_code(code: i64) -> Result<Self, DecodeError> {
        match code {
            -1 => Ok(AckLevel::Error),
            0 => Ok(AckLevel::Pending),
            1 => Ok(AckLevel::Server),
            2 => Ok(AckLevel::Device),
            3 => Ok(AckLevel::Read),
            4 | 5 => Ok(AckLevel::Played),
            other => Err(DecodeError::UnknownAckLevel(other)),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ERROR" => Some(AckLevel::Error),
            "PENDING" => Some(AckLevel::Pending),
            "SERVER" => Some(AckLevel::Server),
            "DEVICE" => Some(AckLevel::Device),
            "READ" => Some(AckLevel::Read),
            "PLAYED" => Some(AckLevel::Played),
            _ => None,
        }
    }

    /// Ledger status this level corresponds to.
    pub fn status(&self) -> DeliveryStatus {
        match self {
            AckLevel::Error => DeliveryStatus::Failed,
            AckLevel::Pending => DeliveryStatus::Queued,
            AckLevel::Server => DeliveryStatus::Sent,
            AckLevel::Device => DeliveryStatus::Delivered,
            AckLevel::Read | AckLevel::Played => DeliveryStatus::Read,
        }
    }

    fn resolve(code: Option<i64>, name: Option<&str>) -> Result<Option<Self>, DecodeError> {
        match (code, name) {
            (Some(code), _) => Self::from_code(code).map(Some),
            (None, Some(name)) => Ok(Self::from_name(name)),
            (None, None) => Ok(None),
        }
    }
}

fn timestamp_from_secs(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.filter(|s| *s > 0)
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
}

/// `message` / `message.any` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub ack: Option<i64>,
    #[serde(default)]
    pub ack_name: Option<String>,
}

impl MessagePayload {
    pub fn ack_level(&self) -> Result<Option<AckLevel>, DecodeError> {
        AckLevel::resolve(self.ack, self.ack_name.as_deref())
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        timestamp_from_secs(self.timestamp)
    }
}

/// `message.ack` payload, with the ack level already resolved.
#[derive(Debug, Clone)]
pub struct AckPayload {
    pub id: MessageId,
    pub from: Option<String>,
    pub to: Option<String>,
    pub level: AckLevel,
    pub at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAckPayload {
    id: MessageId,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    ack: Option<i64>,
    #[serde(default)]
    ack_name: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Account behind a session (`me` block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    /// JID of the account, e.g. `5511999990000@c.us`
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
}

/// `session.status` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusPayload {
    pub status: String,
    #[serde(default)]
    pub me: Option<SessionIdentity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionDetails {
    #[serde(default)]
    pub text: Option<String>,
    pub message_id: MessageId,
}

/// `message.reaction` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub id: MessageId,
    #[serde(default)]
    pub from: Option<String>,
    pub reaction: ReactionDetails,
}

/// `call.*` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub is_group: bool,
}

/// `presence.update` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PresencePayload {
    pub id: String,
    #[serde(default)]
    pub presences: Vec<Value>,
}

/// `label.*` payload. Label events carry either a label or a label/chat pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Payload of tags that are only observed: any object, with an optional id.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservedPayload {
    #[serde(default)]
    pub id: Option<Value>,
}

/// A decoded webhook event.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Message {
        kind: EventKind,
        session: String,
        message: MessagePayload,
    },
    Ack {
        session: String,
        ack: AckPayload,
    },
    SessionStatus {
        session: String,
        status: SessionStatusPayload,
    },
    Reaction {
        session: String,
        reaction: ReactionPayload,
    },
    Call {
        kind: EventKind,
        session: String,
        call: CallPayload,
    },
    Presence {
        session: String,
        presence: PresencePayload,
    },
    Label {
        kind: EventKind,
        session: String,
        label: LabelPayload,
    },
    Observed {
        kind: EventKind,
        session: String,
        payload: ObservedPayload,
    },
}

impl WebhookEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WebhookEvent::Message { kind, .. }
            | WebhookEvent::Call { kind, .. }
            | WebhookEvent::Label { kind, .. }
            | WebhookEvent::Observed { kind, .. } => *kind,
            WebhookEvent::Ack { .. } => EventKind::MessageAck,
            WebhookEvent::SessionStatus { .. } => EventKind::SessionStatus,
            WebhookEvent::Reaction { .. } => EventKind::MessageReaction,
            WebhookEvent::Presence { .. } => EventKind::PresenceUpdate,
        }
    }

    pub fn session(&self) -> &str {
        match self {
            WebhookEvent::Message { session, .. }
            | WebhookEvent::Ack { session, .. }
            | WebhookEvent::SessionStatus { session, .. }
            | WebhookEvent::Reaction { session, .. }
            | WebhookEvent::Call { session, .. }
            | WebhookEvent::Presence { session, .. }
            | WebhookEvent::Label { session, .. }
            | WebhookEvent::Observed { session, .. } => session,
        }
    }
}

fn schema<T: serde::de::DeserializeOwned>(kind: EventKind, payload: &Value) -> Result<T, DecodeError> {
    if !payload.is_object() {
        return Err(DecodeError::PayloadNotObject(kind));
    }
    T::deserialize(payload).map_err(|e| DecodeError::Schema {
        kind,
        reason: e.to_string(),
    })
}

/// Decodes a recognized envelope into its typed event.
///
/// Unknown tags are rejected here; the dispatcher handles them before
/// decoding.
pub(super) fn decode(envelope: &WebhookEnvelope) -> Result<WebhookEvent, DecodeError> {
    let kind = envelope
        .kind()
        .ok_or_else(|| DecodeError::UnknownEvent(envelope.event.clone()))?;
    let session = envelope.session.clone();
    let payload = &envelope.payload;

    let event = match kind {
        EventKind::Message | EventKind::MessageAny => WebhookEvent::Message {
            kind,
            session,
            message: schema(kind, payload)?,
        },
        EventKind::MessageAck => {
            let raw: RawAckPayload = schema(kind, payload)?;
            let level = AckLevel::resolve(raw.ack, raw.ack_name.as_deref())?
                .ok_or(DecodeError::MissingAck)?;
            WebhookEvent::Ack {
                session,
                ack: AckPayload {
                    id: raw.id,
                    from: raw.from,
                    to: raw.to,
                    level,
                    at: timestamp_from_secs(raw.timestamp),
                },
            }
        }
        EventKind::SessionStatus => {
            let mut status: SessionStatusPayload = schema(kind, payload)?;
            if status.me.is_none() {
                status.me = envelope.me.clone();
            }
            WebhookEvent::SessionStatus { session, status }
        }
        EventKind::MessageReaction => WebhookEvent::Reaction {
            session,
            reaction: schema(kind, payload)?,
        },
        EventKind::CallReceived | EventKind::CallAccepted | EventKind::CallRejected => {
            WebhookEvent::Call {
                kind,
                session,
                call: schema(kind, payload)?,
            }
        }
        EventKind::PresenceUpdate => WebhookEvent::Presence {
            session,
            presence: schema(kind, payload)?,
        },
        EventKind::LabelUpsert
        | EventKind::LabelDeleted
        | EventKind::LabelChatAdded
        | EventKind::LabelChatDeleted => WebhookEvent::Label {
            kind,
            session,
            label: schema(kind, payload)?,
        },
        EventKind::MessageRevoked
        | EventKind::MessageWaiting
        | EventKind::GroupJoin
        | EventKind::GroupLeave
        | EventKind::ChatArchive
        | EventKind::PollVote
        | EventKind::PollVoteFailed => WebhookEvent::Observed {
            kind,
            session,
            payload: schema(kind, payload)?,
        },
    };
    Ok(event)
}
