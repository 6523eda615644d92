use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod metrics;
mod payload;

pub use payload::{
    AckLevel, AckPayload, CallPayload, DecodeError, LabelPayload, MessageId, MessagePayload,
    ObservedPayload, PresencePayload, ReactionDetails, ReactionPayload, SessionIdentity,
    SessionStatusPayload, WebhookEvent,
};

/// Envelope of every provider webhook.
///
/// `payload` stays untyped until [`WebhookEnvelope::decode`] validates it
/// against the schema for `event`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Event tag (e.g. "message.ack")
    pub event: String,

    /// Provider session the event belongs to
    pub session: String,

    /// Provider engine name, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,

    /// Account of the session, sent by some engines at envelope level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<SessionIdentity>,

    /// Event-specific data
    #[serde(default)]
    pub payload: Value,
}

/// Envelope-level problems. These are client errors (HTTP 400), unlike
/// payload decode failures which are reported per event.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    MissingEvent,
    MissingSession,
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::MissingEvent => write!(f, "event is required"),
            EnvelopeError::MissingSession => write!(f, "session is required"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl WebhookEnvelope {
    /// Checks the envelope fields shared by every event.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.event.trim().is_empty() {
            return Err(EnvelopeError::MissingEvent);
        }
        if self.session.trim().is_empty() {
            return Err(EnvelopeError::MissingSession);
        }
        Ok(())
    }

    /// Recognized event kind, or None for unknown/future tags.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_tag(&self.event)
    }

    /// Decodes the payload with the schema for this envelope's tag.
    pub fn decode(&self) -> Result<WebhookEvent, DecodeError> {
        payload::decode(self)
    }
}

/// Every event tag the provider is known to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Message,
    MessageAny,
    MessageAck,
    MessageReaction,
    MessageRevoked,
    MessageWaiting,
    SessionStatus,
    GroupJoin,
    GroupLeave,
    ChatArchive,
    PresenceUpdate,
    LabelUpsert,
    LabelDeleted,
    LabelChatAdded,
    LabelChatDeleted,
    PollVote,
    PollVoteFailed,
    CallReceived,
    CallAccepted,
    CallRejected,
}

impl EventKind {
    pub const ALL: [EventKind; 20] = [
        EventKind::Message,
        EventKind::MessageAny,
        EventKind::MessageAck,
        EventKind::MessageReaction,
        EventKind::MessageRevoked,
        EventKind::MessageWaiting,
        EventKind::SessionStatus,
        EventKind::GroupJoin,
        EventKind::GroupLeave,
        EventKind::ChatArchive,
        EventKind::PresenceUpdate,
        EventKind::LabelUpsert,
        EventKind::LabelDeleted,
        EventKind::LabelChatAdded,
        EventKind::LabelChatDeleted,
        EventKind::PollVote,
        EventKind::PollVoteFailed,
        EventKind::CallReceived,
        EventKind::CallAccepted,
        EventKind::CallRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::MessageAny => "message.any",
            EventKind::MessageAck => "message.ack",
            EventKind::MessageReaction => "message.reaction",
            EventKind::MessageRevoked => "message.revoked",
            EventKind::MessageWaiting => "message.waiting",
            EventKind::SessionStatus => "session.status",
            EventKind::GroupJoin => "group.join",
            EventKind::GroupLeave => "group.leave",
            EventKind::ChatArchive => "chat.archive",
            EventKind::PresenceUpdate => "presence.update",
            EventKind::LabelUpsert => "label.upsert",
            EventKind::LabelDeleted => "label.deleted",
            EventKind::LabelChatAdded => "label.chat.added",
            EventKind::LabelChatDeleted => "label.chat.deleted",
            EventKind::PollVote => "poll.vote",
            EventKind::PollVoteFailed => "poll.vote.failed",
            EventKind::CallReceived => "call.received",
            EventKind::CallAccepted => "call.accepted",
            EventKind::CallRejected => "call.rejected",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == tag)
    }

    /// Events that may touch the delivery ledger or device state.
    pub fn affects_ledger(&self) -> bool {
        matches!(
            self,
            EventKind::Message
                | EventKind::MessageAny
                | EventKind::MessageAck
                | EventKind::SessionStatus
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
