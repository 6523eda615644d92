//! Webhook event dispatch.
//!
//! A [`HandlerRegistry`] maps every [`EventKind`] to a handler, with a no-op
//! default for kinds nobody registered. [`Dispatcher::dispatch`] never fails:
//! decode errors, handler errors and handler panics are contained per event
//! and reported as [`DispatchOutcome::Failed`], so the webhook can always
//! acknowledge receipt.

use crate::event::metrics::{Disposition, IngestionMetrics, UNKNOWN_TAG};
use crate::event::{EventKind, WebhookEnvelope, WebhookEvent};
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

mod handlers;

pub use handlers::{
    AckHandler, HandlerDeps, MessageHandler, NoopHandler, ObservabilityHandler,
    SessionStatusHandler,
};

/// What a handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// State was updated.
    Applied,
    /// Nothing to do for this event.
    Ignored,
}

/// Handles one kind of decoded webhook event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome>;
}

/// Result of dispatching one envelope. Serialized into the webhook response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    Applied,
    Ignored,
    Failed,
}

impl From<HandlerOutcome> for DispatchOutcome {
    fn from(outcome: HandlerOutcome) -> Self {
        match outcome {
            HandlerOutcome::Applied => DispatchOutcome::Applied,
            HandlerOutcome::Ignored => DispatchOutcome::Ignored,
        }
    }
}

impl DispatchOutcome {
    fn disposition(&self) -> Disposition {
        match self {
            DispatchOutcome::Applied => Disposition::Applied,
            DispatchOutcome::Ignored => Disposition::Ignored,
            DispatchOutcome::Failed => Disposition::Failed,
        }
    }
}

/// Event kind → handler map with a default for unregistered kinds.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
    fallback: Arc<dyn EventHandler>,
}

impl HandlerRegistry {
    /// Empty registry; every kind resolves to the no-op handler.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(NoopHandler),
        }
    }

    /// Registry with the production handlers for every known kind.
    pub fn standard(deps: HandlerDeps) -> Self {
        let deps = Arc::new(deps);
        let message: Arc<dyn EventHandler> = Arc::new(MessageHandler::new(Arc::clone(&deps)));
        let ack: Arc<dyn EventHandler> = Arc::new(AckHandler::new(Arc::clone(&deps)));
        let session: Arc<dyn EventHandler> = Arc::new(SessionStatusHandler::new(Arc::clone(&deps)));
        let observe: Arc<dyn EventHandler> = Arc::new(ObservabilityHandler);

        let mut registry = Self::new();
        for kind in EventKind::ALL {
            let handler = match kind {
                EventKind::Message | EventKind::MessageAny => Arc::clone(&message),
                EventKind::MessageAck => Arc::clone(&ack),
                EventKind::SessionStatus => Arc::clone(&session),
                _ => Arc::clone(&observe),
            };
            registry.register(kind, handler);
        }
        registry
    }

    /// Registers (or replaces) the handler for `kind`.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Handler for `kind`, falling back to the no-op handler.
    pub fn resolve(&self, kind: EventKind) -> Arc<dyn EventHandler> {
        self.handlers
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// True when every known kind has an explicit handler.
    pub fn covers_all_kinds(&self) -> bool {
        EventKind::ALL.iter().all(|k| self.handlers.contains_key(k))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes envelopes to handlers and records ingestion metrics.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    metrics: IngestionMetrics,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, metrics: IngestionMetrics) -> Self {
        Self {
            registry: Arc::new(registry),
            metrics,
        }
    }

    pub fn metrics(&self) -> &IngestionMetrics {
        &self.metrics
    }

    /// Dispatches one envelope. Never fails.
    pub async fn dispatch(&self, envelope: &WebhookEnvelope) -> DispatchOutcome {
        let Some(kind) = envelope.kind() else {
            info!(
                event = %envelope.event,
                session = %envelope.session,
                "Ignoring unrecognized webhook event"
            );
            self.metrics.record(UNKNOWN_TAG, Disposition::Ignored);
            return DispatchOutcome::Ignored;
        };

        let outcome = self.run(kind, envelope).await;
        self.metrics.record(kind.as_str(), outcome.disposition());
        outcome
    }

    async fn run(&self, kind: EventKind, envelope: &WebhookEnvelope) -> DispatchOutcome {
        let event = match envelope.decode() {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    event = %kind,
                    session = %envelope.session,
                    error = %e,
                    "Rejected webhook payload"
                );
                return DispatchOutcome::Failed;
            }
        };

        let handler = self.registry.resolve(kind);
        match AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
            Ok(Ok(outcome)) => {
                if kind.affects_ledger() {
                    info!(event = %kind, session = %envelope.session, outcome = ?outcome, "Event handled");
                } else {
                    debug!(event = %kind, session = %envelope.session, outcome = ?outcome, "Event handled");
                }
                outcome.into()
            }
            Ok(Err(e)) => {
                error!(
                    event = %kind,
                    session = %envelope.session,
                    error = %e,
                    "Webhook handler failed"
                );
                DispatchOutcome::Failed
            }
            Err(_) => {
                error!(
                    event = %kind,
                    session = %envelope.session,
                    "Webhook handler panicked"
                );
                DispatchOutcome::Failed
            }
        }
    }
}
