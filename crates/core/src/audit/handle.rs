use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::AuditEvent;

/// Envelope wrapping an audit event with the time it was emitted
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

/// Cloneable sender for audit events.
///
/// Events go through a bounded channel to the [`AuditWriter`](super::AuditWriter).
/// Emitting never fails the caller; delivery problems are logged.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    fn envelope(event: AuditEvent) -> AuditEventEnvelope {
        AuditEventEnvelope {
            timestamp: Utc::now(),
            event,
        }
    }

    /// Emit an event, waiting for channel capacity.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.send(Self::envelope(event)).await {
            tracing::error!("Failed to emit audit event: {}", e);
        }
    }

    /// Emit without waiting. Returns false if the channel is full or closed.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        match self.tx.try_send(Self::envelope(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit audit event: {}", e);
                false
            }
        }
    }
}
