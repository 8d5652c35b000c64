use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::JobId;

/// Audit event types emitted by the lifecycle engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ClearanceScheduled,
    ClearanceRescheduled,
    ClearanceIssued,
    DeliveryNoteDeleted,
    DeliveryNoteDelivered,
    PaymentRecorded,
    PaymentSentToAccounts,
    PaymentApproved,
    PaymentClearanceRequested,
    PaymentConfirmed,
    PaymentRejected,
    PaymentSettled,
    JobCompleted,
    DataIntegrityWarning,
}

impl EventType {
    pub const fn code(self) -> &'static str {
        match self {
            Self::ClearanceScheduled => "CLEARANCE_SCHEDULED",
            Self::ClearanceRescheduled => "CLEARANCE_RESCHEDULED",
            Self::ClearanceIssued => "CLEARANCE_ISSUED",
            Self::DeliveryNoteDeleted => "DELIVERY_NOTE_DELETED",
            Self::DeliveryNoteDelivered => "DELIVERY_NOTE_DELIVERED",
            Self::PaymentRecorded => "PAYMENT_RECORDED",
            Self::PaymentSentToAccounts => "PAYMENT_SENT_TO_ACCOUNTS",
            Self::PaymentApproved => "PAYMENT_APPROVED",
            Self::PaymentClearanceRequested => "PAYMENT_CLEARANCE_REQUESTED",
            Self::PaymentConfirmed => "PAYMENT_CONFIRMED",
            Self::PaymentRejected => "PAYMENT_REJECTED",
            Self::PaymentSettled => "PAYMENT_SETTLED",
            Self::JobCompleted => "JOB_COMPLETED",
            Self::DataIntegrityWarning => "DATA_INTEGRITY_WARNING",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_type: EventType,
    pub job_id: JobId,
    pub details: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(event_type: EventType, job_id: JobId) -> Self {
        Self {
            event_type,
            job_id,
            details: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Outbound audit hook (audit log, notification fan-out, ...).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}

/// Delivers an event without letting a sink failure reach the caller.
pub(crate) fn emit_quietly<E: EventSink + ?Sized>(sink: &E, event: LifecycleEvent) {
    let event_type = event.event_type;
    let job_id = event.job_id.clone();
    if let Err(err) = sink.emit(event) {
        warn!(event = %event_type, job_id = %job_id, error = %err, "lifecycle event dropped");
    }
}

/// Collects events in memory; used by tests and the CLI demo.
#[derive(Debug, Default, Clone)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl MemoryEventSink {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: LifecycleEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|_| SinkError::Transport("event buffer poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

/// Writes every event to the tracing subscriber, details as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: LifecycleEvent) -> Result<(), SinkError> {
        let details = serde_json::to_string(&event.details)
            .map_err(|err| SinkError::Transport(err.to_string()))?;
        info!(
            event = %event.event_type,
            job_id = %event.job_id,
            details = %details,
            "lifecycle event"
        );
        Ok(())
    }
}
