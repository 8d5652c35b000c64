use serde::Serialize;

use super::clearance::ClearanceError;
use super::payments::PaymentError;
use super::stage::{Gate, Requirement};
use super::store::StoreError;

/// Caller-facing classification shared by every workflow error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input the caller can correct.
    Validation,
    /// Well-formed request blocked by a workflow gate.
    Precondition,
    /// State moved since the caller's snapshot; refresh and retry.
    Conflict,
    /// Opaque store failure; retry policy belongs to the caller.
    Storage,
}

/// Error surfaced by [`JobLifecycleEngine`](super::engine::JobLifecycleEngine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation { message: String },
    #[error("{gate} is required: {message}")]
    Precondition {
        gate: Gate,
        message: String,
        blockers: Vec<Requirement>,
    },
    #[error("{message}; refresh and retry")]
    Conflict { message: String },
    #[error(transparent)]
    Storage(StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Precondition { .. } => ErrorKind::Precondition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn precondition(gate: Gate, blockers: Vec<Requirement>) -> Self {
        let message = if blockers.is_empty() {
            format!("{gate} has not been reached")
        } else {
            blockers
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        };
        Self::Precondition {
            gate,
            message,
            blockers,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StaleWrite { .. } => Self::Conflict {
                message: err.to_string(),
            },
            other => Self::Storage(other),
        }
    }
}

impl From<ClearanceError> for EngineError {
    fn from(err: ClearanceError) -> Self {
        match err {
            ClearanceError::Store(store) => store.into(),
            other => Self::validation(other.to_string()),
        }
    }
}

impl From<PaymentError> for EngineError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Store(store) => store.into(),
            PaymentError::ClearanceIncomplete { job_id, blockers } => Self::Precondition {
                gate: Gate::Clearance,
                message: format!(
                    "job {job_id}: delivery notes must be issued for all BLs before payments go to accounts ({})",
                    blockers
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
                blockers,
            },
            settled @ PaymentError::AccountsSettled(_) => Self::Precondition {
                gate: Gate::Accounts,
                message: settled.to_string(),
                blockers: Vec::new(),
            },
            conflict @ PaymentError::SettlementConflict { .. } => Self::Conflict {
                message: conflict.to_string(),
            },
            other => Self::validation(other.to_string()),
        }
    }
}
