//! Caller-facing reasons a scheduling command was refused.

use serde::{Deserialize, Serialize};

use crate::state::ShiftStatus;
use crate::types::{ResourceRef, ShiftId, SlotTarget};
use crate::window::ShiftWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    IllegalTransition,
    StaffingIncomplete,
    ShiftTerminal,
    Conflict,
    IncapableResource,
    StaleVersion,
    StorageFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::IllegalTransition => "illegal_transition",
            ErrorKind::StaffingIncomplete => "staffing_incomplete",
            ErrorKind::ShiftTerminal => "shift_terminal",
            ErrorKind::Conflict => "conflict",
            ErrorKind::IncapableResource => "incapable_resource",
            ErrorKind::StaleVersion => "stale_version",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }

    /// Only storage failures are safe to retry unchanged.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::StorageFailure)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shift and window a resource is already booked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub resource: ResourceRef,
    pub conflicting_shift_id: ShiftId,
    pub conflicting_window: ShiftWindow,
}

impl std::fmt::Display for ConflictDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} is already booked on shift {} ({})",
            self.resource, self.conflicting_shift_id, self.conflicting_window
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    #[error("invalid input ({code}): {message}")]
    Validation { code: String, message: String },
    #[error("shift not found: {shift_id}")]
    ShiftNotFound { shift_id: ShiftId },
    #[error("illegal transition for shift {shift_id}: {from} -> {to}")]
    IllegalTransition {
        shift_id: ShiftId,
        from: ShiftStatus,
        to: ShiftStatus,
    },
    #[error("shift {shift_id} cannot enter {to}: unfilled slots {}", join_slots(.missing))]
    StaffingIncomplete {
        shift_id: ShiftId,
        to: ShiftStatus,
        missing: Vec<SlotTarget>,
    },
    #[error("shift {shift_id} is {status} and can no longer change")]
    ShiftTerminal {
        shift_id: ShiftId,
        status: ShiftStatus,
    },
    #[error("{detail}")]
    Conflict { detail: ConflictDetail },
    #[error("{resource} cannot fill slot {slot}")]
    IncapableResource {
        resource: ResourceRef,
        slot: SlotTarget,
    },
    #[error("stale version for shift {shift_id}: expected {expected}, current {actual}")]
    StaleVersion {
        shift_id: ShiftId,
        expected: u64,
        actual: u64,
    },
}

impl Rejection {
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Rejection::Validation {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Rejection::Validation { .. } | Rejection::ShiftNotFound { .. } => {
                ErrorKind::ValidationError
            }
            Rejection::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            Rejection::StaffingIncomplete { .. } => ErrorKind::StaffingIncomplete,
            Rejection::ShiftTerminal { .. } => ErrorKind::ShiftTerminal,
            Rejection::Conflict { .. } => ErrorKind::Conflict,
            Rejection::IncapableResource { .. } => ErrorKind::IncapableResource,
            Rejection::StaleVersion { .. } => ErrorKind::StaleVersion,
        }
    }

    pub fn conflict(&self) -> Option<&ConflictDetail> {
        match self {
            Rejection::Conflict { detail } => Some(detail),
            _ => None,
        }
    }
}

fn join_slots(slots: &[SlotTarget]) -> String {
    slots
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
