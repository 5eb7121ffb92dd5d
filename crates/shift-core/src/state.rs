//! Shift lifecycle states.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftStatus {
    /// Created, still being staffed
    Open,
    /// Offered to external parties, reserves its resources like `Open`
    Offer,
    /// Fully staffed and scheduled
    Planned,
    /// Locked in by dispatch
    Fixed,
    /// Worked and submitted for approval
    Submitted,
    Approved,
    Billed,
    /// Refused at approval; may be re-opened for correction
    Rejected,
}

impl ShiftStatus {
    pub const ALL: [ShiftStatus; 8] = [
        ShiftStatus::Open,
        ShiftStatus::Offer,
        ShiftStatus::Planned,
        ShiftStatus::Fixed,
        ShiftStatus::Submitted,
        ShiftStatus::Approved,
        ShiftStatus::Billed,
        ShiftStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShiftStatus::Open => "OPEN",
            ShiftStatus::Offer => "OFFER",
            ShiftStatus::Planned => "PLANNED",
            ShiftStatus::Fixed => "FIXED",
            ShiftStatus::Submitted => "SUBMITTED",
            ShiftStatus::Approved => "APPROVED",
            ShiftStatus::Billed => "BILLED",
            ShiftStatus::Rejected => "REJECTED",
        }
    }

    /// Terminal shifts hold no bookings and accept no edits.
    pub fn is_terminal(self) -> bool {
        matches!(self, ShiftStatus::Billed | ShiftStatus::Rejected)
    }

    /// Shifts in an active status reserve their resources.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Statuses that may only be entered once staffing is complete.
    pub fn requires_staffing(self) -> bool {
        matches!(self, ShiftStatus::Planned | ShiftStatus::Fixed)
    }

    /// Statuses a shift can be created in.
    pub fn is_initial(self) -> bool {
        matches!(self, ShiftStatus::Open | ShiftStatus::Offer)
    }
}

impl std::fmt::Display for ShiftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ShiftStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        ShiftStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "invalid shift status '{value}'. valid values: OPEN, OFFER, PLANNED, FIXED, SUBMITTED, APPROVED, BILLED, REJECTED"
                )
            })
    }
}
