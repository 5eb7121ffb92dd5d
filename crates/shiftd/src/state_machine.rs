//! Shift status transitions, single and bulk.

use chrono::{DateTime, Utc};
use shift_core::bulk::{BulkOutcome, BulkResult, ItemOutcome};
use shift_core::config::StaffingPolicy;
use shift_core::rejection::Rejection;
use shift_core::state::ShiftStatus;
use shift_core::types::Shift;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ShiftStatus,
    pub to: ShiftStatus,
}

impl StateTransition {
    /// The shift re-enters the active booking set.
    pub fn reactivates(&self) -> bool {
        self.from.is_terminal() && self.to.is_active()
    }
}

/// Check if a status edge exists.
///
/// ```text
/// OPEN      -> OFFER | PLANNED
/// OFFER     -> OPEN | PLANNED
/// PLANNED   -> FIXED | OPEN
/// FIXED     -> SUBMITTED | PLANNED
/// SUBMITTED -> APPROVED | REJECTED
/// APPROVED  -> BILLED | REJECTED
/// REJECTED  -> OPEN
/// ```
pub fn is_transition_allowed(from: ShiftStatus, to: ShiftStatus) -> bool {
    use ShiftStatus::*;

    matches!(
        (from, to),
        (Open, Offer)
            | (Open, Planned)
            | (Offer, Open)
            | (Offer, Planned)
            | (Planned, Fixed)
            | (Planned, Open)
            | (Fixed, Submitted)
            | (Fixed, Planned)
            | (Submitted, Approved)
            | (Submitted, Rejected)
            | (Approved, Billed)
            | (Approved, Rejected)
            | (Rejected, Open)
    )
}

/// Decide whether `shift` may move to `to` without touching it.
pub fn check_transition(
    shift: &Shift,
    to: ShiftStatus,
    policy: &StaffingPolicy,
) -> Result<StateTransition, Rejection> {
    let from = shift.status;
    if from == ShiftStatus::Billed {
        return Err(Rejection::ShiftTerminal {
            shift_id: shift.id.clone(),
            status: from,
        });
    }
    if !is_transition_allowed(from, to) {
        return Err(Rejection::IllegalTransition {
            shift_id: shift.id.clone(),
            from,
            to,
        });
    }
    if to.requires_staffing() {
        let missing = shift.missing_staff(policy.for_family(shift.family));
        if !missing.is_empty() {
            return Err(Rejection::StaffingIncomplete {
                shift_id: shift.id.clone(),
                to,
                missing,
            });
        }
    }
    Ok(StateTransition { from, to })
}

/// Move a shift to a new status and record the mutation on its version.
pub fn transition(
    shift: &mut Shift,
    to: ShiftStatus,
    policy: &StaffingPolicy,
    at: DateTime<Utc>,
) -> Result<StateTransition, Rejection> {
    let change = check_transition(shift, to, policy)?;
    shift.status = change.to;
    shift.touch(at);
    Ok(change)
}

/// Dry-run every shift; `extra` can veto a shift that passed the edge and
/// staffing checks.
pub fn plan_bulk_transition<F>(
    shifts: &[Shift],
    to: ShiftStatus,
    policy: &StaffingPolicy,
    mut extra: F,
) -> Vec<Result<StateTransition, Rejection>>
where
    F: FnMut(&Shift, &StateTransition) -> Result<(), Rejection>,
{
    shifts
        .iter()
        .map(|shift| {
            let change = check_transition(shift, to, policy)?;
            extra(shift, &change)?;
            Ok(change)
        })
        .collect()
}

/// Apply a plan produced by [`plan_bulk_transition`] only if every entry
/// passed. Returns whether anything was applied.
pub fn apply_bulk_plan(
    shifts: &mut [Shift],
    plan: &[Result<StateTransition, Rejection>],
    at: DateTime<Utc>,
) -> bool {
    if shifts.len() != plan.len() || plan.iter().any(Result::is_err) {
        return false;
    }
    for (shift, change) in shifts.iter_mut().zip(plan) {
        if let Ok(change) = change {
            shift.status = change.to;
            shift.touch(at);
        }
    }
    true
}

/// All-or-nothing transition of a set of shifts held in memory.
pub fn bulk_transition(
    shifts: &mut [Shift],
    to: ShiftStatus,
    policy: &StaffingPolicy,
    at: DateTime<Utc>,
) -> BulkResult {
    let plan = plan_bulk_transition(shifts, to, policy, |_, _| Ok(()));
    let committed = apply_bulk_plan(shifts, &plan, at);
    let outcomes = shifts
        .iter()
        .zip(plan)
        .map(|(shift, result)| BulkOutcome {
            shift_id: shift.id.clone(),
            outcome: match result {
                Ok(_) if committed => ItemOutcome::Applied {
                    status: shift.status,
                    version: shift.version,
                },
                Ok(_) => ItemOutcome::Valid {
                    status: shift.status,
                    version: shift.version,
                },
                Err(rejection) => ItemOutcome::Failed { rejection },
            },
        })
        .collect();
    BulkResult {
        committed,
        outcomes,
    }
}
