//! Inputs and per-shift outcomes of bulk commands.

use serde::{Deserialize, Serialize};

use crate::rejection::Rejection;
use crate::state::ShiftStatus;
use crate::types::{ResourceId, ShiftId, SlotTarget};

/// One binding inside a bulk "assign" action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBinding {
    pub shift_id: ShiftId,
    pub slot: SlotTarget,
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Committed; the shift is now at `status`/`version`.
    Applied { status: ShiftStatus, version: u64 },
    /// Committed deletion.
    Deleted,
    /// Passed validation, but the batch was rolled back because another
    /// shift failed. Values are the unchanged current ones.
    Valid { status: ShiftStatus, version: u64 },
    Failed { rejection: Rejection },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub shift_id: ShiftId,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub committed: bool,
    pub outcomes: Vec<BulkOutcome>,
}

impl BulkResult {
    pub fn failures(&self) -> impl Iterator<Item = (&ShiftId, &Rejection)> {
        self.outcomes.iter().filter_map(|item| match &item.outcome {
            ItemOutcome::Failed { rejection } => Some((&item.shift_id, rejection)),
            _ => None,
        })
    }

    pub fn outcome_for(&self, shift_id: &ShiftId) -> Option<&ItemOutcome> {
        self.outcomes
            .iter()
            .find(|item| &item.shift_id == shift_id)
            .map(|item| &item.outcome)
    }
}

/// Drops repeated ids, keeping first-seen order.
pub fn dedupe_shift_ids(shift_ids: &[ShiftId]) -> Vec<ShiftId> {
    let mut seen = std::collections::HashSet::new();
    shift_ids
        .iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}
