use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ShiftStatus;
use crate::types::{CompanyId, EventId, ResourceRef, ShiftId, SlotTarget};
use crate::window::ShiftWindow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ShiftCreated {
        status: ShiftStatus,
    },
    StatusChanged {
        from: ShiftStatus,
        to: ShiftStatus,
    },
    ResourceAssigned {
        slot: SlotTarget,
        resource: ResourceRef,
    },
    ResourceUnassigned {
        slot: SlotTarget,
        resource: ResourceRef,
    },
    ShiftMoved {
        from: ShiftWindow,
        to: ShiftWindow,
    },
    ShiftDeleted,
}

impl EventKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::ShiftCreated { .. } => "shift_created",
            EventKind::StatusChanged { .. } => "status_changed",
            EventKind::ResourceAssigned { .. } => "resource_assigned",
            EventKind::ResourceUnassigned { .. } => "resource_unassigned",
            EventKind::ShiftMoved { .. } => "shift_moved",
            EventKind::ShiftDeleted => "shift_deleted",
        }
    }
}

/// Audit record of one committed change to a shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub shift_id: ShiftId,
    pub company_id: CompanyId,
    /// Shift version the change produced.
    pub version: u64,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(
        shift_id: &ShiftId,
        company_id: &CompanyId,
        version: u64,
        at: DateTime<Utc>,
        kind: EventKind,
    ) -> Self {
        let mut id = format!("{shift_id}@v{version}:{}", kind.tag());
        if let EventKind::ResourceAssigned { slot, .. }
        | EventKind::ResourceUnassigned { slot, .. } = &kind
        {
            id.push(':');
            id.push_str(&slot.to_string());
        }
        Self {
            id: EventId(id),
            shift_id: shift_id.clone(),
            company_id: company_id.clone(),
            version,
            at,
            kind,
        }
    }
}
