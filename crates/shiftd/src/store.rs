//! Shift store contract and the in-memory reference store.
//!
//! Every read-check-write sequence of the engine runs inside
//! [`ShiftStore::transaction`]. Implementations must make that closure
//! serializable with respect to other transactions and apply its commit
//! atomically, only when the closure returns `Ok`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shift_core::events::Event;
use shift_core::state::ShiftStatus;
use shift_core::types::{CompanyId, ResourceBooking, ResourceRef, Shift, ShiftId};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stale version for shift {shift_id}: expected {expected}, current {actual}")]
    StaleVersion {
        shift_id: ShiftId,
        expected: u64,
        actual: u64,
    },
    #[error("shift not found: {shift_id}")]
    Missing { shift_id: ShiftId },
    #[error("shift already exists: {shift_id}")]
    Duplicate { shift_id: ShiftId },
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("json serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Insert(Shift),
    Update { shift: Shift, expected_version: u64 },
    Delete { shift_id: ShiftId, expected_version: u64 },
}

impl Mutation {
    pub fn shift_id(&self) -> &ShiftId {
        match self {
            Mutation::Insert(shift) | Mutation::Update { shift, .. } => &shift.id,
            Mutation::Delete { shift_id, .. } => shift_id,
        }
    }
}

/// Writes of one command, applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    pub mutations: Vec<Mutation>,
    pub events: Vec<Event>,
}

/// Calendar query. Dates are inclusive and match the window's start date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftQuery {
    pub company_id: CompanyId,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<ShiftStatus>,
}

impl ShiftQuery {
    pub fn company(company_id: impl Into<String>) -> Self {
        Self {
            company_id: CompanyId::new(company_id),
            from: None,
            to: None,
            status: None,
        }
    }

    pub fn matches(&self, shift: &Shift) -> bool {
        shift.company_id == self.company_id
            && self.from.map_or(true, |from| shift.window.date >= from)
            && self.to.map_or(true, |to| shift.window.date <= to)
            && self.status.map_or(true, |status| shift.status == status)
    }
}

pub trait StoreTx {
    fn load(&mut self, shift_id: &ShiftId) -> Result<Option<Shift>, StoreError>;

    /// Bookings of active (non-terminal) shifts of `company_id` that bind
    /// `resource`.
    fn load_active_bookings_for(
        &mut self,
        company_id: &CompanyId,
        resource: &ResourceRef,
    ) -> Result<Vec<ResourceBooking>, StoreError>;

    fn allocate_shift_id(&mut self) -> Result<ShiftId, StoreError>;

    /// Checks every expected version first; any mismatch leaves the whole
    /// batch unapplied.
    fn commit(&mut self, batch: CommitBatch) -> Result<(), StoreError>;
}

pub trait ShiftStore: Send + Sync {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>;

    fn load(&self, shift_id: &ShiftId) -> Result<Option<Shift>, StoreError>;

    /// Shifts matching `query`, ordered by window start then id.
    fn list_shifts(&self, query: &ShiftQuery) -> Result<Vec<Shift>, StoreError>;

    fn events_for(&self, shift_id: &ShiftId) -> Result<Vec<Event>, StoreError>;

    /// Active bookings of one resource in start order.
    fn resource_schedule(
        &self,
        company_id: &CompanyId,
        resource: &ResourceRef,
    ) -> Result<Vec<ResourceBooking>, StoreError> {
        self.transaction(|tx| {
            let mut bookings = tx.load_active_bookings_for(company_id, resource)?;
            bookings.sort_by(|a, b| {
                a.span()
                    .cmp(&b.span())
                    .then_with(|| a.shift_id.cmp(&b.shift_id))
            });
            Ok(bookings)
        })
    }
}

pub(crate) fn sort_shifts(shifts: &mut [Shift]) {
    shifts.sort_by(|a, b| {
        a.window
            .span()
            .start
            .cmp(&b.window.span().start)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[derive(Debug, Default)]
struct MemoryState {
    shifts: BTreeMap<ShiftId, Shift>,
    events: Vec<Event>,
    last_sequence: u64,
}

impl MemoryState {
    fn apply(&mut self, batch: CommitBatch) {
        for mutation in batch.mutations {
            match mutation {
                Mutation::Insert(shift) | Mutation::Update { shift, .. } => {
                    self.shifts.insert(shift.id.clone(), shift);
                }
                Mutation::Delete { shift_id, .. } => {
                    self.shifts.remove(&shift_id);
                }
            }
        }
        self.events.extend(batch.events);
    }
}

/// Reference store; one mutex serializes every transaction.
#[derive(Debug, Default)]
pub struct MemoryShiftStore {
    state: Mutex<MemoryState>,
}

impl MemoryShiftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTx<'a> {
    state: &'a MemoryState,
    pending: Vec<CommitBatch>,
    last_sequence: u64,
}

impl MemoryTx<'_> {
    /// Shifts written by earlier commits of this transaction. `None` marks a
    /// delete.
    fn overrides(&self) -> BTreeMap<&ShiftId, Option<&Shift>> {
        let mut overrides = BTreeMap::new();
        for mutation in self.pending.iter().flat_map(|batch| &batch.mutations) {
            let shift = match mutation {
                Mutation::Insert(shift) | Mutation::Update { shift, .. } => Some(shift),
                Mutation::Delete { .. } => None,
            };
            overrides.insert(mutation.shift_id(), shift);
        }
        overrides
    }

    fn current(&self, shift_id: &ShiftId) -> Option<&Shift> {
        match self.overrides().get(shift_id) {
            Some(staged) => *staged,
            None => self.state.shifts.get(shift_id),
        }
    }

    fn check(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        for mutation in &batch.mutations {
            let shift_id = mutation.shift_id();
            let current = self.current(shift_id);
            match mutation {
                Mutation::Insert(_) => {
                    if current.is_some() {
                        return Err(StoreError::Duplicate {
                            shift_id: shift_id.clone(),
                        });
                    }
                }
                Mutation::Update {
                    expected_version, ..
                }
                | Mutation::Delete {
                    expected_version, ..
                } => {
                    let current = current.ok_or_else(|| StoreError::Missing {
                        shift_id: shift_id.clone(),
                    })?;
                    if current.version != *expected_version {
                        return Err(StoreError::StaleVersion {
                            shift_id: shift_id.clone(),
                            expected: *expected_version,
                            actual: current.version,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl StoreTx for MemoryTx<'_> {
    fn load(&mut self, shift_id: &ShiftId) -> Result<Option<Shift>, StoreError> {
        Ok(self.current(shift_id).cloned())
    }

    fn load_active_bookings_for(
        &mut self,
        company_id: &CompanyId,
        resource: &ResourceRef,
    ) -> Result<Vec<ResourceBooking>, StoreError> {
        let overrides = self.overrides();
        Ok(self
            .state
            .shifts
            .values()
            .filter(|shift| !overrides.contains_key(&shift.id))
            .chain(overrides.values().flatten().copied())
            .filter(|shift| &shift.company_id == company_id)
            .flat_map(Shift::bookings)
            .filter(|booking| &booking.resource == resource)
            .collect())
    }

    fn allocate_shift_id(&mut self) -> Result<ShiftId, StoreError> {
        self.last_sequence += 1;
        Ok(ShiftId::from_sequence(self.last_sequence))
    }

    fn commit(&mut self, batch: CommitBatch) -> Result<(), StoreError> {
        self.check(&batch)?;
        self.pending.push(batch);
        Ok(())
    }
}

impl ShiftStore for MemoryShiftStore {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let mut tx = MemoryTx {
            state: &guard,
            pending: Vec::new(),
            last_sequence: guard.last_sequence,
        };
        let out = f(&mut tx)?;

        let MemoryTx {
            pending,
            last_sequence,
            ..
        } = tx;
        guard.last_sequence = last_sequence;
        for batch in pending {
            guard.apply(batch);
        }
        Ok(out)
    }

    fn load(&self, shift_id: &ShiftId) -> Result<Option<Shift>, StoreError> {
        let guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.shifts.get(shift_id).cloned())
    }

    fn list_shifts(&self, query: &ShiftQuery) -> Result<Vec<Shift>, StoreError> {
        let guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let mut shifts: Vec<Shift> = guard
            .shifts
            .values()
            .filter(|shift| query.matches(shift))
            .cloned()
            .collect();
        sort_shifts(&mut shifts);
        Ok(shifts)
    }

    fn events_for(&self, shift_id: &ShiftId) -> Result<Vec<Event>, StoreError> {
        let guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .events
            .iter()
            .filter(|event| &event.shift_id == shift_id)
            .cloned()
            .collect())
    }
}
