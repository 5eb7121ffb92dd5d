//! Scheduling engine.
//!
//! Each command runs its reads, checks and writes inside one
//! [`ShiftStore::transaction`], so an overlap check and the write it guards
//! can never interleave with another command touching the same resource.

use chrono::{DateTime, Utc};
use shift_core::bulk::{dedupe_shift_ids, BulkOutcome, BulkResult, ItemOutcome, ResourceBinding};
use shift_core::config::StaffingPolicy;
use shift_core::events::{Event, EventKind};
use shift_core::rejection::{ErrorKind, Rejection};
use shift_core::state::ShiftStatus;
use shift_core::types::{
    CompanyId, ResourceBooking, ResourceId, ResourceRef, Shift, ShiftDraft, ShiftId, SlotTarget,
};
use shift_core::validation::{reject_on_errors, Validate};
use shift_core::window::ShiftWindow;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::directory::{DirectoryError, ResourceDirectory};
use crate::state_machine::{apply_bulk_plan, plan_bulk_transition, transition};
use crate::store::{CommitBatch, Mutation, ShiftQuery, ShiftStore, StoreError, StoreTx};
use crate::validator::{AssignmentValidator, Overlay};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("storage failure: {0}")]
    Storage(StoreError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StaleVersion {
                shift_id,
                expected,
                actual,
            } => EngineError::Rejected(Rejection::StaleVersion {
                shift_id,
                expected,
                actual,
            }),
            StoreError::Missing { shift_id } => {
                EngineError::Rejected(Rejection::ShiftNotFound { shift_id })
            }
            other => EngineError::Storage(other),
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Rejected(rejection) => rejection.kind(),
            EngineError::Storage(_) | EngineError::Directory(_) => ErrorKind::StorageFailure,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            EngineError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Separates caller-facing rejections from infrastructure failures.
fn split_rejection<T>(result: Result<T, EngineError>) -> Result<Result<T, Rejection>, EngineError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(EngineError::Rejected(rejection)) => Ok(Err(rejection)),
        Err(other) => Err(other),
    }
}

fn log_failure<T>(command: &'static str, shift_id: &ShiftId, result: &Result<T, EngineError>) {
    if let Err(err) = result {
        match err.rejection() {
            Some(rejection) => debug!(
                command,
                shift_id = %shift_id,
                kind = %rejection.kind(),
                reason = %rejection,
                "command rejected"
            ),
            None => warn!(command, shift_id = %shift_id, error = %err, "command failed"),
        }
    }
}

fn load_existing<T: StoreTx + ?Sized>(
    tx: &mut T,
    shift_id: &ShiftId,
) -> Result<Shift, EngineError> {
    tx.load(shift_id)?.ok_or_else(|| {
        EngineError::from(Rejection::ShiftNotFound {
            shift_id: shift_id.clone(),
        })
    })
}

fn terminal(shift: &Shift) -> Rejection {
    Rejection::ShiftTerminal {
        shift_id: shift.id.clone(),
        status: shift.status,
    }
}

fn ensure_mutable(shift: &Shift) -> Result<(), Rejection> {
    if shift.status.is_terminal() {
        return Err(terminal(shift));
    }
    Ok(())
}

fn ensure_version(shift: &Shift, expected_version: u64) -> Result<(), Rejection> {
    if shift.version != expected_version {
        return Err(Rejection::StaleVersion {
            shift_id: shift.id.clone(),
            expected: expected_version,
            actual: shift.version,
        });
    }
    Ok(())
}

fn events_of(shift: &Shift, kinds: Vec<EventKind>, at: DateTime<Utc>) -> Vec<Event> {
    kinds
        .into_iter()
        .map(|kind| Event::new(&shift.id, &shift.company_id, shift.version, at, kind))
        .collect()
}

fn commit_update<T: StoreTx + ?Sized>(
    tx: &mut T,
    shift: &Shift,
    expected_version: u64,
    kinds: Vec<EventKind>,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    tx.commit(CommitBatch {
        mutations: vec![Mutation::Update {
            shift: shift.clone(),
            expected_version,
        }],
        events: events_of(shift, kinds, at),
    })
}

/// Checks and applies one binding to a working copy of `shift`. Returns the
/// events it produces, none when the resource was already bound there.
fn bind_slot<D, T>(
    validator: &AssignmentValidator<'_, D>,
    overlay: &mut Overlay<'_, T>,
    shift: &mut Shift,
    slot: &SlotTarget,
    resource_id: &ResourceId,
) -> Result<Vec<EventKind>, EngineError>
where
    D: ResourceDirectory + ?Sized,
    T: StoreTx + ?Sized,
{
    if !shift.has_slot(slot) {
        return Err(Rejection::validation(
            "binding.unknown_slot",
            format!("shift {} has no slot {slot}", shift.id),
        )
        .into());
    }
    if resource_id.0.trim().is_empty() {
        return Err(Rejection::validation(
            "binding.blank_resource",
            format!("resource id for slot {slot} must not be empty"),
        )
        .into());
    }

    let previous = shift.bound(slot).cloned();
    if previous.as_ref() == Some(resource_id) {
        return Ok(Vec::new());
    }

    let resource = ResourceRef {
        kind: slot.resource_kind(),
        id: resource_id.clone(),
    };
    if let Some(other) = shift.slot_holding(&resource, slot) {
        return Err(Rejection::validation(
            "binding.duplicate_resource",
            format!("{resource} already fills slot {other} on shift {}", shift.id),
        )
        .into());
    }

    validator.check_role_capability(&shift.company_id, slot, resource_id)?;
    validator.check_overlap(
        overlay,
        &shift.company_id,
        &resource,
        &shift.window,
        Some(&shift.id),
    )?;

    shift.bind(slot, Some(resource_id.clone()));
    let mut kinds = Vec::new();
    if let Some(previous) = previous {
        kinds.push(EventKind::ResourceUnassigned {
            slot: slot.clone(),
            resource: ResourceRef {
                kind: slot.resource_kind(),
                id: previous,
            },
        });
    }
    kinds.push(EventKind::ResourceAssigned {
        slot: slot.clone(),
        resource,
    });
    Ok(kinds)
}

fn bind_all<D, T>(
    validator: &AssignmentValidator<'_, D>,
    overlay: &mut Overlay<'_, T>,
    shift: &mut Shift,
    bindings: &[&ResourceBinding],
) -> Result<Vec<EventKind>, EngineError>
where
    D: ResourceDirectory + ?Sized,
    T: StoreTx + ?Sized,
{
    if bindings.is_empty() {
        return Ok(Vec::new());
    }
    ensure_mutable(shift)?;
    let mut seen = BTreeSet::new();
    let mut kinds = Vec::new();
    for binding in bindings {
        if !seen.insert(&binding.slot) {
            return Err(Rejection::validation(
                "bulk.duplicate_binding",
                format!("slot {} of shift {} is bound twice", binding.slot, shift.id),
            )
            .into());
        }
        kinds.extend(bind_slot(
            validator,
            overlay,
            shift,
            &binding.slot,
            &binding.resource_id,
        )?);
    }
    Ok(kinds)
}

pub struct SchedulingEngine<S, D> {
    store: S,
    directory: D,
    staffing: StaffingPolicy,
}

impl<S: ShiftStore, D: ResourceDirectory> SchedulingEngine<S, D> {
    pub fn new(store: S, directory: D, staffing: StaffingPolicy) -> Self {
        Self {
            store,
            directory,
            staffing,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resource picker backing `list_eligible`.
    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn staffing(&self) -> &StaffingPolicy {
        &self.staffing
    }

    pub fn create_shift(&self, draft: ShiftDraft) -> Result<Shift, EngineError> {
        let result = self.create_shift_inner(draft);
        match &result {
            Ok(shift) => info!(
                shift_id = %shift.id,
                company_id = %shift.company_id,
                status = %shift.status,
                window = %shift.window,
                "shift created"
            ),
            Err(err) => match err.rejection() {
                Some(rejection) => debug!(
                    command = "create_shift",
                    kind = %rejection.kind(),
                    reason = %rejection,
                    "command rejected"
                ),
                None => warn!(command = "create_shift", error = %err, "command failed"),
            },
        }
        result
    }

    fn create_shift_inner(&self, draft: ShiftDraft) -> Result<Shift, EngineError> {
        reject_on_errors(&draft.validate())?;
        let parent = draft.parent().ok_or_else(|| {
            Rejection::validation(
                "shift.parent.missing",
                format!("{} shift has no parent entity", draft.family),
            )
        })?;
        let at = Utc::now();
        let validator = AssignmentValidator::new(&self.directory);

        self.store.transaction(|tx| -> Result<Shift, EngineError> {
            let mut overlay = Overlay::new(tx);
            let id = overlay.tx().allocate_shift_id()?;
            let shift = Shift {
                id,
                family: draft.family,
                parent,
                company_id: draft.company_id.clone(),
                window: draft.window,
                status: draft.initial_status(),
                role_slots: draft.role_slots.clone(),
                locomotive_id: draft.locomotive_id.clone(),
                cost_center_id: draft.cost_center_id.clone(),
                type_of_operation_id: draft.type_of_operation_id.clone(),
                version: 1,
                created_at: at,
                updated_at: at,
            };

            for (slot, resource) in shift.assigned_resources() {
                validator.check_role_capability(&shift.company_id, &slot, &resource.id)?;
                validator.check_overlap(
                    &mut overlay,
                    &shift.company_id,
                    &resource,
                    &shift.window,
                    None,
                )?;
            }

            let event = Event::new(
                &shift.id,
                &shift.company_id,
                shift.version,
                at,
                EventKind::ShiftCreated {
                    status: shift.status,
                },
            );
            overlay.tx().commit(CommitBatch {
                mutations: vec![Mutation::Insert(shift.clone())],
                events: vec![event],
            })?;
            Ok(shift)
        })
    }

    pub fn assign_resource(
        &self,
        shift_id: &ShiftId,
        slot: &SlotTarget,
        resource_id: &ResourceId,
        expected_version: u64,
    ) -> Result<Shift, EngineError> {
        let at = Utc::now();
        let validator = AssignmentValidator::new(&self.directory);
        let result = self.store.transaction(|tx| -> Result<Shift, EngineError> {
            let mut overlay = Overlay::new(tx);
            let mut shift = load_existing(overlay.tx(), shift_id)?;
            ensure_mutable(&shift)?;
            ensure_version(&shift, expected_version)?;

            let kinds = bind_slot(&validator, &mut overlay, &mut shift, slot, resource_id)?;
            if kinds.is_empty() {
                return Ok(shift);
            }
            shift.touch(at);
            commit_update(overlay.tx(), &shift, expected_version, kinds, at)?;
            Ok(shift)
        });

        log_failure("assign_resource", shift_id, &result);
        if let Ok(shift) = &result {
            info!(
                shift_id = %shift.id,
                company_id = %shift.company_id,
                version = shift.version,
                slot = %slot,
                resource = %resource_id,
                "resource assigned"
            );
        }
        result
    }

    /// Clearing an already empty slot returns the shift unchanged, whatever
    /// `expected_version` says.
    pub fn unassign_resource(
        &self,
        shift_id: &ShiftId,
        slot: &SlotTarget,
        expected_version: u64,
    ) -> Result<Shift, EngineError> {
        let at = Utc::now();
        let result = self.store.transaction(|tx| -> Result<Shift, EngineError> {
            let mut shift = load_existing(tx, shift_id)?;
            ensure_mutable(&shift)?;
            if !shift.has_slot(slot) {
                return Err(Rejection::validation(
                    "binding.unknown_slot",
                    format!("shift {} has no slot {slot}", shift.id),
                )
                .into());
            }
            let Some(previous) = shift.bound(slot).cloned() else {
                return Ok(shift);
            };
            ensure_version(&shift, expected_version)?;

            shift.bind(slot, None);
            shift.touch(at);
            let kinds = vec![EventKind::ResourceUnassigned {
                slot: slot.clone(),
                resource: ResourceRef {
                    kind: slot.resource_kind(),
                    id: previous,
                },
            }];
            commit_update(tx, &shift, expected_version, kinds, at)?;
            Ok(shift)
        });

        log_failure("unassign_resource", shift_id, &result);
        if let Ok(shift) = &result {
            info!(
                shift_id = %shift.id,
                company_id = %shift.company_id,
                version = shift.version,
                slot = %slot,
                "slot cleared"
            );
        }
        result
    }

    /// Calendar drag-and-drop: re-times the shift without touching its
    /// status or bindings.
    pub fn move_shift(
        &self,
        shift_id: &ShiftId,
        new_window: ShiftWindow,
        expected_version: u64,
    ) -> Result<Shift, EngineError> {
        let at = Utc::now();
        let validator = AssignmentValidator::new(&self.directory);
        let result = self.store.transaction(|tx| -> Result<Shift, EngineError> {
            let mut overlay = Overlay::new(tx);
            let mut shift = load_existing(overlay.tx(), shift_id)?;
            ensure_mutable(&shift)?;
            ensure_version(&shift, expected_version)?;
            if !new_window.is_well_formed() {
                return Err(Rejection::validation(
                    "shift.window.malformed",
                    format!("window {new_window} has no duration"),
                )
                .into());
            }
            if new_window == shift.window {
                return Ok(shift);
            }

            validator.check_move(&mut overlay, &shift, &new_window)?;
            let from = shift.window;
            shift.window = new_window;
            shift.touch(at);
            let kinds = vec![EventKind::ShiftMoved {
                from,
                to: new_window,
            }];
            commit_update(overlay.tx(), &shift, expected_version, kinds, at)?;
            Ok(shift)
        });

        log_failure("move_shift", shift_id, &result);
        if let Ok(shift) = &result {
            info!(
                shift_id = %shift.id,
                company_id = %shift.company_id,
                version = shift.version,
                window = %shift.window,
                "shift moved"
            );
        }
        result
    }

    pub fn transition_shift(
        &self,
        shift_id: &ShiftId,
        target: ShiftStatus,
        expected_version: u64,
    ) -> Result<Shift, EngineError> {
        let at = Utc::now();
        let validator = AssignmentValidator::new(&self.directory);
        let result = self.store.transaction(|tx| -> Result<Shift, EngineError> {
            let mut overlay = Overlay::new(tx);
            let mut shift = load_existing(overlay.tx(), shift_id)?;
            if shift.status == ShiftStatus::Billed {
                return Err(terminal(&shift).into());
            }
            ensure_version(&shift, expected_version)?;

            let change = transition(&mut shift, target, &self.staffing, at)?;
            if change.reactivates() {
                validator.check_move(&mut overlay, &shift, &shift.window)?;
            }
            let kinds = vec![EventKind::StatusChanged {
                from: change.from,
                to: change.to,
            }];
            commit_update(overlay.tx(), &shift, expected_version, kinds, at)?;
            Ok(shift)
        });

        log_failure("transition_shift", shift_id, &result);
        if let Ok(shift) = &result {
            info!(
                shift_id = %shift.id,
                company_id = %shift.company_id,
                version = shift.version,
                status = %shift.status,
                "shift transitioned"
            );
        }
        result
    }

    /// All-or-nothing status change of a shift selection.
    pub fn bulk_transition(
        &self,
        shift_ids: &[ShiftId],
        target: ShiftStatus,
    ) -> Result<BulkResult, EngineError> {
        self.run_bulk("bulk_transition", shift_ids, &[], target)
    }

    /// Applies `bindings`, then moves every selected shift to `target`. One
    /// failed binding or transition rolls back the whole selection.
    pub fn bulk_assign_and_transition(
        &self,
        shift_ids: &[ShiftId],
        bindings: &[ResourceBinding],
        target: ShiftStatus,
    ) -> Result<BulkResult, EngineError> {
        self.run_bulk("bulk_assign_and_transition", shift_ids, bindings, target)
    }

    fn run_bulk(
        &self,
        command: &'static str,
        shift_ids: &[ShiftId],
        bindings: &[ResourceBinding],
        target: ShiftStatus,
    ) -> Result<BulkResult, EngineError> {
        let ids = dedupe_shift_ids(shift_ids);
        let at = Utc::now();
        let validator = AssignmentValidator::new(&self.directory);

        let result = self.store.transaction(|tx| -> Result<BulkResult, EngineError> {
            let mut overlay = Overlay::new(tx);
            let mut order = ids.clone();
            let mut failures: BTreeMap<ShiftId, Rejection> = BTreeMap::new();
            for binding in bindings {
                if !order.contains(&binding.shift_id) {
                    order.push(binding.shift_id.clone());
                    failures.insert(
                        binding.shift_id.clone(),
                        Rejection::validation(
                            "bulk.binding_outside_selection",
                            format!("binding targets unselected shift {}", binding.shift_id),
                        ),
                    );
                }
            }

            let mut originals: BTreeMap<ShiftId, (ShiftStatus, u64)> = BTreeMap::new();
            let mut working: Vec<Shift> = Vec::new();
            let mut pending: Vec<Vec<EventKind>> = Vec::new();
            for id in &ids {
                let Some(mut shift) = overlay.tx().load(id)? else {
                    failures.insert(
                        id.clone(),
                        Rejection::ShiftNotFound {
                            shift_id: id.clone(),
                        },
                    );
                    continue;
                };
                originals.insert(id.clone(), (shift.status, shift.version));

                let own: Vec<&ResourceBinding> =
                    bindings.iter().filter(|b| &b.shift_id == id).collect();
                match split_rejection(bind_all(&validator, &mut overlay, &mut shift, &own))? {
                    Ok(kinds) => {
                        if !kinds.is_empty() {
                            overlay.stage(shift.clone());
                        }
                        working.push(shift);
                        pending.push(kinds);
                    }
                    Err(rejection) => {
                        failures.insert(id.clone(), rejection);
                    }
                }
            }

            let mut fault: Option<EngineError> = None;
            let plan = plan_bulk_transition(&working, target, &self.staffing, |shift, change| {
                if !change.reactivates() {
                    return Ok(());
                }
                let mut reopened = shift.clone();
                reopened.status = change.to;
                match split_rejection(validator.check_move(
                    &mut overlay,
                    &reopened,
                    &reopened.window,
                )) {
                    Ok(Ok(())) => {
                        overlay.stage(reopened);
                        Ok(())
                    }
                    Ok(Err(rejection)) => Err(rejection),
                    Err(err) => {
                        fault = Some(err);
                        Err(Rejection::validation(
                            "bulk.aborted",
                            "validation aborted by a storage failure",
                        ))
                    }
                }
            });
            if let Some(err) = fault {
                return Err(err);
            }

            for (shift, change) in working.iter().zip(&plan) {
                if let Err(rejection) = change {
                    failures.insert(shift.id.clone(), rejection.clone());
                }
            }

            let committed = failures.is_empty() && apply_bulk_plan(&mut working, &plan, at);
            if committed {
                let mut batch = CommitBatch::default();
                for ((shift, change), kinds) in working.iter().zip(&plan).zip(pending) {
                    let Ok(change) = change else { continue };
                    let mut kinds = kinds;
                    kinds.push(EventKind::StatusChanged {
                        from: change.from,
                        to: change.to,
                    });
                    batch.events.extend(events_of(shift, kinds, at));
                    batch.mutations.push(Mutation::Update {
                        shift: shift.clone(),
                        expected_version: shift.version - 1,
                    });
                }
                overlay.tx().commit(batch)?;
            }

            let current: BTreeMap<&ShiftId, (ShiftStatus, u64)> = if committed {
                working
                    .iter()
                    .map(|shift| (&shift.id, (shift.status, shift.version)))
                    .collect()
            } else {
                originals.iter().map(|(id, value)| (id, *value)).collect()
            };
            let outcomes = order
                .iter()
                .filter_map(|id| {
                    let outcome = match failures.remove(id) {
                        Some(rejection) => ItemOutcome::Failed { rejection },
                        None => {
                            let (status, version) = *current.get(id)?;
                            if committed {
                                ItemOutcome::Applied { status, version }
                            } else {
                                ItemOutcome::Valid { status, version }
                            }
                        }
                    };
                    Some(BulkOutcome {
                        shift_id: id.clone(),
                        outcome,
                    })
                })
                .collect();
            Ok(BulkResult {
                committed,
                outcomes,
            })
        });

        match &result {
            Ok(bulk) => info!(
                command,
                target = %target,
                committed = bulk.committed,
                shifts = bulk.outcomes.len(),
                failed = bulk.failures().count(),
                "bulk command finished"
            ),
            Err(err) => warn!(command, error = %err, "bulk command failed"),
        }
        result
    }

    /// Deletes every selected shift or none of them.
    pub fn delete_shifts(&self, shift_ids: &[ShiftId]) -> Result<BulkResult, EngineError> {
        let ids = dedupe_shift_ids(shift_ids);
        let at = Utc::now();
        let result = self.store.transaction(|tx| -> Result<BulkResult, EngineError> {
            let mut checked: Vec<Result<Shift, Rejection>> = Vec::with_capacity(ids.len());
            for id in &ids {
                let item = match tx.load(id)? {
                    None => Err(Rejection::ShiftNotFound {
                        shift_id: id.clone(),
                    }),
                    Some(shift) if shift.status.is_terminal() => Err(terminal(&shift)),
                    Some(shift) => Ok(shift),
                };
                checked.push(item);
            }

            let committed = checked.iter().all(Result::is_ok);
            if committed {
                let mut batch = CommitBatch::default();
                for shift in checked.iter().flatten() {
                    batch.mutations.push(Mutation::Delete {
                        shift_id: shift.id.clone(),
                        expected_version: shift.version,
                    });
                    batch.events.push(Event::new(
                        &shift.id,
                        &shift.company_id,
                        shift.version + 1,
                        at,
                        EventKind::ShiftDeleted,
                    ));
                }
                tx.commit(batch)?;
            }

            let outcomes = ids
                .iter()
                .zip(checked)
                .map(|(id, item)| BulkOutcome {
                    shift_id: id.clone(),
                    outcome: match item {
                        Err(rejection) => ItemOutcome::Failed { rejection },
                        Ok(_) if committed => ItemOutcome::Deleted,
                        Ok(shift) => ItemOutcome::Valid {
                            status: shift.status,
                            version: shift.version,
                        },
                    },
                })
                .collect();
            Ok(BulkResult {
                committed,
                outcomes,
            })
        });

        match &result {
            Ok(bulk) => info!(
                command = "delete_shifts",
                committed = bulk.committed,
                shifts = bulk.outcomes.len(),
                failed = bulk.failures().count(),
                "bulk command finished"
            ),
            Err(err) => warn!(command = "delete_shifts", error = %err, "bulk command failed"),
        }
        result
    }

    pub fn shift(&self, shift_id: &ShiftId) -> Result<Shift, EngineError> {
        self.store.load(shift_id)?.ok_or_else(|| {
            EngineError::from(Rejection::ShiftNotFound {
                shift_id: shift_id.clone(),
            })
        })
    }

    pub fn list_shifts(&self, query: &ShiftQuery) -> Result<Vec<Shift>, EngineError> {
        Ok(self.store.list_shifts(query)?)
    }

    pub fn resource_schedule(
        &self,
        company_id: &CompanyId,
        resource: &ResourceRef,
    ) -> Result<Vec<ResourceBooking>, EngineError> {
        Ok(self.store.resource_schedule(company_id, resource)?)
    }

    pub fn events_for(&self, shift_id: &ShiftId) -> Result<Vec<Event>, EngineError> {
        Ok(self.store.events_for(shift_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::persistence::SqliteShiftStore;
    use crate::store::MemoryShiftStore;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use shift_core::types::{Resource, ResourceKind, RoleId, RoleSlot};

    type MemoryEngine = SchedulingEngine<MemoryShiftStore, InMemoryDirectory>;

    fn employee(company: &str, id: &str, roles: &[&str]) -> Resource {
        Resource {
            id: ResourceId::new(id),
            kind: ResourceKind::Employee,
            company_id: CompanyId::new(company),
            name: format!("employee {id}"),
            capability_tags: roles.iter().map(|r| RoleId::new(*r)).collect(),
            proximities: Vec::new(),
        }
    }

    fn locomotive(id: &str) -> Resource {
        Resource {
            id: ResourceId::new(id),
            kind: ResourceKind::Locomotive,
            company_id: CompanyId::new("1"),
            name: format!("loco {id}"),
            capability_tags: Default::default(),
            proximities: Vec::new(),
        }
    }

    fn mk_directory() -> InMemoryDirectory {
        let mut directory = InMemoryDirectory::new();
        for resource in [
            employee("1", "42", &["DRIVER"]),
            employee("1", "7", &["DRIVER"]),
            employee("1", "8", &["DRIVER", "GUARD"]),
            employee("1", "9", &["GUARD"]),
            employee("2", "42", &["DRIVER"]),
            locomotive("L1"),
        ] {
            directory.insert(resource).expect("insert resource");
        }
        directory
    }

    fn mk_engine() -> MemoryEngine {
        SchedulingEngine::new(
            MemoryShiftStore::new(),
            mk_directory(),
            StaffingPolicy::default(),
        )
    }

    fn window(date: &str, start: &str, end: &str) -> ShiftWindow {
        ShiftWindow::parse(date, start, end).expect("window")
    }

    fn draft(company: &str, window: ShiftWindow, slots: Vec<RoleSlot>) -> ShiftDraft {
        ShiftDraft::regular(company, window, "C1", "P1").with_slots(slots)
    }

    fn create<S: ShiftStore>(
        engine: &SchedulingEngine<S, InMemoryDirectory>,
        window: ShiftWindow,
        slots: Vec<RoleSlot>,
    ) -> Shift {
        engine
            .create_shift(draft("1", window, slots))
            .expect("create shift")
    }

    fn advance(engine: &MemoryEngine, shift: Shift, path: &[ShiftStatus]) -> Shift {
        let mut current = shift;
        for status in path {
            current = engine
                .transition_shift(&current.id, *status, current.version)
                .expect("advance");
        }
        current
    }

    fn reject(engine: &MemoryEngine, shift: Shift) -> Shift {
        use ShiftStatus::*;
        advance(engine, shift, &[Planned, Fixed, Submitted, Rejected])
    }

    fn driver() -> SlotTarget {
        SlotTarget::role("DRIVER")
    }

    fn conflicting_id(err: &EngineError) -> Option<ShiftId> {
        err.rejection()
            .and_then(Rejection::conflict)
            .map(|detail| detail.conflicting_shift_id.clone())
    }

    fn scenario_a_b<S: ShiftStore>(engine: &SchedulingEngine<S, InMemoryDirectory>) {
        let a = create(
            engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        assert_eq!(a.status, ShiftStatus::Open);
        let a = engine
            .assign_resource(&a.id, &driver(), &ResourceId::new("42"), a.version)
            .expect("assign driver to A");
        assert_eq!(a.version, 2);

        let b = create(
            engine,
            window("2024-06-10", "14:00", "20:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let err = engine
            .assign_resource(&b.id, &driver(), &ResourceId::new("42"), b.version)
            .expect_err("42 is busy until 16:00");
        let detail = err
            .rejection()
            .and_then(Rejection::conflict)
            .expect("conflict detail");
        assert_eq!(detail.conflicting_shift_id, a.id);
        assert_eq!(
            detail.conflicting_window,
            window("2024-06-10", "08:00", "16:00")
        );

        let b = engine.shift(&b.id).expect("reload B");
        assert_eq!(b.version, 1);
        assert!(b.role_slots[0].is_open());
    }

    #[test]
    fn overlapping_driver_assignment_reports_conflict() {
        scenario_a_b(&mk_engine());
    }

    #[test]
    fn overlapping_driver_assignment_reports_conflict_on_sqlite() {
        let store = SqliteShiftStore::open_in_memory().expect("open sqlite");
        store.migrate().expect("migrate");
        let engine = SchedulingEngine::new(store, mk_directory(), StaffingPolicy::default());
        scenario_a_b(&engine);
    }

    #[test]
    fn planning_waits_for_driver() {
        let engine = mk_engine();
        let c = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let err = engine
            .transition_shift(&c.id, ShiftStatus::Planned, c.version)
            .expect_err("driver missing");
        assert_eq!(err.kind(), ErrorKind::StaffingIncomplete);

        let c = engine
            .assign_resource(&c.id, &driver(), &ResourceId::new("7"), c.version)
            .expect("assign 7");
        let c = engine
            .transition_shift(&c.id, ShiftStatus::Planned, c.version)
            .expect("staffed");
        assert_eq!(c.status, ShiftStatus::Planned);
        assert_eq!(c.version, 3);
    }

    #[test]
    fn unassign_twice_is_a_no_op() {
        let engine = mk_engine();
        let shift = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::assigned("DRIVER", "42")],
        );
        let cleared = engine
            .unassign_resource(&shift.id, &driver(), 1)
            .expect("first unassign");
        assert!(cleared.role_slots[0].is_open());
        assert_eq!(cleared.version, 2);

        let again = engine
            .unassign_resource(&shift.id, &driver(), 1)
            .expect("second unassign");
        assert_eq!(again, cleared);

        let tags: Vec<&str> = engine
            .events_for(&shift.id)
            .expect("events")
            .iter()
            .map(|event| event.kind.tag())
            .collect();
        assert_eq!(tags, vec!["shift_created", "resource_unassigned"]);
    }

    #[test]
    fn stale_version_is_rejected() {
        let engine = mk_engine();
        let shift = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let err = engine
            .assign_resource(&shift.id, &driver(), &ResourceId::new("42"), 5)
            .expect_err("stale");
        assert!(matches!(
            err,
            EngineError::Rejected(Rejection::StaleVersion {
                expected: 5,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn concurrent_assigns_with_same_version_exactly_one_wins() {
        let engine = mk_engine();
        let shift = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let engine_ref = &engine;
        let shift_id = &shift.id;
        let slot = driver();
        let slot_ref = &slot;

        let results: Vec<Result<Shift, EngineError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ["42", "7"]
                .into_iter()
                .map(|employee| {
                    scope.spawn(move || {
                        engine_ref.assign_resource(
                            shift_id,
                            slot_ref,
                            &ResourceId::new(employee),
                            1,
                        )
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread"))
                .collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results
            .iter()
            .find_map(|r| r.as_ref().err())
            .expect("one failure");
        assert_eq!(loser.kind(), ErrorKind::StaleVersion);
        assert_eq!(engine.shift(&shift.id).expect("reload").version, 2);
    }

    #[test]
    fn concurrent_assigns_of_one_resource_to_overlapping_shifts() {
        let engine = mk_engine();
        let a = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let b = create(
            &engine,
            window("2024-06-10", "12:00", "20:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let engine_ref = &engine;
        let slot = driver();
        let slot_ref = &slot;
        let ids = [a.id.clone(), b.id.clone()];

        let results: Vec<Result<Shift, EngineError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ids
                .iter()
                .map(|id| {
                    scope.spawn(move || {
                        engine_ref.assign_resource(id, slot_ref, &ResourceId::new("42"), 1)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread"))
                .collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results
            .iter()
            .find_map(|r| r.as_ref().err())
            .expect("one failure");
        assert_eq!(loser.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn move_checks_bound_resources_against_new_window() {
        let engine = mk_engine();
        let a = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::assigned("DRIVER", "42")],
        );
        let b = create(
            &engine,
            window("2024-06-10", "18:00", "22:00"),
            vec![RoleSlot::assigned("DRIVER", "42")],
        );

        let err = engine
            .move_shift(&b.id, window("2024-06-10", "15:00", "19:00"), b.version)
            .expect_err("overlaps A");
        assert_eq!(conflicting_id(&err), Some(a.id.clone()));

        let moved = engine
            .move_shift(&b.id, window("2024-06-10", "16:00", "20:00"), b.version)
            .expect("adjacent is fine");
        assert_eq!(moved.version, 2);
        assert_eq!(moved.window, window("2024-06-10", "16:00", "20:00"));
        assert_eq!(moved.status, ShiftStatus::Open);

        let same = engine
            .move_shift(&b.id, moved.window, moved.version)
            .expect("own window is no self-conflict");
        assert_eq!(same.version, 2);

        let err = engine
            .move_shift(&b.id, window("2024-06-10", "20:00", "20:00"), moved.version)
            .expect_err("empty window");
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn night_shift_blocks_next_morning() {
        let engine = mk_engine();
        let night = create(
            &engine,
            window("2024-06-10", "22:00", "06:00"),
            vec![RoleSlot::assigned("DRIVER", "42")],
        );
        let morning = create(
            &engine,
            window("2024-06-11", "08:00", "12:00"),
            vec![RoleSlot::assigned("DRIVER", "42")],
        );
        let err = engine
            .move_shift(
                &morning.id,
                window("2024-06-11", "05:00", "09:00"),
                morning.version,
            )
            .expect_err("night shift runs until 06:00");
        assert_eq!(conflicting_id(&err), Some(night.id));
    }

    #[test]
    fn create_checks_preassigned_slots() {
        let engine = mk_engine();
        let day = window("2024-06-10", "08:00", "16:00");

        let err = engine
            .create_shift(draft("1", day, vec![RoleSlot::assigned("DRIVER", "9")]))
            .expect_err("9 is a guard");
        assert_eq!(err.kind(), ErrorKind::IncapableResource);

        let err = engine
            .create_shift(draft("1", day, vec![RoleSlot::assigned("DRIVER", "404")]))
            .expect_err("unknown employee");
        assert_eq!(err.kind(), ErrorKind::IncapableResource);

        let err = engine
            .create_shift(draft(
                "1",
                window("2024-06-10", "08:00", "08:00"),
                Vec::new(),
            ))
            .expect_err("empty window");
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let mut offered = draft("1", day, vec![RoleSlot::assigned("DRIVER", "42")]);
        offered.offer = true;
        let offered = engine.create_shift(offered).expect("offer");
        assert_eq!(offered.status, ShiftStatus::Offer);
        assert_eq!(offered.id, ShiftId::new("SH-000001"));

        let err = engine
            .create_shift(draft(
                "1",
                window("2024-06-10", "12:00", "14:00"),
                vec![RoleSlot::assigned("DRIVER", "42")],
            ))
            .expect_err("offer still reserves 42");
        assert_eq!(conflicting_id(&err), Some(offered.id));
    }

    #[test]
    fn bookings_are_scoped_per_company() {
        let engine = mk_engine();
        let day = window("2024-06-10", "08:00", "16:00");
        create(&engine, day, vec![RoleSlot::assigned("DRIVER", "42")]);
        engine
            .create_shift(draft("2", day, vec![RoleSlot::assigned("DRIVER", "42")]))
            .expect("company 2 has its own employee 42");
    }

    #[test]
    fn rebinding_and_duplicate_resources() {
        let engine = mk_engine();
        let shift = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::assigned("DRIVER", "8"), RoleSlot::open("GUARD")],
        );

        let same = engine
            .assign_resource(&shift.id, &driver(), &ResourceId::new("8"), 1)
            .expect("already bound");
        assert_eq!(same.version, 1);

        let err = engine
            .assign_resource(&shift.id, &SlotTarget::role("GUARD"), &ResourceId::new("8"), 1)
            .expect_err("8 already drives");
        assert_eq!(
            err.rejection(),
            Some(&Rejection::validation(
                "binding.duplicate_resource",
                format!("employee:8 already fills slot DRIVER on shift {}", shift.id),
            ))
        );

        let rebound = engine
            .assign_resource(&shift.id, &driver(), &ResourceId::new("7"), 1)
            .expect("rebind");
        assert_eq!(rebound.bound(&driver()), Some(&ResourceId::new("7")));
        let tags: Vec<String> = engine
            .events_for(&shift.id)
            .expect("events")
            .iter()
            .map(|event| event.id.0.clone())
            .collect();
        assert_eq!(
            tags,
            vec![
                format!("{}@v1:shift_created", shift.id),
                format!("{}@v2:resource_unassigned:DRIVER", shift.id),
                format!("{}@v2:resource_assigned:DRIVER", shift.id),
            ]
        );

        let err = engine
            .assign_resource(&shift.id, &SlotTarget::role("COOK"), &ResourceId::new("7"), 2)
            .expect_err("no cook slot");
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn locomotive_slot_accepts_only_locomotives() {
        let engine = mk_engine();
        let a = create(&engine, window("2024-06-10", "08:00", "16:00"), Vec::new());
        let b = create(&engine, window("2024-06-10", "10:00", "12:00"), Vec::new());

        let err = engine
            .assign_resource(&a.id, &SlotTarget::Locomotive, &ResourceId::new("42"), 1)
            .expect_err("42 is an employee");
        assert_eq!(err.kind(), ErrorKind::IncapableResource);

        engine
            .assign_resource(&a.id, &SlotTarget::Locomotive, &ResourceId::new("L1"), 1)
            .expect("locomotive");
        let err = engine
            .assign_resource(&b.id, &SlotTarget::Locomotive, &ResourceId::new("L1"), 1)
            .expect_err("L1 is out on A");
        assert_eq!(conflicting_id(&err), Some(a.id));
    }

    #[test]
    fn terminal_shifts_are_frozen_and_release_resources() {
        let engine = mk_engine();
        let day = window("2024-06-10", "08:00", "16:00");
        let rejected = reject(
            &engine,
            create(&engine, day, vec![RoleSlot::assigned("DRIVER", "42")]),
        );
        assert_eq!(rejected.status, ShiftStatus::Rejected);

        let err = engine
            .assign_resource(&rejected.id, &driver(), &ResourceId::new("7"), rejected.version)
            .expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::ShiftTerminal);
        let err = engine
            .unassign_resource(&rejected.id, &driver(), rejected.version)
            .expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::ShiftTerminal);
        let err = engine
            .move_shift(&rejected.id, window("2024-06-11", "08:00", "16:00"), rejected.version)
            .expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::ShiftTerminal);

        create(&engine, day, vec![RoleSlot::assigned("DRIVER", "42")]);
    }

    #[test]
    fn billed_shift_rejects_every_transition() {
        use ShiftStatus::*;
        let engine = mk_engine();
        let shift = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::assigned("DRIVER", "42")],
        );
        let billed = advance(&engine, shift, &[Planned, Fixed, Submitted, Approved, Billed]);
        let err = engine
            .transition_shift(&billed.id, Open, 1)
            .expect_err("billed, even with a stale version");
        assert_eq!(err.kind(), ErrorKind::ShiftTerminal);
    }

    #[test]
    fn reopening_rejected_shift_rechecks_its_bookings() {
        let engine = mk_engine();
        let day = window("2024-06-10", "08:00", "16:00");
        let rejected = reject(
            &engine,
            create(&engine, day, vec![RoleSlot::assigned("DRIVER", "42")]),
        );
        let replacement = create(&engine, day, vec![RoleSlot::assigned("DRIVER", "42")]);

        let err = engine
            .transition_shift(&rejected.id, ShiftStatus::Open, rejected.version)
            .expect_err("42 now works the replacement");
        assert_eq!(conflicting_id(&err), Some(replacement.id.clone()));

        let bulk = engine
            .bulk_transition(&[rejected.id.clone()], ShiftStatus::Open)
            .expect("bulk");
        assert!(!bulk.committed);
        assert!(matches!(
            bulk.outcome_for(&rejected.id),
            Some(ItemOutcome::Failed {
                rejection: Rejection::Conflict { .. }
            })
        ));

        engine
            .delete_shifts(&[replacement.id])
            .expect("delete replacement");
        let reopened = engine
            .transition_shift(&rejected.id, ShiftStatus::Open, rejected.version)
            .expect("42 is free again");
        assert_eq!(reopened.status, ShiftStatus::Open);
    }

    #[test]
    fn bulk_transition_keeps_everyone_when_one_fails() {
        let engine = mk_engine();
        let mut planned = Vec::new();
        for (date, employee) in [("2024-06-10", "42"), ("2024-06-11", "7"), ("2024-06-12", "8")] {
            let shift = create(
                &engine,
                window(date, "08:00", "16:00"),
                vec![RoleSlot::assigned("DRIVER", employee)],
            );
            planned.push(advance(&engine, shift, &[ShiftStatus::Planned]));
        }
        let s2 = engine
            .unassign_resource(&planned[1].id, &driver(), planned[1].version)
            .expect("unassign on planned shift");

        let ids: Vec<ShiftId> = planned.iter().map(|s| s.id.clone()).collect();
        let result = engine
            .bulk_transition(&ids, ShiftStatus::Fixed)
            .expect("bulk");
        assert!(!result.committed);
        assert!(matches!(
            result.outcome_for(&s2.id),
            Some(ItemOutcome::Failed {
                rejection: Rejection::StaffingIncomplete { .. }
            })
        ));
        for shift in [&planned[0], &planned[2]] {
            assert_eq!(
                result.outcome_for(&shift.id),
                Some(&ItemOutcome::Valid {
                    status: ShiftStatus::Planned,
                    version: 2
                })
            );
            let stored = engine.shift(&shift.id).expect("reload");
            assert_eq!(stored.status, ShiftStatus::Planned);
            assert_eq!(stored.version, 2);
        }
    }

    #[test]
    fn bulk_transition_dedupes_and_reports_missing_shifts() {
        let engine = mk_engine();
        let shift = create(&engine, window("2024-06-10", "08:00", "16:00"), Vec::new());
        let ghost = ShiftId::new("SH-999999");
        let result = engine
            .bulk_transition(
                &[shift.id.clone(), ghost.clone(), shift.id.clone()],
                ShiftStatus::Offer,
            )
            .expect("bulk");
        assert_eq!(result.outcomes.len(), 2);
        assert!(!result.committed);
        assert!(matches!(
            result.outcome_for(&ghost),
            Some(ItemOutcome::Failed {
                rejection: Rejection::ShiftNotFound { .. }
            })
        ));

        let result = engine
            .bulk_transition(&[shift.id.clone(), shift.id.clone()], ShiftStatus::Offer)
            .expect("bulk");
        assert!(result.committed);
        assert_eq!(
            result.outcomes,
            vec![BulkOutcome {
                shift_id: shift.id.clone(),
                outcome: ItemOutcome::Applied {
                    status: ShiftStatus::Offer,
                    version: 2
                }
            }]
        );
    }

    #[test]
    fn bulk_assign_and_transition_commits_bindings_with_status() {
        let engine = mk_engine();
        let a = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let b = create(
            &engine,
            window("2024-06-11", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let bindings = vec![
            ResourceBinding {
                shift_id: a.id.clone(),
                slot: driver(),
                resource_id: ResourceId::new("42"),
            },
            ResourceBinding {
                shift_id: b.id.clone(),
                slot: driver(),
                resource_id: ResourceId::new("42"),
            },
        ];
        let result = engine
            .bulk_assign_and_transition(
                &[a.id.clone(), b.id.clone()],
                &bindings,
                ShiftStatus::Planned,
            )
            .expect("bulk");
        assert!(result.committed, "{result:?}");
        for id in [&a.id, &b.id] {
            let stored = engine.shift(id).expect("reload");
            assert_eq!(stored.status, ShiftStatus::Planned);
            assert_eq!(stored.version, 2);
            assert_eq!(stored.bound(&driver()), Some(&ResourceId::new("42")));
        }
        let events = engine.events_for(&a.id).expect("events");
        let ids: Vec<&str> = events.iter().map(|e| e.id.0.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                format!("{}@v1:shift_created", a.id),
                format!("{}@v2:resource_assigned:DRIVER", a.id),
                format!("{}@v2:status_changed", a.id),
            ]
        );
    }

    #[test]
    fn bulk_assign_rolls_back_bindings_when_transition_fails() {
        let engine = mk_engine();
        let a = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let b = create(
            &engine,
            window("2024-06-11", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER"), RoleSlot::open("GUARD")],
        );
        let bindings = vec![
            ResourceBinding {
                shift_id: a.id.clone(),
                slot: driver(),
                resource_id: ResourceId::new("42"),
            },
            ResourceBinding {
                shift_id: b.id.clone(),
                slot: driver(),
                resource_id: ResourceId::new("7"),
            },
        ];
        let result = engine
            .bulk_assign_and_transition(
                &[a.id.clone(), b.id.clone()],
                &bindings,
                ShiftStatus::Planned,
            )
            .expect("bulk");
        assert!(!result.committed);
        assert!(matches!(
            result.outcome_for(&a.id),
            Some(ItemOutcome::Valid {
                status: ShiftStatus::Open,
                version: 1
            })
        ));
        assert!(matches!(
            result.outcome_for(&b.id),
            Some(ItemOutcome::Failed {
                rejection: Rejection::StaffingIncomplete { .. }
            })
        ));
        assert!(engine.shift(&a.id).expect("reload").role_slots[0].is_open());
        assert_eq!(engine.events_for(&a.id).expect("events").len(), 1);
    }

    #[test]
    fn bulk_bindings_are_checked_against_each_other() {
        let engine = mk_engine();
        let a = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let b = create(
            &engine,
            window("2024-06-10", "12:00", "20:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let c = create(
            &engine,
            window("2024-06-12", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let bind = |shift: &Shift, employee: &str| ResourceBinding {
            shift_id: shift.id.clone(),
            slot: driver(),
            resource_id: ResourceId::new(employee),
        };

        let result = engine
            .bulk_assign_and_transition(
                &[a.id.clone(), b.id.clone()],
                &[bind(&a, "42"), bind(&b, "42"), bind(&c, "7")],
                ShiftStatus::Planned,
            )
            .expect("bulk");
        assert!(!result.committed);
        match result.outcome_for(&b.id) {
            Some(ItemOutcome::Failed { rejection }) => {
                assert_eq!(
                    rejection.conflict().map(|d| d.conflicting_shift_id.clone()),
                    Some(a.id.clone())
                );
            }
            other => panic!("expected conflict for B, got {other:?}"),
        }
        assert!(matches!(
            result.outcome_for(&c.id),
            Some(ItemOutcome::Failed {
                rejection: Rejection::Validation { .. }
            })
        ));
        assert_eq!(result.outcomes.len(), 3);
    }

    fn same_slot_bound_twice<S: ShiftStore>(engine: &SchedulingEngine<S, InMemoryDirectory>) {
        let a = create(
            engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::open("DRIVER")],
        );
        let bindings = vec![
            ResourceBinding {
                shift_id: a.id.clone(),
                slot: driver(),
                resource_id: ResourceId::new("42"),
            },
            ResourceBinding {
                shift_id: a.id.clone(),
                slot: driver(),
                resource_id: ResourceId::new("7"),
            },
        ];
        let result = engine
            .bulk_assign_and_transition(&[a.id.clone()], &bindings, ShiftStatus::Planned)
            .expect("duplicate binding is a rejection, not a storage failure");
        assert!(!result.committed);
        match result.outcome_for(&a.id) {
            Some(ItemOutcome::Failed {
                rejection: Rejection::Validation { code, .. },
            }) => assert_eq!(code, "bulk.duplicate_binding"),
            other => panic!("expected duplicate binding rejection, got {other:?}"),
        }

        let stored = engine.shift(&a.id).expect("reload");
        assert_eq!(stored.version, 1);
        assert!(stored.role_slots[0].is_open());
        assert_eq!(engine.events_for(&a.id).expect("events").len(), 1);
    }

    #[test]
    fn bulk_rejects_same_slot_bound_twice() {
        same_slot_bound_twice(&mk_engine());
    }

    #[test]
    fn bulk_rejects_same_slot_bound_twice_on_sqlite() {
        let store = SqliteShiftStore::open_in_memory().expect("open sqlite");
        store.migrate().expect("migrate");
        let engine = SchedulingEngine::new(store, mk_directory(), StaffingPolicy::default());
        same_slot_bound_twice(&engine);
    }

    #[test]
    fn delete_is_all_or_nothing() {
        let engine = mk_engine();
        let open = create(&engine, window("2024-06-10", "08:00", "16:00"), Vec::new());
        let rejected = reject(
            &engine,
            create(
                &engine,
                window("2024-06-11", "08:00", "16:00"),
                vec![RoleSlot::assigned("DRIVER", "42")],
            ),
        );

        let result = engine
            .delete_shifts(&[open.id.clone(), rejected.id.clone()])
            .expect("delete");
        assert!(!result.committed);
        assert!(matches!(
            result.outcome_for(&rejected.id),
            Some(ItemOutcome::Failed {
                rejection: Rejection::ShiftTerminal { .. }
            })
        ));
        assert!(matches!(
            result.outcome_for(&open.id),
            Some(ItemOutcome::Valid { .. })
        ));
        engine.shift(&open.id).expect("still there");

        let result = engine
            .delete_shifts(&[open.id.clone(), open.id.clone()])
            .expect("delete");
        assert!(result.committed);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcome_for(&open.id), Some(&ItemOutcome::Deleted));

        let err = engine.shift(&open.id).expect_err("gone");
        assert!(matches!(
            err,
            EngineError::Rejected(Rejection::ShiftNotFound { .. })
        ));
        let events = engine.events_for(&open.id).expect("events survive");
        assert_eq!(events.last().map(|e| e.kind.tag()), Some("shift_deleted"));
    }

    #[test]
    fn schedule_lists_active_bookings_in_order() {
        let engine = mk_engine();
        let late = create(
            &engine,
            window("2024-06-11", "08:00", "16:00"),
            vec![RoleSlot::assigned("DRIVER", "42")],
        );
        let early = create(
            &engine,
            window("2024-06-10", "08:00", "16:00"),
            vec![RoleSlot::assigned("DRIVER", "42")],
        );
        let schedule = engine
            .resource_schedule(&CompanyId::new("1"), &ResourceRef::employee("42"))
            .expect("schedule");
        let ids: Vec<&ShiftId> = schedule.iter().map(|b| &b.shift_id).collect();
        assert_eq!(ids, vec![&early.id, &late.id]);

        let shifts = engine
            .list_shifts(&ShiftQuery::company("1"))
            .expect("list");
        assert_eq!(shifts.len(), 2);
    }

    #[test]
    fn store_errors_map_to_kinds() {
        let stale = EngineError::from(StoreError::StaleVersion {
            shift_id: ShiftId::new("S"),
            expected: 1,
            actual: 2,
        });
        assert_eq!(stale.kind(), ErrorKind::StaleVersion);

        let down = EngineError::from(StoreError::Poisoned);
        assert_eq!(down.kind(), ErrorKind::StorageFailure);
        assert!(down.kind().is_transient());

        let directory = EngineError::from(DirectoryError::Unavailable("timeout".to_string()));
        assert_eq!(directory.kind(), ErrorKind::StorageFailure);
    }

    fn random_window(rng: &mut StdRng) -> ShiftWindow {
        let day = rng.gen_range(10..=12);
        let start_half_hours: u32 = rng.gen_range(0..48);
        let length_half_hours: u32 = rng.gen_range(2..=24);
        let end_half_hours = (start_half_hours + length_half_hours) % 48;
        let fmt = |half: u32| format!("{:02}:{:02}", half / 2, (half % 2) * 30);
        window(
            &format!("2024-06-{day}"),
            &fmt(start_half_hours),
            &fmt(end_half_hours),
        )
    }

    fn assert_no_double_booking(engine: &MemoryEngine) {
        let shifts = engine
            .list_shifts(&ShiftQuery::company("1"))
            .expect("list");
        let bookings: Vec<ResourceBooking> = shifts.iter().flat_map(Shift::bookings).collect();
        for (i, left) in bookings.iter().enumerate() {
            for right in &bookings[i + 1..] {
                if left.resource == right.resource {
                    assert!(
                        !left.window.overlaps(&right.window),
                        "{} double-booked: {} ({}) and {} ({})",
                        left.resource,
                        left.shift_id,
                        left.window,
                        right.shift_id,
                        right.window
                    );
                }
            }
        }
    }

    #[test]
    fn random_commands_never_double_book() {
        let engine = mk_engine();
        let employees = ["42", "7", "8"];
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut committed = 0usize;

        for _ in 0..300 {
            let shifts = engine
                .list_shifts(&ShiftQuery::company("1"))
                .expect("list");
            let employee = employees[rng.gen_range(0..employees.len())];
            let op = if shifts.is_empty() { 0 } else { rng.gen_range(0..3) };
            let outcome = match op {
                0 => {
                    let slot = if rng.gen_bool(0.5) {
                        RoleSlot::assigned("DRIVER", employee)
                    } else {
                        RoleSlot::open("DRIVER")
                    };
                    let w = random_window(&mut rng);
                    engine.create_shift(draft("1", w, vec![slot])).map(|_| ())
                }
                1 => {
                    let target = &shifts[rng.gen_range(0..shifts.len())];
                    engine
                        .assign_resource(
                            &target.id,
                            &driver(),
                            &ResourceId::new(employee),
                            target.version,
                        )
                        .map(|_| ())
                }
                _ => {
                    let target = &shifts[rng.gen_range(0..shifts.len())];
                    let w = random_window(&mut rng);
                    engine
                        .move_shift(&target.id, w, target.version)
                        .map(|_| ())
                }
            };
            match outcome {
                Ok(()) => committed += 1,
                Err(err) => assert!(
                    matches!(
                        err.kind(),
                        ErrorKind::Conflict | ErrorKind::ValidationError
                    ),
                    "unexpected failure: {err}"
                ),
            }
            assert_no_double_booking(&engine);
        }
        assert!(committed > 0);
    }
}
