//! Capability and double-booking checks.
//!
//! The validator never reads the store directly. It asks a
//! [`BookingSource`], which inside a command is an [`Overlay`] of the open
//! transaction plus the shifts that command has already changed.

use crate::directory::ResourceDirectory;
use crate::engine::EngineError;
use crate::store::{StoreError, StoreTx};
use shift_core::rejection::{ConflictDetail, Rejection};
use shift_core::types::{
    CompanyId, Resource, ResourceBooking, ResourceId, ResourceRef, Shift, ShiftId, SlotTarget,
};
use shift_core::window::ShiftWindow;
use std::collections::BTreeMap;

pub trait BookingSource {
    fn active_bookings_for(
        &mut self,
        company_id: &CompanyId,
        resource: &ResourceRef,
    ) -> Result<Vec<ResourceBooking>, StoreError>;
}

/// Transaction view with one command's not-yet-committed shifts layered on
/// top. A staged `None` hides a shift that is about to be deleted.
pub struct Overlay<'t, T: StoreTx + ?Sized> {
    tx: &'t mut T,
    staged: BTreeMap<ShiftId, Option<Shift>>,
}

impl<'t, T: StoreTx + ?Sized> Overlay<'t, T> {
    pub fn new(tx: &'t mut T) -> Self {
        Self {
            tx,
            staged: BTreeMap::new(),
        }
    }

    pub fn tx(&mut self) -> &mut T {
        &mut *self.tx
    }

    pub fn stage(&mut self, shift: Shift) {
        self.staged.insert(shift.id.clone(), Some(shift));
    }

    pub fn stage_delete(&mut self, shift_id: ShiftId) {
        self.staged.insert(shift_id, None);
    }
}

impl<T: StoreTx + ?Sized> BookingSource for Overlay<'_, T> {
    fn active_bookings_for(
        &mut self,
        company_id: &CompanyId,
        resource: &ResourceRef,
    ) -> Result<Vec<ResourceBooking>, StoreError> {
        let mut bookings: Vec<ResourceBooking> = self
            .tx
            .load_active_bookings_for(company_id, resource)?
            .into_iter()
            .filter(|booking| !self.staged.contains_key(&booking.shift_id))
            .collect();
        for shift in self.staged.values().flatten() {
            if &shift.company_id != company_id {
                continue;
            }
            bookings.extend(
                shift
                    .bookings()
                    .into_iter()
                    .filter(|booking| &booking.resource == resource),
            );
        }
        Ok(bookings)
    }
}

pub struct AssignmentValidator<'a, D: ?Sized> {
    directory: &'a D,
}

impl<'a, D: ResourceDirectory + ?Sized> AssignmentValidator<'a, D> {
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    /// Fails with the earliest active booking of `resource` that overlaps
    /// `window`. Bookings of `excluding` are ignored.
    pub fn check_overlap<B: BookingSource + ?Sized>(
        &self,
        source: &mut B,
        company_id: &CompanyId,
        resource: &ResourceRef,
        window: &ShiftWindow,
        excluding: Option<&ShiftId>,
    ) -> Result<(), EngineError> {
        let mut bookings = source.active_bookings_for(company_id, resource)?;
        bookings.sort_by(|a, b| {
            a.span()
                .cmp(&b.span())
                .then_with(|| a.shift_id.cmp(&b.shift_id))
        });
        let conflict = bookings.into_iter().find(|booking| {
            Some(&booking.shift_id) != excluding && booking.window.overlaps(window)
        });
        match conflict {
            Some(booking) => Err(Rejection::Conflict {
                detail: ConflictDetail {
                    resource: booking.resource,
                    conflicting_shift_id: booking.shift_id,
                    conflicting_window: booking.window,
                },
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Unknown resources are reported as incapable.
    pub fn check_role_capability(
        &self,
        company_id: &CompanyId,
        slot: &SlotTarget,
        resource_id: &ResourceId,
    ) -> Result<Resource, EngineError> {
        let reference = ResourceRef {
            kind: slot.resource_kind(),
            id: resource_id.clone(),
        };
        match self.directory.resource(company_id, &reference)? {
            Some(resource) if resource.can_fill(slot) => Ok(resource),
            _ => Err(Rejection::IncapableResource {
                resource: reference,
                slot: slot.clone(),
            }
            .into()),
        }
    }

    /// Every resource bound to `shift` must be free during `new_window`.
    pub fn check_move<B: BookingSource + ?Sized>(
        &self,
        source: &mut B,
        shift: &Shift,
        new_window: &ShiftWindow,
    ) -> Result<(), EngineError> {
        for (_, resource) in shift.assigned_resources() {
            self.check_overlap(
                source,
                &shift.company_id,
                &resource,
                new_window,
                Some(&shift.id),
            )?;
        }
        Ok(())
    }
}
