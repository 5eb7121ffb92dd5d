//! Core scheduling types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::FamilyStaffing;
use crate::state::ShiftStatus;
use crate::window::{ShiftWindow, TimeSpan};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(ShiftId);
string_id!(CompanyId);
string_id!(RoleId);
string_id!(ResourceId);
string_id!(EventId);

impl ShiftId {
    pub fn from_sequence(value: u64) -> Self {
        Self(format!("SH-{value:06}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftFamily {
    /// Tied to a customer and project.
    Regular,
    /// Tied to a product and warehouse location.
    Usn,
}

impl ShiftFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ShiftFamily::Regular => "REGULAR",
            ShiftFamily::Usn => "USN",
        }
    }
}

impl std::fmt::Display for ShiftFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ShiftFamily {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "REGULAR" => Ok(ShiftFamily::Regular),
            "USN" => Ok(ShiftFamily::Usn),
            other => Err(format!(
                "invalid shift family '{other}'. valid values: REGULAR, USN"
            )),
        }
    }
}

/// The parent entity a shift is booked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRef {
    Regular {
        customer_id: String,
        project_id: String,
    },
    Usn {
        product_id: String,
        warehouse_location_id: String,
    },
}

impl ParentRef {
    pub fn family(&self) -> ShiftFamily {
        match self {
            ParentRef::Regular { .. } => ShiftFamily::Regular,
            ParentRef::Usn { .. } => ShiftFamily::Usn,
        }
    }
}

/// Only affects pricing; never consulted for overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Proximity {
    #[default]
    Nearby,
    FarAway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Employee,
    Locomotive,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Employee => "EMPLOYEE",
            ResourceKind::Locomotive => "LOCOMOTIVE",
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EMPLOYEE" => Ok(ResourceKind::Employee),
            "LOCOMOTIVE" => Ok(ResourceKind::Locomotive),
            other => Err(format!(
                "invalid resource kind '{other}'. valid values: EMPLOYEE, LOCOMOTIVE"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: ResourceId,
}

impl ResourceRef {
    pub fn employee(id: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Employee,
            id: ResourceId::new(id),
        }
    }

    pub fn locomotive(id: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Locomotive,
            id: ResourceId::new(id),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str().to_ascii_lowercase(), self.id)
    }
}

/// Addresses one bindable slot of a shift.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotTarget {
    Role(RoleId),
    Locomotive,
}

impl SlotTarget {
    pub fn role(id: impl Into<String>) -> Self {
        SlotTarget::Role(RoleId::new(id))
    }

    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            SlotTarget::Role(_) => ResourceKind::Employee,
            SlotTarget::Locomotive => ResourceKind::Locomotive,
        }
    }
}

impl std::fmt::Display for SlotTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotTarget::Role(role) => f.write_str(&role.0),
            SlotTarget::Locomotive => f.write_str("locomotive"),
        }
    }
}

impl std::str::FromStr for SlotTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("slot must not be empty".to_string());
        }
        if trimmed.eq_ignore_ascii_case("locomotive") {
            Ok(SlotTarget::Locomotive)
        } else {
            Ok(SlotTarget::role(trimmed))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSlot {
    pub role_id: RoleId,
    #[serde(default)]
    pub proximity: Proximity,
    /// Minutes.
    #[serde(default)]
    pub break_duration: u32,
    #[serde(default)]
    pub assigned_resource_id: Option<ResourceId>,
}

impl RoleSlot {
    pub fn open(role_id: impl Into<String>) -> Self {
        Self {
            role_id: RoleId::new(role_id),
            proximity: Proximity::default(),
            break_duration: 0,
            assigned_resource_id: None,
        }
    }

    pub fn assigned(role_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            assigned_resource_id: Some(ResourceId::new(resource_id)),
            ..Self::open(role_id)
        }
    }

    pub fn is_open(&self) -> bool {
        self.assigned_resource_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: ShiftId,
    pub family: ShiftFamily,
    pub parent: ParentRef,
    pub company_id: CompanyId,
    pub window: ShiftWindow,
    pub status: ShiftStatus,
    #[serde(default)]
    pub role_slots: Vec<RoleSlot>,
    #[serde(default)]
    pub locomotive_id: Option<ResourceId>,
    #[serde(default)]
    pub cost_center_id: Option<String>,
    #[serde(default)]
    pub type_of_operation_id: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shift {
    pub fn has_slot(&self, target: &SlotTarget) -> bool {
        match target {
            SlotTarget::Role(role) => self.role_slots.iter().any(|slot| &slot.role_id == role),
            SlotTarget::Locomotive => true,
        }
    }

    pub fn bound(&self, target: &SlotTarget) -> Option<&ResourceId> {
        match target {
            SlotTarget::Role(role) => self
                .role_slots
                .iter()
                .find(|slot| &slot.role_id == role)
                .and_then(|slot| slot.assigned_resource_id.as_ref()),
            SlotTarget::Locomotive => self.locomotive_id.as_ref(),
        }
    }

    /// Sets or clears the resource on a slot. Returns false if the shift has
    /// no such slot.
    pub fn bind(&mut self, target: &SlotTarget, resource: Option<ResourceId>) -> bool {
        match target {
            SlotTarget::Role(role) => {
                match self.role_slots.iter_mut().find(|slot| &slot.role_id == role) {
                    Some(slot) => {
                        slot.assigned_resource_id = resource;
                        true
                    }
                    None => false,
                }
            }
            SlotTarget::Locomotive => {
                self.locomotive_id = resource;
                true
            }
        }
    }

    /// Every bound resource, personnel first then the locomotive.
    pub fn assigned_resources(&self) -> Vec<(SlotTarget, ResourceRef)> {
        let mut out: Vec<(SlotTarget, ResourceRef)> = self
            .role_slots
            .iter()
            .filter_map(|slot| {
                slot.assigned_resource_id.as_ref().map(|id| {
                    (
                        SlotTarget::Role(slot.role_id.clone()),
                        ResourceRef {
                            kind: ResourceKind::Employee,
                            id: id.clone(),
                        },
                    )
                })
            })
            .collect();
        if let Some(id) = &self.locomotive_id {
            out.push((
                SlotTarget::Locomotive,
                ResourceRef {
                    kind: ResourceKind::Locomotive,
                    id: id.clone(),
                },
            ));
        }
        out
    }

    /// Slot other than `except` already holding `resource`, if any.
    pub fn slot_holding(&self, resource: &ResourceRef, except: &SlotTarget) -> Option<SlotTarget> {
        self.assigned_resources()
            .into_iter()
            .find(|(slot, bound)| bound == resource && slot != except)
            .map(|(slot, _)| slot)
    }

    /// Bookings this shift contributes to the active set. Terminal shifts
    /// contribute none.
    pub fn bookings(&self) -> Vec<ResourceBooking> {
        if self.status.is_terminal() {
            return Vec::new();
        }
        self.assigned_resources()
            .into_iter()
            .map(|(_, resource)| ResourceBooking {
                resource,
                company_id: self.company_id.clone(),
                window: self.window,
                shift_id: self.id.clone(),
            })
            .collect()
    }

    /// Slots the staffing rule still needs filled before planning.
    pub fn missing_staff(&self, rule: &FamilyStaffing) -> Vec<SlotTarget> {
        let mut missing = Vec::new();
        for slot in &self.role_slots {
            let required = rule.require_all_slots || rule.required_roles.contains(&slot.role_id);
            if required && slot.is_open() {
                missing.push(SlotTarget::Role(slot.role_id.clone()));
            }
        }
        for role in &rule.required_roles {
            if !self.role_slots.iter().any(|slot| &slot.role_id == role) {
                missing.push(SlotTarget::Role(role.clone()));
            }
        }
        if rule.require_locomotive && self.locomotive_id.is_none() {
            missing.push(SlotTarget::Locomotive);
        }
        missing
    }

    /// Records one committed mutation.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = at;
    }
}

/// Derived from active shifts; never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBooking {
    pub resource: ResourceRef,
    pub company_id: CompanyId,
    pub window: ShiftWindow,
    pub shift_id: ShiftId,
}

impl ResourceBooking {
    pub fn span(&self) -> TimeSpan {
        self.window.span()
    }
}

/// Directory entry for an employee or locomotive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub company_id: CompanyId,
    pub name: String,
    #[serde(default)]
    pub capability_tags: BTreeSet<RoleId>,
    /// Empty means the resource serves any proximity.
    #[serde(default)]
    pub proximities: Vec<Proximity>,
}

impl Resource {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind,
            id: self.id.clone(),
        }
    }

    pub fn can_fill(&self, target: &SlotTarget) -> bool {
        match target {
            SlotTarget::Role(role) => {
                self.kind == ResourceKind::Employee && self.capability_tags.contains(role)
            }
            SlotTarget::Locomotive => self.kind == ResourceKind::Locomotive,
        }
    }

    pub fn serves(&self, proximity: Proximity) -> bool {
        self.proximities.is_empty() || self.proximities.contains(&proximity)
    }
}

/// Input for creating a shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDraft {
    pub family: ShiftFamily,
    pub company_id: CompanyId,
    pub window: ShiftWindow,
    #[serde(default)]
    pub role_slots: Vec<RoleSlot>,
    #[serde(default)]
    pub locomotive_id: Option<ResourceId>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub warehouse_location_id: Option<String>,
    #[serde(default)]
    pub cost_center_id: Option<String>,
    #[serde(default)]
    pub type_of_operation_id: Option<String>,
    /// Externally offered work starts in `OFFER` instead of `OPEN`.
    #[serde(default)]
    pub offer: bool,
}

impl ShiftDraft {
    pub fn regular(
        company_id: impl Into<String>,
        window: ShiftWindow,
        customer_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            family: ShiftFamily::Regular,
            company_id: CompanyId::new(company_id),
            window,
            role_slots: Vec::new(),
            locomotive_id: None,
            customer_id: Some(customer_id.into()),
            project_id: Some(project_id.into()),
            product_id: None,
            warehouse_location_id: None,
            cost_center_id: None,
            type_of_operation_id: None,
            offer: false,
        }
    }

    pub fn usn(
        company_id: impl Into<String>,
        window: ShiftWindow,
        product_id: impl Into<String>,
        warehouse_location_id: impl Into<String>,
    ) -> Self {
        Self {
            family: ShiftFamily::Usn,
            customer_id: None,
            project_id: None,
            product_id: Some(product_id.into()),
            warehouse_location_id: Some(warehouse_location_id.into()),
            ..Self::regular(company_id, window, "", "")
        }
    }

    pub fn with_slots(mut self, slots: Vec<RoleSlot>) -> Self {
        self.role_slots = slots;
        self
    }

    /// Parent entity for the draft's family, if its fields are filled in.
    pub fn parent(&self) -> Option<ParentRef> {
        fn filled(value: &Option<String>) -> Option<String> {
            value
                .as_ref()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        match self.family {
            ShiftFamily::Regular => Some(ParentRef::Regular {
                customer_id: filled(&self.customer_id)?,
                project_id: filled(&self.project_id)?,
            }),
            ShiftFamily::Usn => Some(ParentRef::Usn {
                product_id: filled(&self.product_id)?,
                warehouse_location_id: filled(&self.warehouse_location_id)?,
            }),
        }
    }

    pub fn initial_status(&self) -> ShiftStatus {
        if self.offer {
            ShiftStatus::Offer
        } else {
            ShiftStatus::Open
        }
    }
}
