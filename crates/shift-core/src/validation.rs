//! Structural validation for drafts and configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::{EngineConfig, FamilyStaffing, StoreBackend};
use crate::rejection::Rejection;
use crate::types::{ShiftDraft, ShiftFamily};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

impl ValidationIssue {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Error,
            code,
            message: message.into(),
        }
    }

    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Warning,
            code,
            message: message.into(),
        }
    }
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

/// Folds error-level issues into one rejection. Warnings never reject.
pub fn reject_on_errors(issues: &[ValidationIssue]) -> Result<(), Rejection> {
    let errors: Vec<&ValidationIssue> = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .collect();
    let Some(first) = errors.first() else {
        return Ok(());
    };
    let message = errors
        .iter()
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    Err(Rejection::validation(first.code, message))
}

impl Validate for EngineConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.store.backend == StoreBackend::Sqlite
            && self.store.sqlite_path.as_os_str().is_empty()
        {
            issues.push(ValidationIssue::error(
                "store.sqlite_path.empty",
                "sqlite backend selected but sqlite_path is empty",
            ));
        }

        if self.logging.filter.trim().is_empty() {
            issues.push(ValidationIssue::warning(
                "logging.filter.empty",
                "log filter is empty; falling back to 'info'",
            ));
        }

        validate_staffing(ShiftFamily::Regular, &self.staffing.regular, &mut issues);
        validate_staffing(ShiftFamily::Usn, &self.staffing.usn, &mut issues);

        issues
    }
}

fn validate_staffing(
    family: ShiftFamily,
    rule: &FamilyStaffing,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut seen = HashSet::new();
    for role in &rule.required_roles {
        if role.0.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "staffing.required_roles.blank",
                format!("{family} staffing lists a blank required role"),
            ));
        } else if !seen.insert(role) {
            issues.push(ValidationIssue::warning(
                "staffing.required_roles.duplicate",
                format!("{family} staffing lists role {role} more than once"),
            ));
        }
    }

    if !rule.require_all_slots && rule.required_roles.is_empty() && !rule.require_locomotive {
        issues.push(ValidationIssue::warning(
            "staffing.rule.empty",
            format!("{family} shifts can be planned with every slot open"),
        ));
    }
}

impl Validate for ShiftDraft {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.company_id.0.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "shift.company_id.empty",
                "company_id must not be empty",
            ));
        }

        if !self.window.is_well_formed() {
            issues.push(ValidationIssue::error(
                "shift.window.malformed",
                format!("window {} has no duration", self.window),
            ));
        }

        if self.parent().is_none() {
            let fields = match self.family {
                ShiftFamily::Regular => "customer_id and project_id",
                ShiftFamily::Usn => "product_id and warehouse_location_id",
            };
            issues.push(ValidationIssue::error(
                "shift.parent.missing",
                format!("{} shifts require {fields}", self.family),
            ));
        }

        let foreign = match self.family {
            ShiftFamily::Regular => {
                self.product_id.is_some() || self.warehouse_location_id.is_some()
            }
            ShiftFamily::Usn => self.customer_id.is_some() || self.project_id.is_some(),
        };
        if foreign {
            issues.push(ValidationIssue::warning(
                "shift.parent.foreign_fields",
                format!("fields of the other family are ignored for {} shifts", self.family),
            ));
        }

        let mut roles = HashSet::new();
        let mut resources = HashSet::new();
        for slot in &self.role_slots {
            if slot.role_id.0.trim().is_empty() {
                issues.push(ValidationIssue::error(
                    "shift.role_slots.blank",
                    "role slot has an empty role_id",
                ));
            } else if !roles.insert(&slot.role_id) {
                issues.push(ValidationIssue::error(
                    "shift.role_slots.duplicate",
                    format!("role {} appears in more than one slot", slot.role_id),
                ));
            }

            if let Some(resource) = &slot.assigned_resource_id {
                if resource.0.trim().is_empty() {
                    issues.push(ValidationIssue::error(
                        "shift.role_slots.blank_resource",
                        format!("slot {} is bound to an empty resource id", slot.role_id),
                    ));
                } else if !resources.insert(resource) {
                    issues.push(ValidationIssue::error(
                        "binding.duplicate_resource",
                        format!("employee {resource} is bound to more than one slot"),
                    ));
                }
            }
        }

        if let Some(locomotive) = &self.locomotive_id {
            if locomotive.0.trim().is_empty() {
                issues.push(ValidationIssue::error(
                    "shift.locomotive_id.blank",
                    "locomotive_id must not be empty when set",
                ));
            }
        }

        issues
    }
}
