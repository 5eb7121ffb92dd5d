//! Read-only view over the employees and locomotives a company can staff
//! shifts with.

use serde::{Deserialize, Serialize};
use shift_core::types::{CompanyId, Proximity, Resource, ResourceRef, RoleId, SlotTarget};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to read resource catalog at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse resource catalog at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("duplicate resource {resource} for company {company_id}")]
    Duplicate {
        company_id: CompanyId,
        resource: ResourceRef,
    },
    #[error("resource directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Case-insensitive substring match on the resource name.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            search: None,
            offset: 0,
            limit: default_page_limit(),
        }
    }
}

fn default_page_limit() -> usize {
    50
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub next_offset: Option<usize>,
}

pub trait ResourceDirectory: Send + Sync {
    /// Resources of `company_id` able to fill `role_id`, sorted by name.
    fn list_eligible(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
        proximity: Option<Proximity>,
        page: &PageRequest,
    ) -> Result<Page<Resource>, DirectoryError>;

    fn resource(
        &self,
        company_id: &CompanyId,
        resource: &ResourceRef,
    ) -> Result<Option<Resource>, DirectoryError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCatalog {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Directory backed by an in-process catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    entries: BTreeMap<(CompanyId, ResourceRef), Resource>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: ResourceCatalog) -> Result<Self, DirectoryError> {
        let mut directory = Self::new();
        for resource in catalog.resources {
            directory.insert(resource)?;
        }
        Ok(directory)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path_ref = path.as_ref();
        let body = fs::read_to_string(path_ref).map_err(|source| DirectoryError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let catalog: ResourceCatalog =
            toml::from_str(&body).map_err(|source| DirectoryError::Parse {
                path: path_ref.to_path_buf(),
                source,
            })?;
        Self::from_catalog(catalog)
    }

    pub fn insert(&mut self, resource: Resource) -> Result<(), DirectoryError> {
        let key = (resource.company_id.clone(), resource.reference());
        if self.entries.contains_key(&key) {
            return Err(DirectoryError::Duplicate {
                company_id: key.0,
                resource: key.1,
            });
        }
        self.entries.insert(key, resource);
        Ok(())
    }

    pub fn with(mut self, resource: Resource) -> Result<Self, DirectoryError> {
        self.insert(resource)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceDirectory for InMemoryDirectory {
    fn list_eligible(
        &self,
        company_id: &CompanyId,
        role_id: &RoleId,
        proximity: Option<Proximity>,
        page: &PageRequest,
    ) -> Result<Page<Resource>, DirectoryError> {
        let target = SlotTarget::Role(role_id.clone());
        let needle = page
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut matches: Vec<&Resource> = self
            .entries
            .values()
            .filter(|resource| &resource.company_id == company_id)
            .filter(|resource| resource.can_fill(&target))
            .filter(|resource| proximity.map_or(true, |p| resource.serves(p)))
            .filter(|resource| {
                needle
                    .as_ref()
                    .map_or(true, |n| resource.name.to_lowercase().contains(n))
            })
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let total = matches.len();
        let items: Vec<Resource> = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        let end = page.offset.saturating_add(items.len());
        let next_offset = (end < total && !items.is_empty()).then_some(end);

        Ok(Page {
            items,
            total,
            next_offset,
        })
    }

    fn resource(
        &self,
        company_id: &CompanyId,
        resource: &ResourceRef,
    ) -> Result<Option<Resource>, DirectoryError> {
        Ok(self
            .entries
            .get(&(company_id.clone(), resource.clone()))
            .cloned())
    }
}
