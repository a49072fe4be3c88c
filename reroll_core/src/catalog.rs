//! Static classification of cell types.
//!
//! Loaded once from `cell_catalog.json` (or the file named by
//! `REROLL_CATALOG_PATH`) and shared read-only by the main loop and the
//! planning workers.

use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use bitflags::bitflags;
use reroll_schema::CellTypeId;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_CELL_CATALOG: &str = include_str!("data/cell_catalog.json");

pub const CATALOG_PATH_ENV: &str = "REROLL_CATALOG_PATH";

bitflags! {
    /// Classification tags attached to a cell type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CellTags: u8 {
        /// Never chosen as a replacement.
        const EXCLUDED = 1 << 0;
        /// Never overwritten by a mutation.
        const PRESERVED = 1 << 1;
    }
}

/// Effective class of a cell type. `Preserved` wins when both tags are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellClass {
    Preserved,
    Excluded,
    Normal,
}

impl From<CellTags> for CellClass {
    fn from(tags: CellTags) -> Self {
        if tags.contains(CellTags::PRESERVED) {
            CellClass::Preserved
        } else if tags.contains(CellTags::EXCLUDED) {
            CellClass::Excluded
        } else {
            CellClass::Normal
        }
    }
}

/// Copies excluded ids that match it into the preserved set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PreserveRule {
    pub namespace: String,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl PreserveRule {
    pub fn matches(&self, id: &CellTypeId) -> bool {
        if id.namespace() != self.namespace {
            return false;
        }
        let prefix_ok = self
            .prefix
            .as_deref()
            .map_or(true, |prefix| id.path().starts_with(prefix));
        let suffix_ok = self
            .suffix
            .as_deref()
            .map_or(true, |suffix| id.path().ends_with(suffix));
        prefix_ok && suffix_ok
    }
}

/// On-disk shape of the catalog.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogDocument {
    pub cell_types: Vec<CellTypeId>,
    pub excluded: Vec<CellTypeId>,
    pub preserved: Vec<CellTypeId>,
    pub preserve_excluded_matching: Vec<PreserveRule>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse cell catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read cell catalog from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Immutable cell type universe with its classification.
#[derive(Debug, Clone, Default)]
pub struct CellCatalog {
    tags: BTreeMap<CellTypeId, CellTags>,
    candidates: Vec<CellTypeId>,
}

impl CellCatalog {
    pub fn from_document(document: CatalogDocument) -> Self {
        let mut tags: BTreeMap<CellTypeId, CellTags> = BTreeMap::new();
        for id in document.cell_types {
            tags.entry(id).or_default();
        }
        for id in &document.excluded {
            *tags.entry(id.clone()).or_default() |= CellTags::EXCLUDED;
        }
        for id in document.preserved {
            *tags.entry(id).or_default() |= CellTags::PRESERVED;
        }
        for id in &document.excluded {
            if document
                .preserve_excluded_matching
                .iter()
                .any(|rule| rule.matches(id))
            {
                *tags.entry(id.clone()).or_default() |= CellTags::PRESERVED;
            }
        }

        let candidates = tags
            .iter()
            .filter(|(_, tags)| tags.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        Self { tags, candidates }
    }

    pub fn builtin() -> Arc<Self> {
        Arc::new(
            Self::from_json_str(BUILTIN_CELL_CATALOG).expect("builtin cell catalog should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(document))
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path).map_err(|source| CatalogError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Tags for `id`; ids outside the catalog carry none.
    pub fn tags(&self, id: &CellTypeId) -> CellTags {
        self.tags.get(id).copied().unwrap_or_default()
    }

    pub fn classify(&self, id: &CellTypeId) -> CellClass {
        self.tags(id).into()
    }

    pub fn is_preserved(&self, id: &CellTypeId) -> bool {
        self.tags(id).contains(CellTags::PRESERVED)
    }

    pub fn is_excluded(&self, id: &CellTypeId) -> bool {
        self.tags(id).contains(CellTags::EXCLUDED)
    }

    /// Every known cell type in ascending order.
    pub fn cell_types(&self) -> impl Iterator<Item = &CellTypeId> + '_ {
        self.tags.keys()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Normal cell types, in ascending order.
    pub fn replacement_candidates(&self) -> &[CellTypeId] {
        &self.candidates
    }
}

#[derive(Resource, Debug, Clone)]
pub struct CatalogHandle(pub Arc<CellCatalog>);

impl CatalogHandle {
    pub fn new(catalog: Arc<CellCatalog>) -> Self {
        Self(catalog)
    }

    pub fn get(&self) -> Arc<CellCatalog> {
        Arc::clone(&self.0)
    }

    pub fn catalog(&self) -> &CellCatalog {
        &self.0
    }
}

/// Load the catalog named by `REROLL_CATALOG_PATH`, falling back to the
/// builtin copy when the variable is unset or the file is unusable.
pub fn load_catalog_from_env() -> (Arc<CellCatalog>, Option<PathBuf>) {
    if let Some(path) = env::var_os(CATALOG_PATH_ENV).map(PathBuf::from) {
        match CellCatalog::from_file(&path) {
            Ok(catalog) => {
                tracing::info!(
                    target: "reroll::config",
                    path = %path.display(),
                    cell_types = catalog.len(),
                    candidates = catalog.replacement_candidates().len(),
                    "cell_catalog.loaded=file"
                );
                return (Arc::new(catalog), Some(path));
            }
            Err(err) => {
                tracing::warn!(
                    target: "reroll::config",
                    path = %path.display(),
                    error = %err,
                    "cell_catalog.load_failed"
                );
            }
        }
    }

    let catalog = CellCatalog::builtin();
    tracing::info!(
        target: "reroll::config",
        cell_types = catalog.len(),
        candidates = catalog.replacement_candidates().len(),
        "cell_catalog.loaded=builtin"
    );
    (catalog, None)
}
