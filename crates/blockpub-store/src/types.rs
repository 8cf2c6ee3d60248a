//! Entity types: algorithms, datasets, pairings, files and blocks.

use serde::{Deserialize, Serialize};

/// Publication status of a buffered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    InCatalog,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InCatalog => "in_catalog",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_catalog" => Some(Self::InCatalog),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application + configuration that produced a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Algorithm {
    pub id: i64,
    pub application_name: String,
    pub application_family: String,
    pub application_version: String,
    pub param_set_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param_set_content: Option<String>,
    pub in_catalog: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub path: String,
    pub primary_dataset: String,
    pub processed_dataset: String,
    pub data_tier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm_id: Option<i64>,
    pub pairing_in_catalog: bool,
}

/// Dataset/algorithm pairing (DAS). Every file is filed under exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub id: i64,
    pub algorithm_id: i64,
    pub dataset_id: i64,
    pub in_catalog: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunLumi {
    pub run: i64,
    pub lumi: i64,
}

/// Weak reference to a parent file, resolved by logical name only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParentFile {
    pub logical_name: String,
}

/// A fully hydrated buffered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferFile {
    pub id: i64,
    pub logical_name: String,
    pub size_bytes: i64,
    pub event_count: i64,
    pub checksum: String,
    pub das_id: i64,
    pub status: FileStatus,
    pub last_modified: i64,
    pub parents: Vec<ParentFile>,
    pub run_lumis: Vec<RunLumi>,
    pub locations: Vec<String>,
}

/// A block as stored locally. `files` is ignored on persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub name: String,
    pub locations: Vec<String>,
    pub is_open: bool,
    pub is_published_downstream: bool,
    /// Unix seconds; written once on first persist.
    pub created_at: i64,
    #[serde(default)]
    pub files: Vec<String>,
}

/// One pending file joined with the descriptors of its pairing.
///
/// Rows sharing a `pairing.id` always carry the same algorithm and dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingFileRow {
    pub file_id: i64,
    pub logical_name: String,
    pub pairing: Pairing,
    pub algorithm: Algorithm,
    pub dataset: Dataset,
}

/// Input for registering an algorithm on the job-output path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAlgorithm {
    pub application_name: String,
    pub application_family: String,
    pub application_version: String,
    pub param_set_hash: String,
    pub param_set_content: Option<String>,
}

/// Input for registering a dataset on the job-output path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDataset {
    pub path: String,
    pub primary_dataset: String,
    pub processed_dataset: String,
    pub data_tier: String,
}

impl NewDataset {
    /// Build from a `/primary/processed/TIER` path.
    pub fn from_path(path: &str) -> Option<Self> {
        let mut parts = path.strip_prefix('/')?.split('/');
        let primary = parts.next().filter(|s| !s.is_empty())?;
        let processed = parts.next().filter(|s| !s.is_empty())?;
        let tier = parts.next().filter(|s| !s.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            path: path.to_string(),
            primary_dataset: primary.to_string(),
            processed_dataset: processed.to_string(),
            data_tier: tier.to_string(),
        })
    }
}

/// Input for appending a pending file on the job-output path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewFile {
    pub logical_name: String,
    pub size_bytes: i64,
    pub event_count: i64,
    pub checksum: String,
    pub das_id: i64,
    pub parents: Vec<String>,
    pub run_lumis: Vec<RunLumi>,
    pub locations: Vec<String>,
}

/// Read-only counters for drain-readiness monitoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    #[serde(rename = "openBlocks")]
    pub open_blocks: i64,
    #[serde(rename = "pendingFiles")]
    pub pending_files: i64,
    #[serde(rename = "inCatalogFiles")]
    pub in_catalog_files: i64,
    #[serde(rename = "notPublishedDownstream")]
    pub not_published_downstream: i64,
    pub drained: bool,
}
