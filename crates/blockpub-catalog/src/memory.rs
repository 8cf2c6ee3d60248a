//! In-process catalog used by tests and local dry runs.
//!
//! Registration is idempotent: repeating a publish for entities the
//! catalog already holds reports them as "already registered" and
//! returns the blocks their files already sit in.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::client::{
    BoxFuture, CatalogClient, ClosedBlock, PublishOutcome, PublishRequest, PublishedBlock,
};
use blockpub_core::{Error, Result};
use blockpub_store::Algorithm;

pub const DEFAULT_MAX_FILES_PER_BLOCK: usize = 500;

type AlgorithmKey = (String, String, String, String);

fn algorithm_key(a: &Algorithm) -> AlgorithmKey {
    (
        a.application_name.clone(),
        a.application_version.clone(),
        a.application_family.clone(),
        a.param_set_hash.clone(),
    )
}

#[derive(Debug, Clone)]
struct MemBlock {
    location: String,
    is_open: bool,
    migrated: bool,
    created_at: i64,
    files: Vec<String>,
}

#[derive(Default)]
struct CatalogState {
    algorithms: HashSet<AlgorithmKey>,
    datasets: HashSet<String>,
    pairings: HashSet<(AlgorithmKey, String)>,
    blocks: BTreeMap<String, MemBlock>,
    /// (dataset path, location) → name of the block accepting files.
    open_blocks: HashMap<(String, String), String>,
    /// logical name → block name
    files: HashMap<String, String>,
    block_seq: u64,
    publish_calls: usize,
    close_calls: usize,
    failing_datasets: HashSet<String>,
    rejected_on_close: HashSet<String>,
    now: Option<i64>,
}

/// Deterministic catalog living entirely in memory.
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
    max_files_per_block: usize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::with_max_files_per_block(DEFAULT_MAX_FILES_PER_BLOCK)
    }

    /// Blocks close on their own once they hold `max` files.
    pub fn with_max_files_per_block(max: usize) -> Self {
        Self {
            state: Mutex::new(CatalogState::default()),
            max_files_per_block: max.max(1),
        }
    }

    /// Pin the clock used for block creation timestamps.
    pub fn set_now(&self, now: i64) {
        self.state.lock().now = Some(now);
    }

    /// Make every publish for this dataset path fail.
    pub fn fail_dataset(&self, path: &str) {
        self.state.lock().failing_datasets.insert(path.to_string());
    }

    pub fn heal_dataset(&self, path: &str) {
        self.state.lock().failing_datasets.remove(path);
    }

    /// Refuse to close this block.
    pub fn reject_close(&self, block_name: &str) {
        self.state.lock().rejected_on_close.insert(block_name.to_string());
    }

    pub fn publish_calls(&self) -> usize {
        self.state.lock().publish_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    pub fn has_algorithm(&self, algorithm: &Algorithm) -> bool {
        self.state.lock().algorithms.contains(&algorithm_key(algorithm))
    }

    pub fn has_dataset(&self, path: &str) -> bool {
        self.state.lock().datasets.contains(path)
    }

    pub fn block(&self, name: &str) -> Option<PublishedBlock> {
        let state = self.state.lock();
        state.blocks.get(name).map(|b| PublishedBlock {
            name: name.to_string(),
            locations: vec![b.location.clone()],
            is_open: b.is_open,
            created_at: b.created_at,
            files: b.files.clone(),
        })
    }

    pub fn is_migrated(&self, name: &str) -> bool {
        self.state.lock().blocks.get(name).map(|b| b.migrated).unwrap_or(false)
    }

    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    fn publish_now(&self, request: &PublishRequest) -> Result<PublishOutcome> {
        let mut state = self.state.lock();
        state.publish_calls += 1;

        let path = request.dataset.path.clone();
        if state.failing_datasets.contains(&path) {
            return Err(Error::CatalogRegistration(format!(
                "catalog rejected dataset {}",
                path
            )));
        }

        let algo = algorithm_key(&request.algorithm);
        let algorithm_registered = state.algorithms.insert(algo.clone());
        state.datasets.insert(path.clone());
        let pairing_registered = state.pairings.insert((algo, path.clone()));

        let now = state.now.unwrap_or_else(|| chrono::Utc::now().timestamp());
        let mut touched: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for file in &request.files {
            if let Some(existing) = state.files.get(&file.logical_name).cloned() {
                touched.entry(existing).or_default().push(file.logical_name.clone());
                continue;
            }
            let Some(location) = file.locations.first().cloned() else {
                debug!("File {} has no location, not placed", file.logical_name);
                continue;
            };

            let key = (path.clone(), location.clone());
            let name = match state.open_blocks.get(&key).cloned() {
                Some(name) => name,
                None => {
                    state.block_seq += 1;
                    let name = format!("{}#{:06}", path, state.block_seq);
                    state.blocks.insert(
                        name.clone(),
                        MemBlock {
                            location,
                            is_open: true,
                            migrated: false,
                            created_at: now,
                            files: Vec::new(),
                        },
                    );
                    state.open_blocks.insert(key.clone(), name.clone());
                    name
                }
            };

            let full = match state.blocks.get_mut(&name) {
                Some(block) => {
                    block.files.push(file.logical_name.clone());
                    if block.files.len() >= self.max_files_per_block {
                        block.is_open = false;
                        true
                    } else {
                        false
                    }
                }
                None => return Err(Error::Internal(format!("block {} vanished", name))),
            };
            if full {
                state.open_blocks.remove(&key);
            }
            state.files.insert(file.logical_name.clone(), name.clone());
            touched.entry(name).or_default().push(file.logical_name.clone());
        }

        let blocks = touched
            .into_iter()
            .filter_map(|(name, files)| {
                state.blocks.get(&name).map(|b| PublishedBlock {
                    name: name.clone(),
                    locations: vec![b.location.clone()],
                    is_open: b.is_open,
                    created_at: b.created_at,
                    files,
                })
            })
            .collect();

        Ok(PublishOutcome {
            algorithm_registered,
            pairing_registered,
            blocks,
        })
    }

    fn close_now(&self, names: &[String]) -> Vec<ClosedBlock> {
        let mut state = self.state.lock();
        state.close_calls += 1;

        let mut closed = Vec::new();
        for name in names {
            if state.rejected_on_close.contains(name) {
                continue;
            }
            let Some(block) = state.blocks.get_mut(name) else {
                continue;
            };
            block.is_open = false;
            block.migrated = true;
            let created_at = block.created_at;
            state.open_blocks.retain(|_, open| open != name);
            closed.push(ClosedBlock {
                name: name.clone(),
                created_at,
            });
        }
        closed
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogClient for MemoryCatalog {
    fn publish(&self, request: PublishRequest) -> BoxFuture<'_, Result<PublishOutcome>> {
        async move { self.publish_now(&request) }.boxed()
    }

    fn close_and_migrate(&self, block_names: Vec<String>) -> BoxFuture<'_, Result<Vec<ClosedBlock>>> {
        async move { Ok(self.close_now(&block_names)) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockpub_store::{BufferFile, Dataset, FileStatus, Pairing};

    fn algorithm(version: &str) -> Algorithm {
        Algorithm {
            id: 1,
            application_name: "cmsRun".into(),
            application_family: "RECO".into(),
            application_version: version.into(),
            param_set_hash: "abc".into(),
            param_set_content: None,
            in_catalog: false,
        }
    }

    fn file(lfn: &str, location: Option<&str>) -> BufferFile {
        BufferFile {
            id: 0,
            logical_name: lfn.into(),
            size_bytes: 1,
            event_count: 1,
            checksum: "c".into(),
            das_id: 1,
            status: FileStatus::Pending,
            last_modified: 0,
            parents: vec![],
            run_lumis: vec![],
            locations: location.map(|l| vec![l.to_string()]).unwrap_or_default(),
        }
    }

    fn request(files: Vec<BufferFile>) -> PublishRequest {
        PublishRequest {
            algorithm: algorithm("CMSSW_14_0_0"),
            dataset: Dataset {
                id: 1,
                path: "/A/B-v1/RAW".into(),
                primary_dataset: "A".into(),
                processed_dataset: "B-v1".into(),
                data_tier: "RAW".into(),
                algorithm_id: Some(1),
                pairing_in_catalog: false,
            },
            pairing: Pairing {
                id: 1,
                algorithm_id: 1,
                dataset_id: 1,
                in_catalog: false,
            },
            files,
        }
    }

    #[tokio::test]
    async fn test_first_publish_registers_everything() {
        let catalog = MemoryCatalog::new();
        catalog.set_now(1000);
        let outcome = catalog
            .publish(request(vec![file("/f1", Some("L")), file("/f2", Some("L"))]))
            .await
            .unwrap();

        assert!(outcome.algorithm_registered);
        assert!(outcome.pairing_registered);
        assert_eq!(outcome.blocks.len(), 1);
        let block = &outcome.blocks[0];
        assert!(block.is_open);
        assert_eq!(block.created_at, 1000);
        assert_eq!(block.locations, vec!["L"]);
        assert_eq!(block.files, vec!["/f1", "/f2"]);
        assert!(catalog.has_dataset("/A/B-v1/RAW"));
    }

    #[tokio::test]
    async fn test_republish_is_a_no_op() {
        let catalog = MemoryCatalog::new();
        let req = request(vec![file("/f1", Some("L"))]);
        let first = catalog.publish(req.clone()).await.unwrap();
        let second = catalog.publish(req).await.unwrap();

        assert!(!second.algorithm_registered);
        assert!(!second.pairing_registered);
        assert_eq!(second.blocks[0].name, first.blocks[0].name);
        assert_eq!(catalog.block_count(), 1);
        assert_eq!(catalog.block(&first.blocks[0].name).unwrap().files.len(), 1);
    }

    #[tokio::test]
    async fn test_full_block_closes_and_rolls_over() {
        let catalog = MemoryCatalog::with_max_files_per_block(2);
        let outcome = catalog
            .publish(request(vec![
                file("/f1", Some("L")),
                file("/f2", Some("L")),
                file("/f3", Some("L")),
            ]))
            .await
            .unwrap();

        assert_eq!(outcome.blocks.len(), 2);
        assert!(!outcome.blocks[0].is_open);
        assert_eq!(outcome.blocks[0].files.len(), 2);
        assert!(outcome.blocks[1].is_open);
        assert_eq!(outcome.blocks[1].files, vec!["/f3"]);
    }

    #[tokio::test]
    async fn test_unplaced_files_are_not_confirmed() {
        let catalog = MemoryCatalog::new();
        let outcome = catalog
            .publish(request(vec![file("/f1", Some("L")), file("/nowhere", None)]))
            .await
            .unwrap();
        assert_eq!(outcome.blocks.len(), 1);
        assert_eq!(outcome.blocks[0].files, vec!["/f1"]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let catalog = MemoryCatalog::new();
        catalog.fail_dataset("/A/B-v1/RAW");
        let err = catalog.publish(request(vec![file("/f1", Some("L"))])).await;
        assert!(matches!(err, Err(Error::CatalogRegistration(_))));
        assert_eq!(catalog.block_count(), 0);

        catalog.heal_dataset("/A/B-v1/RAW");
        assert!(catalog.publish(request(vec![file("/f1", Some("L"))])).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_and_migrate_partial() {
        let catalog = MemoryCatalog::with_max_files_per_block(1);
        let outcome = catalog
            .publish(request(vec![file("/f1", Some("L1")), file("/f2", Some("L2"))]))
            .await
            .unwrap();
        let names: Vec<String> = outcome.blocks.iter().map(|b| b.name.clone()).collect();
        catalog.reject_close(&names[1]);

        let closed = catalog
            .close_and_migrate(vec![names[0].clone(), names[1].clone(), "unknown".into()])
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].name, names[0]);
        assert!(catalog.is_migrated(&names[0]));
        assert!(!catalog.is_migrated(&names[1]));
    }
}
