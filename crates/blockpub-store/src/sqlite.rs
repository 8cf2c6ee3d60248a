//! SQLite-backed buffer store.
//!
//! Reads run directly against the shared connection. Every write goes
//! through [`BufferStore::write`], which hands the caller an explicit
//! [`StoreTx`] scope that commits on `Ok` and rolls back on `Err`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::schema::{BLOCK_SCHEMA_SQL, ENTITY_SCHEMA_SQL, FILE_SCHEMA_SQL};
use crate::tx::StoreTx;
use crate::types::*;
use blockpub_core::{Error, Result};

/// Buffer of locally produced file metadata awaiting publication.
pub struct BufferStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl BufferStore {
    /// Open or create the store.
    ///
    /// `db_dir` is the data directory. The file will be `db_dir/blockpub.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Persistence(e.to_string()))?;
        let db_path = db_dir.join("blockpub.db");

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        let snapshot = store.status_snapshot()?;
        info!(
            "BufferStore initialized: {} pending files, {} open blocks, path={}",
            snapshot.pending_files,
            snapshot.open_blocks,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!("{}\n{}\n{}", ENTITY_SCHEMA_SQL, BLOCK_SCHEMA_SQL, FILE_SCHEMA_SQL);
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Persistence(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` inside one write transaction.
    ///
    /// Commits when `f` returns `Ok`; any `Err` drops the transaction,
    /// rolling back every write made through the scope.
    pub fn write<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let scope = StoreTx::new(tx);
        let out = f(&scope)?;
        scope.commit()?;
        Ok(out)
    }

    /// Run a read against the connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    // ---------------------------------------------------------------
    // Job-output append path
    // ---------------------------------------------------------------

    /// Register an algorithm, returning the existing id if already known.
    pub fn register_algorithm(&self, algo: &NewAlgorithm) -> Result<i64> {
        self.write(|tx| tx.insert_algorithm(algo))
    }

    /// Register a dataset, returning the existing id if already known.
    pub fn register_dataset(&self, dataset: &NewDataset) -> Result<i64> {
        self.write(|tx| tx.insert_dataset(dataset))
    }

    /// Pair a dataset with the algorithm that produced it.
    pub fn register_pairing(&self, algorithm_id: i64, dataset_id: i64) -> Result<i64> {
        self.write(|tx| tx.insert_pairing(algorithm_id, dataset_id))
    }

    /// Append a pending file with its parents, run/lumis and locations.
    pub fn add_pending_file(&self, file: &NewFile) -> Result<i64> {
        self.write(|tx| tx.insert_pending_file(file))
    }

    // ---------------------------------------------------------------
    // Buffer reads
    // ---------------------------------------------------------------

    /// All pending files grouped by pairing id, in discovery order per group.
    pub fn find_pending_grouped_by_das(&self) -> Result<BTreeMap<i64, Vec<PendingFileRow>>> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT f.id AS file_id, f.lfn, \
                     das.id AS das_id, das.algorithm_id, das.dataset_id, das.in_catalog AS das_in_catalog, \
                     a.app_name, a.app_family, a.app_version, a.pset_hash, a.pset_content, \
                     a.in_catalog AS algo_in_catalog, \
                     d.path, d.primary_dataset, d.processed_dataset, d.data_tier, \
                     d.algorithm_id AS dataset_algorithm_id, d.pairing_in_catalog \
                     FROM files f \
                     JOIN dataset_algorithms das ON das.id = f.das_id \
                     JOIN algorithms a ON a.id = das.algorithm_id \
                     JOIN datasets d ON d.id = das.dataset_id \
                     WHERE f.status = 'pending' \
                     ORDER BY f.das_id, f.id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], row_to_pending)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;

            let mut groups: BTreeMap<i64, Vec<PendingFileRow>> = BTreeMap::new();
            for row in rows {
                groups.entry(row.pairing.id).or_default().push(row);
            }
            debug!("Found {} pending DAS groups", groups.len());
            Ok(groups)
        })
    }

    /// Hydrate files by id. Ids that no longer resolve are skipped.
    pub fn hydrate_files(&self, ids: &[i64]) -> Result<Vec<BufferFile>> {
        self.read(|conn| {
            let mut files = Vec::with_capacity(ids.len());
            for &id in ids {
                if let Some(file) = load_file(conn, FileKey::Id(id))? {
                    files.push(file);
                }
            }
            Ok(files)
        })
    }

    pub fn get_file(&self, logical_name: &str) -> Result<Option<BufferFile>> {
        self.read(|conn| load_file(conn, FileKey::Lfn(logical_name)))
    }

    /// All blocks still open, oldest first.
    pub fn list_open_blocks(&self) -> Result<Vec<Block>> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare_cached("SELECT name FROM blocks WHERE is_open = 1 ORDER BY created_at, id")
                .map_err(db_err)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            let mut blocks = Vec::with_capacity(names.len());
            for name in names {
                if let Some(block) = load_block(conn, &name)? {
                    blocks.push(block);
                }
            }
            Ok(blocks)
        })
    }

    pub fn get_block(&self, name: &str) -> Result<Option<Block>> {
        self.read(|conn| load_block(conn, name))
    }

    pub fn get_algorithm(&self, id: i64) -> Result<Option<Algorithm>> {
        self.read(|conn| {
            conn.prepare_cached(
                "SELECT id, app_name, app_family, app_version, pset_hash, pset_content, in_catalog \
                 FROM algorithms WHERE id = ?1",
            )
            .map_err(db_err)?
            .query_row(params![id], |row| {
                Ok(Algorithm {
                    id: row.get(0)?,
                    application_name: row.get(1)?,
                    application_family: row.get(2)?,
                    application_version: row.get(3)?,
                    param_set_hash: row.get(4)?,
                    param_set_content: row.get(5)?,
                    in_catalog: row.get(6)?,
                })
            })
            .optional()
            .map_err(db_err)
        })
    }

    pub fn get_dataset(&self, id: i64) -> Result<Option<Dataset>> {
        self.read(|conn| {
            conn.prepare_cached(
                "SELECT id, path, primary_dataset, processed_dataset, data_tier, algorithm_id, \
                 pairing_in_catalog FROM datasets WHERE id = ?1",
            )
            .map_err(db_err)?
            .query_row(params![id], |row| {
                Ok(Dataset {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    primary_dataset: row.get(2)?,
                    processed_dataset: row.get(3)?,
                    data_tier: row.get(4)?,
                    algorithm_id: row.get(5)?,
                    pairing_in_catalog: row.get(6)?,
                })
            })
            .optional()
            .map_err(db_err)
        })
    }

    pub fn get_pairing(&self, das_id: i64) -> Result<Option<Pairing>> {
        self.read(|conn| {
            conn.prepare_cached(
                "SELECT id, algorithm_id, dataset_id, in_catalog FROM dataset_algorithms WHERE id = ?1",
            )
            .map_err(db_err)?
            .query_row(params![das_id], |row| {
                Ok(Pairing {
                    id: row.get(0)?,
                    algorithm_id: row.get(1)?,
                    dataset_id: row.get(2)?,
                    in_catalog: row.get(3)?,
                })
            })
            .optional()
            .map_err(db_err)
        })
    }
}

// ---------------------------------------------------------------
// Row Mapping Helpers
// ---------------------------------------------------------------

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Persistence(e.to_string())
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn row_to_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingFileRow> {
    let pairing = Pairing {
        id: row.get("das_id")?,
        algorithm_id: row.get("algorithm_id")?,
        dataset_id: row.get("dataset_id")?,
        in_catalog: row.get("das_in_catalog")?,
    };
    Ok(PendingFileRow {
        file_id: row.get("file_id")?,
        logical_name: row.get("lfn")?,
        algorithm: Algorithm {
            id: pairing.algorithm_id,
            application_name: row.get("app_name")?,
            application_family: row.get("app_family")?,
            application_version: row.get("app_version")?,
            param_set_hash: row.get("pset_hash")?,
            param_set_content: row.get("pset_content")?,
            in_catalog: row.get("algo_in_catalog")?,
        },
        dataset: Dataset {
            id: pairing.dataset_id,
            path: row.get("path")?,
            primary_dataset: row.get("primary_dataset")?,
            processed_dataset: row.get("processed_dataset")?,
            data_tier: row.get("data_tier")?,
            algorithm_id: row.get("dataset_algorithm_id")?,
            pairing_in_catalog: row.get("pairing_in_catalog")?,
        },
        pairing,
    })
}

pub(crate) enum FileKey<'a> {
    Id(i64),
    Lfn(&'a str),
}

pub(crate) fn load_file(conn: &Connection, key: FileKey<'_>) -> Result<Option<BufferFile>> {
    const COLUMNS: &str =
        "SELECT id, lfn, size_bytes, event_count, checksum, das_id, status, last_modified FROM files";
    let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(BufferFile, String)> {
        let status: String = row.get(6)?;
        Ok((
            BufferFile {
                id: row.get(0)?,
                logical_name: row.get(1)?,
                size_bytes: row.get(2)?,
                event_count: row.get(3)?,
                checksum: row.get(4)?,
                das_id: row.get(5)?,
                status: FileStatus::Pending,
                last_modified: row.get(7)?,
                parents: Vec::new(),
                run_lumis: Vec::new(),
                locations: Vec::new(),
            },
            status,
        ))
    };
    let found = match key {
        FileKey::Id(id) => conn
            .prepare_cached(&format!("{} WHERE id = ?1", COLUMNS))
            .map_err(db_err)?
            .query_row(params![id], map)
            .optional(),
        FileKey::Lfn(lfn) => conn
            .prepare_cached(&format!("{} WHERE lfn = ?1", COLUMNS))
            .map_err(db_err)?
            .query_row(params![lfn], map)
            .optional(),
    }
    .map_err(db_err)?;

    let Some((mut file, status)) = found else {
        return Ok(None);
    };
    file.status = FileStatus::parse(&status)
        .ok_or_else(|| Error::DataIntegrity(format!("file {} has status {:?}", file.logical_name, status)))?;

    let mut stmt = conn
        .prepare_cached("SELECT parent_lfn FROM file_parents WHERE child_id = ?1 ORDER BY parent_lfn")
        .map_err(db_err)?;
    file.parents = stmt
        .query_map(params![file.id], |row| Ok(ParentFile { logical_name: row.get(0)? }))
        .map_err(db_err)?
        .collect::<rusqlite::Result<_>>()
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare_cached("SELECT run, lumi FROM file_runlumis WHERE file_id = ?1 ORDER BY run, lumi")
        .map_err(db_err)?;
    file.run_lumis = stmt
        .query_map(params![file.id], |row| Ok(RunLumi { run: row.get(0)?, lumi: row.get(1)? }))
        .map_err(db_err)?
        .collect::<rusqlite::Result<_>>()
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare_cached(
            "SELECT l.se_name FROM file_locations fl JOIN locations l ON l.id = fl.location_id \
             WHERE fl.file_id = ?1 ORDER BY l.se_name",
        )
        .map_err(db_err)?;
    file.locations = stmt
        .query_map(params![file.id], |row| row.get(0))
        .map_err(db_err)?
        .collect::<rusqlite::Result<_>>()
        .map_err(db_err)?;

    Ok(Some(file))
}

pub(crate) fn load_block(conn: &Connection, name: &str) -> Result<Option<Block>> {
    let block = conn
        .prepare_cached(
            "SELECT id, name, is_open, published_downstream, created_at FROM blocks WHERE name = ?1",
        )
        .map_err(db_err)?
        .query_row(params![name], |row| {
            Ok(Block {
                id: row.get(0)?,
                name: row.get(1)?,
                locations: Vec::new(),
                is_open: row.get(2)?,
                is_published_downstream: row.get(3)?,
                created_at: row.get(4)?,
                files: Vec::new(),
            })
        })
        .optional()
        .map_err(db_err)?;

    let Some(mut block) = block else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare_cached(
            "SELECT l.se_name FROM block_locations bl JOIN locations l ON l.id = bl.location_id \
             WHERE bl.block_id = ?1 ORDER BY l.se_name",
        )
        .map_err(db_err)?;
    block.locations = stmt
        .query_map(params![block.id], |row| row.get(0))
        .map_err(db_err)?
        .collect::<rusqlite::Result<_>>()
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare_cached("SELECT lfn FROM files WHERE block_id = ?1 ORDER BY lfn")
        .map_err(db_err)?;
    block.files = stmt
        .query_map(params![block.id], |row| row.get(0))
        .map_err(db_err)?
        .collect::<rusqlite::Result<_>>()
        .map_err(db_err)?;

    Ok(Some(block))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn test_store() -> (BufferStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::open(dir.path()).unwrap();
        (store, dir)
    }

    /// Register an algorithm + dataset + pairing; returns the DAS id.
    pub(crate) fn seed_pairing(store: &BufferStore, version: &str, path: &str) -> i64 {
        let algo = store
            .register_algorithm(&NewAlgorithm {
                application_name: "cmsRun".into(),
                application_family: "RECO".into(),
                application_version: version.into(),
                param_set_hash: "a1b2c3".into(),
                param_set_content: None,
            })
            .unwrap();
        let dataset = store
            .register_dataset(&NewDataset::from_path(path).unwrap())
            .unwrap();
        store.register_pairing(algo, dataset).unwrap()
    }

    pub(crate) fn pending_file(das_id: i64, lfn: &str) -> NewFile {
        NewFile {
            logical_name: lfn.into(),
            size_bytes: 1024,
            event_count: 10,
            checksum: "adler32:0badf00d".into(),
            das_id,
            parents: vec![],
            run_lumis: vec![RunLumi { run: 1, lumi: 1 }],
            locations: vec!["T1_US_FNAL".into()],
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let (store, _dir) = test_store();
        let first = seed_pairing(&store, "CMSSW_14_0_0", "/Cosmics/Run-v1/RAW");
        let second = seed_pairing(&store, "CMSSW_14_0_0", "/Cosmics/Run-v1/RAW");
        assert_eq!(first, second);

        let pairing = store.get_pairing(first).unwrap().unwrap();
        assert!(!pairing.in_catalog);
        let dataset = store.get_dataset(pairing.dataset_id).unwrap().unwrap();
        assert_eq!(dataset.algorithm_id, Some(pairing.algorithm_id));
    }

    #[test]
    fn test_add_and_hydrate_file() {
        let (store, _dir) = test_store();
        let das = seed_pairing(&store, "CMSSW_14_0_0", "/Cosmics/Run-v1/RECO");

        let mut file = pending_file(das, "/store/data/reco/1.root");
        file.parents = vec!["/store/data/raw/1.root".into(), "/store/data/raw/2.root".into()];
        file.run_lumis = vec![
            RunLumi { run: 1, lumi: 2 },
            RunLumi { run: 1, lumi: 2 },
            RunLumi { run: 1, lumi: 1 },
        ];
        file.locations = vec!["T1_US_FNAL".into(), "T2_CH_CERN".into()];
        let id = store.add_pending_file(&file).unwrap();

        let files = store.hydrate_files(&[id]).unwrap();
        assert_eq!(files.len(), 1);
        let f = &files[0];
        assert_eq!(f.status, FileStatus::Pending);
        assert_eq!(f.das_id, das);
        assert_eq!(f.parents.len(), 2);
        assert_eq!(f.parents[0].logical_name, "/store/data/raw/1.root");
        // run/lumi is a multiset: duplicates survive
        assert_eq!(f.run_lumis.len(), 3);
        assert_eq!(f.locations, vec!["T1_US_FNAL", "T2_CH_CERN"]);
    }

    #[test]
    fn test_duplicate_lfn_rejected() {
        let (store, _dir) = test_store();
        let das = seed_pairing(&store, "CMSSW_14_0_0", "/Cosmics/Run-v1/RECO");
        store.add_pending_file(&pending_file(das, "/store/x.root")).unwrap();
        let result = store.add_pending_file(&pending_file(das, "/store/x.root"));
        assert!(matches!(result, Err(Error::Persistence(_))));
    }

    #[test]
    fn test_hydrate_skips_missing_ids() {
        let (store, _dir) = test_store();
        let das = seed_pairing(&store, "CMSSW_14_0_0", "/Cosmics/Run-v1/RECO");
        let id = store.add_pending_file(&pending_file(das, "/store/x.root")).unwrap();
        let files = store.hydrate_files(&[9999, id]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, id);
    }

    #[test]
    fn test_pending_grouped_by_das() {
        let (store, _dir) = test_store();
        assert!(store.find_pending_grouped_by_das().unwrap().is_empty());

        let d1 = seed_pairing(&store, "CMSSW_14_0_0", "/A/B-v1/RAW");
        let d2 = seed_pairing(&store, "CMSSW_14_0_1", "/A/B-v1/RECO");
        store.add_pending_file(&pending_file(d1, "/store/a1.root")).unwrap();
        store.add_pending_file(&pending_file(d2, "/store/b1.root")).unwrap();
        store.add_pending_file(&pending_file(d1, "/store/a2.root")).unwrap();

        let groups = store.find_pending_grouped_by_das().unwrap();
        assert_eq!(groups.len(), 2);
        let g1 = &groups[&d1];
        assert_eq!(g1.len(), 2);
        assert_eq!(g1[0].logical_name, "/store/a1.root");
        assert_eq!(g1[1].logical_name, "/store/a2.root");
        // every row in a group resolves to the same algorithm and dataset
        assert_eq!(g1[0].algorithm, g1[1].algorithm);
        assert_eq!(g1[0].dataset, g1[1].dataset);
        assert_eq!(g1[0].dataset.path, "/A/B-v1/RAW");
        assert_eq!(groups[&d2][0].algorithm.application_version, "CMSSW_14_0_1");
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        {
            let store = BufferStore::open(dir.path()).unwrap();
            let das = seed_pairing(&store, "CMSSW_14_0_0", "/A/B-v1/RAW");
            store.add_pending_file(&pending_file(das, "/store/a1.root")).unwrap();
        }
        let store = BufferStore::open(dir.path()).unwrap();
        assert!(store.get_file("/store/a1.root").unwrap().is_some());
    }
}
