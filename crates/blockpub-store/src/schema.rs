//! Database schema SQL.

/// Catalog entities: algorithms, datasets and their pairings.
pub const ENTITY_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS algorithms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    app_name TEXT NOT NULL,
    app_family TEXT NOT NULL,
    app_version TEXT NOT NULL,
    pset_hash TEXT NOT NULL,
    pset_content TEXT,
    in_catalog INTEGER NOT NULL DEFAULT 0,
    UNIQUE (app_name, app_version, app_family, pset_hash)
);

CREATE TABLE IF NOT EXISTS datasets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    primary_dataset TEXT NOT NULL,
    processed_dataset TEXT NOT NULL,
    data_tier TEXT NOT NULL,
    algorithm_id INTEGER REFERENCES algorithms(id),
    pairing_in_catalog INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS dataset_algorithms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    algorithm_id INTEGER NOT NULL REFERENCES algorithms(id),
    dataset_id INTEGER NOT NULL REFERENCES datasets(id),
    in_catalog INTEGER NOT NULL DEFAULT 0,
    UNIQUE (algorithm_id, dataset_id)
);
"#;

/// Storage locations and blocks.
pub const BLOCK_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    se_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    is_open INTEGER NOT NULL DEFAULT 1,
    published_downstream INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blocks_open ON blocks(is_open);

CREATE TABLE IF NOT EXISTS block_locations (
    block_id INTEGER NOT NULL REFERENCES blocks(id),
    location_id INTEGER NOT NULL REFERENCES locations(id),
    PRIMARY KEY (block_id, location_id)
);
"#;

/// Files and their parents, run/lumi pairs and locations.
pub const FILE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lfn TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL,
    event_count INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    das_id INTEGER NOT NULL REFERENCES dataset_algorithms(id),
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'in_catalog')),
    block_id INTEGER REFERENCES blocks(id),
    last_modified INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_status_das ON files(status, das_id);
CREATE INDEX IF NOT EXISTS idx_files_block ON files(block_id);

CREATE TABLE IF NOT EXISTS file_parents (
    child_id INTEGER NOT NULL REFERENCES files(id),
    parent_lfn TEXT NOT NULL,
    PRIMARY KEY (child_id, parent_lfn)
);

CREATE TABLE IF NOT EXISTS file_runlumis (
    file_id INTEGER NOT NULL REFERENCES files(id),
    run INTEGER NOT NULL,
    lumi INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runlumis_file ON file_runlumis(file_id);

CREATE TABLE IF NOT EXISTS file_locations (
    file_id INTEGER NOT NULL REFERENCES files(id),
    location_id INTEGER NOT NULL REFERENCES locations(id),
    PRIMARY KEY (file_id, location_id)
);
"#;
