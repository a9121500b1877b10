pub const SCHEMA: &str = r#"
-- Items: one row per cataloged image file
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    captured_at TEXT,                -- EXIF DateTimeOriginal when available
    added_at TEXT NOT NULL,          -- RFC 3339 ingestion timestamp
    metadata TEXT                    -- JSON blob (dimensions, camera, content hash)
);

CREATE INDEX IF NOT EXISTS idx_items_captured_at ON items(captured_at);

-- Embeddings: one row per detected face
CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    vector BLOB NOT NULL,            -- float32 array stored as little-endian bytes
    dim INTEGER NOT NULL,
    cluster_id INTEGER,              -- NULL until clustered, -1 for noise
    FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_embeddings_item ON embeddings(item_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_cluster ON embeddings(cluster_id);

-- Ingest history
CREATE TABLE IF NOT EXISTS ingest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    root TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    discovered INTEGER DEFAULT 0,
    ingested INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    faces_found INTEGER DEFAULT 0,
    status TEXT DEFAULT 'running'    -- 'running', 'completed', 'cancelled', 'failed'
);
"#;
