//! SQLite vector store.
//!
//! Chunks, their metadata and their embeddings live in a single SQLite file
//! inside the index directory. Embeddings are stored as little-endian `f32`
//! BLOBs and queries are answered with a brute-force scan.
//!
//! # Schema
//! - `config`: `(key TEXT PRIMARY KEY, value TEXT)` holding the embedding
//!   model name, dimension and distance metric
//! - `chunks`: `(chunk_id TEXT PRIMARY KEY, paper_name, page_num, text,
//!   metadata, embedding BLOB, embedding_dim)`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{DistanceMetric, StorageError, StorageResult, VectorStore};
use crate::models::{Chunk, EmbeddingConfig, Metadata, ScoredChunk};

/// File name of the database inside the index directory.
pub const INDEX_FILE_NAME: &str = "index.sqlite3";

const KEY_MODEL_NAME: &str = "model_name";
const KEY_DIMENSION: &str = "dimension";
const KEY_METRIC: &str = "distance_metric";

/// SQLite-backed [`VectorStore`].
///
/// Cloning is cheap and shares the underlying connection.
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    metric: DistanceMetric,
}

impl SqliteVectorStore {
    /// Open or create the index stored in `dir`.
    ///
    /// The directory is created if needed. A previously persisted distance
    /// metric is picked up; otherwise cosine distance is used.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            StorageError::ConnectionError(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let db_path = dir.join(INDEX_FILE_NAME);
        let conn = Connection::open(&db_path).map_err(|e| {
            StorageError::ConnectionError(format!("{}: {}", db_path.display(), e))
        })?;
        Self::from_connection(conn, db_path)
    }

    /// Open a throwaway in-memory index.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, db_path: PathBuf) -> StorageResult<Self> {
        create_schema(&conn)?;
        let metric = read_value(&conn, KEY_METRIC)?
            .map(|value| value.parse::<DistanceMetric>())
            .transpose()?
            .unwrap_or_default();

        debug!(path = %db_path.display(), metric = %metric, "Opened vector store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            metric,
        })
    }

    /// Use `metric` for scoring; persisted on the next `store_config`.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Other(format!("storage task failed: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StorageError::ConnectionError("connection mutex poisoned".to_string()))
}

fn create_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS config (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id      TEXT PRIMARY KEY,
            paper_name    TEXT NOT NULL,
            page_num      INTEGER NOT NULL,
            text          TEXT NOT NULL,
            metadata      TEXT NOT NULL,
            embedding     BLOB NOT NULL,
            embedding_dim INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_paper ON chunks(paper_name, page_num);
        ",
    )
    .map_err(|e| StorageError::SchemaError(e.to_string()))
}

fn read_value(conn: &Connection, key: &str) -> StorageResult<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM config WHERE key = ?1", params![key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?)
}

fn write_value(conn: &Connection, key: &str, value: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO config(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn read_config(conn: &Connection) -> StorageResult<Option<EmbeddingConfig>> {
    let model_name = read_value(conn, KEY_MODEL_NAME)?;
    let dimension = read_value(conn, KEY_DIMENSION)?;

    match (model_name, dimension) {
        (Some(model_name), Some(dimension)) => {
            let dimension = dimension.parse::<usize>().map_err(|e| {
                StorageError::SerializationError(format!("stored dimension {:?}: {}", dimension, e))
            })?;
            Ok(Some(EmbeddingConfig {
                model_name,
                dimension,
            }))
        }
        _ => Ok(None),
    }
}

/// Serialize an embedding vector as little-endian `f32` bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Deserialize a BLOB written by [`encode_embedding`].
pub fn decode_embedding(bytes: &[u8], expected_dim: usize) -> StorageResult<Vec<f32>> {
    if bytes.len() != expected_dim.saturating_mul(4) {
        return Err(StorageError::SerializationError(format!(
            "embedding blob of {} bytes does not hold {} floats",
            bytes.len(),
            expected_dim
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn check_records(
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
    expected_dim: Option<usize>,
) -> StorageResult<()> {
    if chunks.len() != embeddings.len() {
        return Err(StorageError::InvalidRecord(format!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }

    let expected = expected_dim.or_else(|| embeddings.first().map(Vec::len));
    let mut ids = HashSet::with_capacity(chunks.len());
    for (chunk, embedding) in chunks.iter().zip(embeddings) {
        // A repeated id would overwrite an earlier row of the same write
        if !ids.insert(chunk.id.as_str()) {
            return Err(StorageError::InvalidRecord(format!("duplicate chunk id {} in one write", chunk.id)));
        }
        if !chunk.metadata.is_storable() {
            return Err(StorageError::InvalidRecord(format!(
                "chunk {} lacks paper_name or page_num",
                chunk.id
            )));
        }
        if chunk.text.is_empty() {
            return Err(StorageError::InvalidRecord(format!("chunk {} has no text", chunk.id)));
        }
        if let Some(expected) = expected {
            if embedding.len() != expected {
                return Err(StorageError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }
    }
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn initialize(&mut self) -> StorageResult<()> {
        self.with_conn(|conn| create_schema(conn)).await
    }

    async fn clear(&mut self) -> StorageResult<()> {
        info!(path = %self.db_path.display(), "Clearing vector store");
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM chunks", [])?;
            tx.execute("DELETE FROM config", [])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn store_config(&mut self, config: &EmbeddingConfig) -> StorageResult<()> {
        let config = config.clone();
        let metric = self.metric;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            write_value(&tx, KEY_MODEL_NAME, &config.model_name)?;
            write_value(&tx, KEY_DIMENSION, &config.dimension.to_string())?;
            write_value(&tx, KEY_METRIC, metric.as_str())?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        self.with_conn(|conn| read_config(conn)).await
    }

    async fn upsert(&mut self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> StorageResult<usize> {
        if chunks.is_empty() && embeddings.is_empty() {
            return Ok(0);
        }

        let chunks = chunks.to_vec();
        let embeddings = embeddings.to_vec();
        let written = self
            .with_conn(move |conn| {
                let expected_dim = read_config(conn)?.map(|c| c.dimension);
                check_records(&chunks, &embeddings, expected_dim)?;

                let tx = conn.transaction()?;
                {
                    let mut statement = tx.prepare(
                        "INSERT INTO chunks(chunk_id, paper_name, page_num, text, metadata, embedding, embedding_dim)
                         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                         ON CONFLICT(chunk_id) DO UPDATE SET
                           paper_name = excluded.paper_name,
                           page_num = excluded.page_num,
                           text = excluded.text,
                           metadata = excluded.metadata,
                           embedding = excluded.embedding,
                           embedding_dim = excluded.embedding_dim",
                    )?;
                    for (chunk, embedding) in chunks.iter().zip(&embeddings) {
                        let metadata = serde_json::to_string(&chunk.metadata)
                            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
                        statement.execute(params![
                            chunk.id,
                            chunk.metadata.paper_name().unwrap_or_default(),
                            chunk.metadata.page_num().unwrap_or_default() as i64,
                            chunk.text,
                            metadata,
                            encode_embedding(embedding),
                            embedding.len() as i64,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(chunks.len())
            })
            .await?;

        debug!(written, "Upserted chunks");
        Ok(written)
    }

    async fn query(&self, embedding: &[f32], k: usize) -> StorageResult<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(vec![]);
        }

        let query = embedding.to_vec();
        let metric = self.metric;
        self.with_conn(move |conn| {
            if let Some(config) = read_config(conn)? {
                if config.dimension != query.len() {
                    return Err(StorageError::DimensionMismatch {
                        expected: config.dimension,
                        actual: query.len(),
                    });
                }
            }

            let mut statement =
                conn.prepare("SELECT chunk_id, text, metadata, embedding, embedding_dim FROM chunks")?;
            let mut rows = statement.query([])?;

            let mut scored = Vec::new();
            while let Some(row) = rows.next()? {
                let dim = row.get::<_, i64>(4)? as usize;
                let blob = row.get::<_, Vec<u8>>(3)?;
                let candidate = decode_embedding(&blob, dim)?;
                if candidate.len() != query.len() {
                    return Err(StorageError::DimensionMismatch {
                        expected: candidate.len(),
                        actual: query.len(),
                    });
                }

                let metadata_json = row.get::<_, String>(2)?;
                let metadata: Metadata = serde_json::from_str(&metadata_json)
                    .map_err(|e| StorageError::SerializationError(e.to_string()))?;
                let chunk = Chunk::new(row.get(0)?, row.get(1)?, metadata);

                scored.push(ScoredChunk {
                    chunk,
                    score: metric.score(&query, &candidate),
                });
            }

            let order = metric.score_order();
            scored.sort_by(|a, b| order.compare(a.score, b.score));
            scored.truncate(k);
            Ok(scored)
        })
        .await
    }

    async fn count(&self) -> StorageResult<usize> {
        self.with_conn(|conn| {
            let n = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))?;
            Ok(n as usize)
        })
        .await
    }

    fn distance_metric(&self) -> DistanceMetric {
        self.metric
    }
}
