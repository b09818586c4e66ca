//! Persistent vector index over chunk embeddings, backed by SQLite.
//!
//! The index owns its embedding model. The model identity and dimension are
//! pinned in `index_meta` on the first write, and an index cannot be opened
//! with a different model, since mixing models silently ruins relevance.

use crate::embeddings::{embed_checked, EmbeddingError};
use crate::models::{Chunk, RetrievalHit};
use crate::search::{cosine_distance, nearest, Scored};
use providers::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use storage::models::{decode_vector, encode_vector, ChunkRow, EmbeddingRow, IndexMeta};
use thiserror::Error;
use tracing::{debug, info, warn};

const META_MODEL: &str = "embedding_model";
const META_DIMENSION: &str = "embedding_dimension";
const META_CREATED_AT: &str = "created_at";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(
        "index was built with embedding model {stored} ({stored_dimension} dims), \
         but {configured} ({configured_dimension} dims) is configured; rebuild the index"
    )]
    ModelMismatch {
        stored: String,
        stored_dimension: usize,
        configured: String,
        configured_dimension: usize,
    },
    #[error("corrupt index metadata: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub embedding_dimension: usize,
    pub embedding_model: String,
    /// When the model was pinned, i.e. the first successful write.
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Outcome of [`VectorIndex::add`]. Compare `stored` with `submitted` to
/// detect incomplete ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReport {
    pub submitted: usize,
    pub stored: usize,
    pub skipped_empty: usize,
    pub duplicates: usize,
    pub failed_batches: usize,
}

#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embeds and persists chunks in batches. A failing batch is logged and
    /// skipped; the rest of the call proceeds.
    async fn add(&self, chunks: &[Chunk]) -> Result<AddReport, IndexError>;

    /// Nearest chunks to `query`, ascending by distance, at most `k`.
    /// An empty index yields an empty result.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>, IndexError>;

    async fn stats(&self) -> Result<IndexStats, IndexError>;

    /// Deletes every chunk and the model pin.
    async fn clear(&self) -> Result<(), IndexError>;
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl SqliteVectorIndex {
    /// Opens an index on a migrated pool, refusing a mismatched embedding model.
    pub async fn open(
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Result<Self, IndexError> {
        let index = Self {
            pool,
            embedder,
            batch_size: batch_size.max(1),
        };
        index.check_model_pin().await?;
        Ok(index)
    }

    /// Connects to (and migrates) the SQLite database at `database_path`.
    pub async fn connect(
        database_path: &str,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> anyhow::Result<Self> {
        let pool = storage::connect(database_path).await?;
        storage::migrate(&pool).await?;
        Ok(Self::open(pool, embedder, batch_size).await?)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn read_meta(&self, key: &str) -> Result<Option<String>, IndexError> {
        let row = sqlx::query_as::<_, IndexMeta>("SELECT key, value FROM index_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|m| m.value))
    }

    async fn pinned_model(&self) -> Result<Option<(String, usize)>, IndexError> {
        let model = self.read_meta(META_MODEL).await?;
        let dimension = self.read_meta(META_DIMENSION).await?;
        match (model, dimension) {
            (Some(model), Some(dim)) => {
                let dim = dim
                    .parse::<usize>()
                    .map_err(|_| IndexError::Corrupt(format!("embedding_dimension = {dim:?}")))?;
                Ok(Some((model, dim)))
            }
            (None, None) => Ok(None),
            _ => Err(IndexError::Corrupt(
                "embedding model pin is incomplete".to_string(),
            )),
        }
    }

    async fn check_model_pin(&self) -> Result<(), IndexError> {
        let configured = self.embedder.model_id();
        let configured_dimension = self.embedder.dimension();
        if let Some((stored, stored_dimension)) = self.pinned_model().await? {
            if stored != configured || stored_dimension != configured_dimension {
                return Err(IndexError::ModelMismatch {
                    stored,
                    stored_dimension,
                    configured,
                    configured_dimension,
                });
            }
        }
        Ok(())
    }

    async fn pin_model(&self) -> Result<(), IndexError> {
        for (key, value) in [
            (META_MODEL, self.embedder.model_id()),
            (META_DIMENSION, self.embedder.dimension().to_string()),
            (META_CREATED_AT, chrono::Utc::now().to_rfc3339()),
        ] {
            sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        // Another writer may have pinned first.
        self.check_model_pin().await
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn store_batch(
        &self,
        batch: &[&Chunk],
        vectors: Vec<Vec<f32>>,
        first_position: i64,
    ) -> Result<usize, IndexError> {
        let mut tx = self.pool.begin().await?;
        let mut stored = 0usize;
        for (offset, (chunk, vector)) in batch.iter().zip(vectors).enumerate() {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO chunks
                    (id, position, text, source, url, title, section, credibility, organization, source_type, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(&chunk.id)
            .bind(first_position + offset as i64)
            .bind(&chunk.text)
            .bind(&chunk.source)
            .bind(&chunk.url)
            .bind(&chunk.title)
            .bind(&chunk.section)
            .bind(&chunk.credibility)
            .bind(&chunk.organization)
            .bind(&chunk.source_type)
            .bind(encode_vector(&vector))
            .execute(&mut *tx)
            .await?;
            stored += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn fetch_chunks<'a>(
        &self,
        ids: impl Iterator<Item = &'a str>,
    ) -> Result<HashMap<String, Chunk>, IndexError> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, position, text, source, url, title, section, credibility, \
             organization, source_type, embedding FROM chunks WHERE id IN (",
        );
        let mut list = query.separated(", ");
        for id in ids {
            list.push_bind(id);
        }
        list.push_unseparated(")");
        let rows: Vec<ChunkRow> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.id.clone(), row_to_chunk(row)))
            .collect())
    }
}

fn row_to_chunk(row: ChunkRow) -> Chunk {
    Chunk {
        id: row.id,
        text: row.text,
        source: row.source,
        url: row.url,
        title: row.title,
        section: row.section,
        credibility: row.credibility,
        organization: row.organization,
        source_type: row.source_type,
    }
}

#[async_trait::async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn add(&self, chunks: &[Chunk]) -> Result<AddReport, IndexError> {
        let mut report = AddReport {
            submitted: chunks.len(),
            ..AddReport::default()
        };
        let valid: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect();
        report.skipped_empty = chunks.len() - valid.len();
        if report.skipped_empty > 0 {
            warn!(count = report.skipped_empty, "skipping chunks with empty text");
        }
        if valid.is_empty() {
            return Ok(report);
        }

        self.pin_model().await?;
        let mut next_position: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(position) + 1, 0) FROM chunks")
                .fetch_one(&self.pool)
                .await?;

        let total_batches = valid.len().div_ceil(self.batch_size);
        for (batch_no, batch) in valid.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match embed_checked(self.embedder.as_ref(), &texts).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(batch = batch_no + 1, total_batches, "embedding batch failed: {}", e);
                    report.failed_batches += 1;
                    continue;
                }
            };
            match self.store_batch(batch, vectors, next_position).await {
                Ok(stored) => {
                    report.stored += stored;
                    report.duplicates += batch.len() - stored;
                    next_position += batch.len() as i64;
                    debug!(batch = batch_no + 1, total_batches, stored, "batch stored");
                }
                Err(e) => {
                    warn!(batch = batch_no + 1, total_batches, "storing batch failed: {}", e);
                    report.failed_batches += 1;
                }
            }
        }

        info!(
            submitted = report.submitted,
            stored = report.stored,
            failed_batches = report.failed_batches,
            "chunks added to index"
        );
        Ok(report)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>, IndexError> {
        if k == 0 || self.count().await? == 0 {
            return Ok(Vec::new());
        }
        let query_vector = embed_checked(self.embedder.as_ref(), &[query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        // Score on embeddings alone; full rows are loaded for the winners only.
        let rows: Vec<EmbeddingRow> =
            sqlx::query_as("SELECT id, position, embedding FROM chunks")
                .fetch_all(&self.pool)
                .await?;

        let dimension = query_vector.len();
        let candidates = rows.into_iter().filter_map(|row| match decode_vector(&row.embedding) {
            Some(vector) if vector.len() == dimension => Some(Scored {
                distance: cosine_distance(&query_vector, &vector),
                item: row.id,
                position: row.position,
            }),
            _ => {
                warn!(id = %row.id, "stored embedding has the wrong shape; skipped");
                None
            }
        });
        let winners = nearest(candidates, k);
        if winners.is_empty() {
            return Ok(Vec::new());
        }

        let mut chunks = self
            .fetch_chunks(winners.iter().map(|s| s.item.as_str()))
            .await?;
        Ok(winners
            .into_iter()
            .filter_map(|s| {
                chunks.remove(&s.item).map(|chunk| RetrievalHit {
                    chunk,
                    distance: s.distance,
                })
            })
            .collect())
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let total_chunks = self.count().await?;
        let (embedding_model, embedding_dimension) = match self.pinned_model().await? {
            Some(pin) => pin,
            None => (self.embedder.model_id(), self.embedder.dimension()),
        };
        let created_at = self
            .read_meta(META_CREATED_AT)
            .await?
            .and_then(|v| chrono::DateTime::parse_from_rfc3339(&v).ok())
            .map(|t| t.with_timezone(&chrono::Utc));
        Ok(IndexStats {
            total_chunks,
            embedding_dimension,
            embedding_model,
            created_at,
        })
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        info!(deleted = deleted.rows_affected(), "index cleared");
        Ok(())
    }
}

/// Distinct `(source, url)` pairs currently indexed.
pub async fn indexed_documents(pool: &SqlitePool) -> Result<usize, IndexError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM (SELECT DISTINCT source, url FROM chunks)")
        .fetch_one(pool)
        .await?;
    Ok(row.try_get::<i64, _>("n")? as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::hashing::HashingEmbedder;
    use providers::{EmbedResponse, ProviderError};

    fn chunk(id: &str, text: &str, source: &str, url: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            source: source.to_string(),
            url: url.to_string(),
            title: format!("{source} page"),
            section: "Summary".to_string(),
            credibility: "high".to_string(),
            organization: source.to_string(),
            source_type: "government".to_string(),
        }
    }

    async fn memory_index(name: &str, embedder: Arc<dyn EmbeddingProvider>) -> SqliteVectorIndex {
        let url = format!("sqlite://file:{name}?mode=memory&cache=shared");
        SqliteVectorIndex::connect(&url, embedder, 2).await.unwrap()
    }

    /// Fails any batch containing the marker text.
    struct FlakyEmbedder(HashingEmbedder);

    #[async_trait::async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
            if texts.iter().any(|t| t.contains("FAIL")) {
                return Err(ProviderError::RequestFailed("boom".into()));
            }
            self.0.embed(texts).await
        }

        fn model_id(&self) -> String {
            self.0.model_id()
        }

        fn dimension(&self) -> usize {
            self.0.dimension()
        }
    }

    #[tokio::test]
    async fn exact_text_query_returns_the_chunk_first() {
        let index = memory_index("vs_roundtrip", Arc::new(HashingEmbedder::new(384))).await;
        index
            .add(&[
                chunk("a", "Asthma narrows the airways in the lungs.", "CDC", "u1"),
                chunk("b", "Diabetes is a condition of high blood sugar.", "CDC", "u2"),
                chunk("c", "Measles is a highly contagious virus.", "MedlinePlus", "u3"),
            ])
            .await
            .unwrap();

        let hits = index
            .search("Diabetes is a condition of high blood sugar.", 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.id, "b");
        assert!(hits[0].distance < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(index.search("anything", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn winners_come_back_with_their_metadata_in_rank_order() {
        let index = memory_index("vs_winners", Arc::new(HashingEmbedder::new(384))).await;
        let mut flu = chunk("flu", "Influenza spreads through droplets.", "CDC", "u1");
        flu.section = "How Flu Spreads".to_string();
        index
            .add(&[
                chunk("mumps", "Mumps causes swollen salivary glands.", "MedlinePlus", "u2"),
                flu,
                chunk("rsv", "Influenza and RSV spread through droplets.", "CDC", "u3"),
            ])
            .await
            .unwrap();

        let hits = index
            .search("Influenza spreads through droplets.", 2)
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["flu", "rsv"]);
        assert_eq!(hits[0].chunk.section, "How Flu Spreads");
        assert_eq!(hits[0].chunk.url, "u1");
        assert_eq!(hits[0].chunk.title, "CDC page");
        assert_eq!(hits[1].chunk.text, "Influenza and RSV spread through droplets.");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn empty_index_returns_no_hits() {
        let index = memory_index("vs_empty", Arc::new(HashingEmbedder::new(384))).await;
        assert!(index.search("What is diabetes?", 5).await.unwrap().is_empty());
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.embedding_dimension, 384);
        assert!(stats.created_at.is_none());
    }

    #[tokio::test]
    async fn failed_batch_is_skipped_not_fatal() {
        let index = memory_index(
            "vs_flaky",
            Arc::new(FlakyEmbedder(HashingEmbedder::new(64))),
        )
        .await;
        let report = index
            .add(&[
                chunk("1", "first good chunk", "CDC", "u"),
                chunk("2", "second good chunk", "CDC", "u"),
                chunk("3", "FAIL this batch", "CDC", "u"),
                chunk("4", "paired with failure", "CDC", "u"),
                chunk("5", "last good chunk", "CDC", "u"),
                chunk("6", "   ", "CDC", "u"),
            ])
            .await
            .unwrap();
        assert_eq!(report.submitted, 6);
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.stored, 3);
        assert_eq!(index.stats().await.unwrap().total_chunks, 3);
    }

    #[tokio::test]
    async fn duplicate_ids_are_not_stored_twice() {
        let index = memory_index("vs_dupes", Arc::new(HashingEmbedder::new(32))).await;
        let c = chunk("same", "Influenza spreads through droplets.", "CDC", "u");
        index.add(&[c.clone()]).await.unwrap();
        let report = index.add(&[c]).await.unwrap();
        assert_eq!(report.stored, 0);
        assert_eq!(report.duplicates, 1);
        assert_eq!(index.stats().await.unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn reopening_with_another_model_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        let db = db.to_str().unwrap();

        let index = SqliteVectorIndex::connect(db, Arc::new(HashingEmbedder::new(384)), 10)
            .await
            .unwrap();
        index
            .add(&[chunk("a", "Hepatitis affects the liver.", "CDC", "u")])
            .await
            .unwrap();
        index.pool().close().await;

        let reopened = SqliteVectorIndex::connect(db, Arc::new(HashingEmbedder::new(384)), 10)
            .await
            .unwrap();
        assert_eq!(reopened.stats().await.unwrap().total_chunks, 1);
        assert_eq!(indexed_documents(reopened.pool()).await.unwrap(), 1);
        reopened.pool().close().await;

        let err = SqliteVectorIndex::connect(db, Arc::new(HashingEmbedder::new(128)), 10)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::ModelMismatch { stored_dimension: 384, configured_dimension: 128, .. })
        ));
    }

    #[tokio::test]
    async fn clear_wipes_chunks_and_model_pin() {
        let index = memory_index("vs_clear", Arc::new(HashingEmbedder::new(16))).await;
        index
            .add(&[chunk("a", "Tetanus is a bacterial infection.", "CDC", "u")])
            .await
            .unwrap();
        index.clear().await.unwrap();
        assert_eq!(index.stats().await.unwrap().total_chunks, 0);
        assert!(index.pinned_model().await.unwrap().is_none());
        assert!(index.search("tetanus", 3).await.unwrap().is_empty());
    }
}
