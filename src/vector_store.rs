//! The vector-bearing document collection.
//!
//! Embedding records are stored in `embedded_documents` with the vector as
//! a little-endian f32 BLOB (NULL when embedding failed). The collection's
//! search index is a declarative row in `search_indexes`; similarity search
//! itself is a cosine scan over every stored vector.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::embed_cmd::read_embedding_files;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{EmbeddingRecord, SearchHit};

pub const COLLECTION: &str = "embedded_documents";

/// Gate failures of [`validate_vector_store`]. Never retried.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("no embeddings found ({total} documents in the vector store)")]
    NoEmbeddings { total: i64 },
    #[error(
        "only {embedded} of {total} documents have embeddings (minimum ratio {min_ratio})"
    )]
    BelowThreshold {
        embedded: i64,
        total: i64,
        min_ratio: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub total: i64,
    pub embedded: i64,
}

/// Declared search index over the collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub path: String,
    pub dims: usize,
    pub similarity: String,
    pub filter_path: String,
}

impl IndexDefinition {
    pub fn for_config(config: &Config) -> Self {
        Self {
            name: config.index.name.clone(),
            path: "embedding".to_string(),
            dims: config.embedding.dims.unwrap_or(0),
            similarity: "cosine".to_string(),
            filter_path: "metadata.category".to_string(),
        }
    }
}

/// Load every `embedding_*.json` file into the collection in one transaction.
pub async fn store_embeddings(config: &Config) -> Result<usize> {
    let records = read_embedding_files(&config.embedding.output_dir)?;
    let pool = db::connect_docstore(config).await?;
    let stored = insert_records(&pool, &records, config.embedding.model.as_deref()).await?;
    pool.close().await;

    info!(stored, collection = COLLECTION, "embeddings stored");
    Ok(stored)
}

/// Insert or replace records keyed by chunk id.
pub async fn insert_records(
    pool: &SqlitePool,
    records: &[EmbeddingRecord],
    model: Option<&str>,
) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    let now = Utc::now().to_rfc3339();

    let mut tx = pool.begin().await?;
    for record in records {
        let blob = record.embedding.as_deref().map(vec_to_blob);
        let dims = record.embedding.as_ref().map(|v| v.len() as i64);
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO embedded_documents
                (id, source_document_id, chunk_index, filename, category, text, embedding, dims, model, metadata_json, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.chunk.id)
        .bind(&record.chunk.source_document_id)
        .bind(record.chunk.chunk_index)
        .bind(&record.chunk.filename)
        .bind(&record.chunk.category)
        .bind(&record.chunk.text)
        .bind(blob)
        .bind(dims)
        .bind(model)
        .bind(record.metadata.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(records.len())
}

/// Declare the search index. Re-declaring replaces the previous definition.
pub async fn create_vector_index(pool: &SqlitePool, def: &IndexDefinition) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO search_indexes (name, collection, path, dims, similarity, filter_path, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            path = excluded.path,
            dims = excluded.dims,
            similarity = excluded.similarity,
            filter_path = excluded.filter_path,
            created_at = excluded.created_at
        "#,
    )
    .bind(&def.name)
    .bind(COLLECTION)
    .bind(&def.path)
    .bind(def.dims as i64)
    .bind(&def.similarity)
    .bind(&def.filter_path)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    info!(index = %def.name, dims = def.dims, "vector index declared");
    Ok(())
}

/// Index creation as a pipeline stage: failures are logged, never raised.
pub async fn create_vector_index_stage(config: &Config) -> Result<()> {
    let def = IndexDefinition::for_config(config);
    let result = async {
        let pool = db::connect_docstore(config).await?;
        create_vector_index(&pool, &def).await?;
        pool.close().await;
        anyhow::Ok(())
    }
    .await;

    if let Err(e) = result {
        error!(index = %def.name, error = %e, "vector index creation failed, continuing");
    }
    Ok(())
}

pub async fn fetch_index(pool: &SqlitePool, name: &str) -> Result<Option<IndexDefinition>> {
    let row = sqlx::query(
        "SELECT name, path, dims, similarity, filter_path FROM search_indexes WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| IndexDefinition {
        name: row.get("name"),
        path: row.get("path"),
        dims: row.get::<i64, _>("dims") as usize,
        similarity: row.get("similarity"),
        filter_path: row.get("filter_path"),
    }))
}

/// Apply the embedding-coverage gate to raw counts.
pub fn check_coverage(total: i64, embedded: i64, min_ratio: f64) -> Result<(), ValidationError> {
    if embedded == 0 {
        return Err(ValidationError::NoEmbeddings { total });
    }
    if (embedded as f64) < min_ratio * (total as f64) - 1e-9 {
        return Err(ValidationError::BelowThreshold {
            embedded,
            total,
            min_ratio,
        });
    }
    Ok(())
}

/// Count documents and embedded documents, then apply the coverage gate.
pub async fn validate_vector_store(pool: &SqlitePool, min_ratio: f64) -> Result<ValidationReport> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedded_documents")
        .fetch_one(pool)
        .await?;
    let embedded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM embedded_documents WHERE embedding IS NOT NULL")
            .fetch_one(pool)
            .await?;

    check_coverage(total, embedded, min_ratio)?;
    info!(total, embedded, "vector store validated");
    Ok(ValidationReport { total, embedded })
}

/// Top-`k` rows by cosine similarity to `query`, optionally restricted to a category.
pub async fn search(
    pool: &SqlitePool,
    query: &[f32],
    k: usize,
    category: Option<&str>,
) -> Result<Vec<SearchHit>> {
    // Fetch all vectors and compute cosine similarity in Rust
    let rows = match category {
        Some(c) => {
            sqlx::query(
                "SELECT id, text, category, embedding, metadata_json FROM embedded_documents \
                 WHERE embedding IS NOT NULL AND category = ?",
            )
            .bind(c)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, text, category, embedding, metadata_json FROM embedded_documents \
                 WHERE embedding IS NOT NULL",
            )
            .fetch_all(pool)
            .await?
        }
    };

    let mut hits: Vec<SearchHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            let metadata_json: String = row.get("metadata_json");
            SearchHit {
                id: row.get("id"),
                text: row.get("text"),
                category: row.get("category"),
                score: cosine_similarity(query, &vec),
                metadata: serde_json::from_str(&metadata_json)
                    .unwrap_or(serde_json::Value::Null),
            }
        })
        .collect();

    // Sort by similarity desc and take top K
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    Ok(hits)
}

/// CLI entry point for `avrag index`: store embeddings, then declare the index.
pub async fn run_index(config: &Config) -> Result<()> {
    let stored = store_embeddings(config).await?;
    let pool = db::connect_docstore(config).await?;
    let def = IndexDefinition::for_config(config);
    create_vector_index(&pool, &def).await?;
    pool.close().await;

    println!("index embeddings");
    println!("  stored: {}", stored);
    println!("  index: {} ({} dims, {})", def.name, def.dims, def.similarity);
    println!("ok");
    Ok(())
}

/// CLI entry point for `avrag validate`.
pub async fn run_validate(config: &Config) -> Result<()> {
    let pool = db::connect_docstore(config).await?;
    let report = validate_vector_store(&pool, config.validation.min_embedded_ratio).await?;
    pool.close().await;

    println!("validate vector store");
    println!("  documents: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("ok");
    Ok(())
}
