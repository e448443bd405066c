//! Sliding-window text chunker.
//!
//! Splits document text into windows of at most `chunk_size` characters,
//! with `chunk_overlap` characters shared between consecutive windows.
//! Windows are measured in Unicode scalar values, never bytes, so a window
//! boundary cannot split a multi-byte character.
//!
//! For text of length `L > overlap` the number of windows is
//! `ceil((L - overlap) / (chunk_size - overlap))`. Empty text produces no
//! chunks; text no longer than the overlap produces a single chunk.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::info;

use crate::config::{ChunkingConfig, Config};
use crate::db;
use crate::ingest::{fetch_documents, fetch_unindexed_documents};
use crate::models::{ChunkRecord, DocumentRecord};

/// Split `text` into overlapping character windows.
///
/// Returns an error when `chunk_overlap >= chunk_size`.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>> {
    if chunk_overlap >= chunk_size {
        bail!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            chunk_overlap,
            chunk_size
        );
    }

    // Byte offset of every char boundary, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let len = bounds.len();
    bounds.push(text.len());

    let mut chunks = Vec::new();
    if len == 0 {
        return Ok(chunks);
    }

    let step = chunk_size - chunk_overlap;
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(len);
        chunks.push(text[bounds[start]..bounds[end]].to_string());
        if end == len {
            break;
        }
        start += step;
    }
    Ok(chunks)
}

/// Chunk one document into records with contiguous indices from 0.
pub fn chunk_document(doc: &DocumentRecord, config: &ChunkingConfig) -> Result<Vec<ChunkRecord>> {
    let pieces = split_text(&doc.raw_text, config.chunk_size, config.chunk_overlap)?;
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| ChunkRecord {
            id: format!("{}-{}", doc.id, i),
            source_document_id: doc.id.clone(),
            chunk_index: i as i64,
            text,
            category: doc.category.as_str().to_string(),
            filename: doc.filename.clone(),
        })
        .collect())
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChunkStats {
    pub documents: usize,
    pub chunks: usize,
}

/// Chunk every processed document and write one JSON file per chunk.
///
/// Stale `chunk_*.json` files from an earlier run are removed first.
pub async fn chunk_documents(config: &Config) -> Result<ChunkStats> {
    let pool = db::connect_docstore(config).await?;
    let docs = fetch_documents(&pool).await?;
    pool.close().await;
    write_chunks(config, &docs)
}

/// Like [`chunk_documents`], restricted to documents that have nothing in
/// the vector store yet.
pub async fn chunk_new_documents(config: &Config) -> Result<ChunkStats> {
    let pool = db::connect_docstore(config).await?;
    let docs = fetch_unindexed_documents(&pool).await?;
    pool.close().await;
    write_chunks(config, &docs)
}

fn write_chunks(config: &Config, docs: &[DocumentRecord]) -> Result<ChunkStats> {
    let out_dir = &config.chunking.output_dir;
    prepare_output_dir(out_dir, "chunk_")?;

    let mut stats = ChunkStats {
        documents: docs.len(),
        chunks: 0,
    };
    for doc in docs {
        for chunk in chunk_document(doc, &config.chunking)? {
            write_chunk_file(out_dir, &chunk)?;
            stats.chunks += 1;
        }
    }

    info!(
        documents = stats.documents,
        chunks = stats.chunks,
        dir = %out_dir.display(),
        "chunking finished"
    );
    Ok(stats)
}

/// CLI entry point for `avrag chunk`.
pub async fn run_chunk(config: &Config) -> Result<()> {
    let stats = chunk_documents(config).await?;
    println!("chunk documents");
    println!("  documents: {}", stats.documents);
    println!("  chunks written: {}", stats.chunks);
    println!("  output: {}", config.chunking.output_dir.display());
    println!("ok");
    Ok(())
}

fn write_chunk_file(dir: &Path, chunk: &ChunkRecord) -> Result<()> {
    let path = dir.join(format!(
        "chunk_{}_{}.json",
        chunk.source_document_id, chunk.chunk_index
    ));
    let body = serde_json::to_string_pretty(chunk)?;
    std::fs::write(&path, body)
        .with_context(|| format!("Failed to write chunk file: {}", path.display()))
}

/// Read all chunk files from `dir`, ordered by document and index.
pub fn read_chunk_files(dir: &Path) -> Result<Vec<ChunkRecord>> {
    let mut chunks = Vec::new();
    if !dir.exists() {
        return Ok(chunks);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !(name.starts_with("chunk_") && name.ends_with(".json")) {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        let chunk: ChunkRecord = serde_json::from_str(&content)
            .with_context(|| format!("Malformed chunk file: {}", path.display()))?;
        chunks.push(chunk);
    }
    chunks.sort_by(|a, b| {
        a.source_document_id
            .cmp(&b.source_document_id)
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    Ok(chunks)
}

/// Create `dir` and delete files from a previous run carrying `prefix`.
pub(crate) fn prepare_output_dir(dir: &Path, prefix: &str) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output dir: {}", dir.display()))?;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let stale = path
            .file_name()
            .map(|n| {
                let n = n.to_string_lossy();
                n.starts_with(prefix) && n.ends_with(".json")
            })
            .unwrap_or(false);
        if stale {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::models::EmbeddingRecord;
    use chrono::Utc;
    use tempfile::TempDir;

    fn expected_count(len: usize, size: usize, overlap: usize) -> usize {
        if len == 0 {
            0
        } else if len <= overlap {
            1
        } else {
            (len - overlap).div_ceil(size - overlap)
        }
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_text("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_text("ETOPS", 1000, 200).unwrap();
        assert_eq!(chunks, vec!["ETOPS".to_string()]);
    }

    #[test]
    fn text_within_overlap_is_single_chunk() {
        let chunks = split_text("abc", 10, 5).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "abc");
    }

    #[test]
    fn overlap_not_smaller_than_size_is_rejected() {
        assert!(split_text("abc", 5, 5).is_err());
        assert!(split_text("abc", 5, 9).is_err());
    }

    #[test]
    fn count_and_overlap_hold_across_lengths() {
        for (size, overlap) in [(10, 3), (7, 0), (5, 4), (1000, 200), (4, 1)] {
            for len in 0..60 {
                let text: String = (0..len)
                    .map(|i| char::from(b'a' + (i % 26) as u8))
                    .collect();
                let chunks = split_text(&text, size, overlap).unwrap();
                assert_eq!(
                    chunks.len(),
                    expected_count(len, size, overlap),
                    "len={} size={} overlap={}",
                    len,
                    size,
                    overlap
                );
                for pair in chunks.windows(2) {
                    let prev: Vec<char> = pair[0].chars().collect();
                    let next: Vec<char> = pair[1].chars().collect();
                    assert_eq!(prev.len(), size);
                    assert_eq!(&prev[size - overlap..], &next[..overlap]);
                }
                if let Some(last) = chunks.last() {
                    assert!(text.ends_with(last.as_str()));
                }
            }
        }
    }

    #[test]
    fn windows_count_characters_not_bytes() {
        let text = "ÅÄÖ✈️ flight über München";
        let chunks = split_text(text, 5, 2).unwrap();
        let len = text.chars().count();
        assert_eq!(chunks.len(), expected_count(len, 5, 2));
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
    }

    #[test]
    fn chunk_files_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let doc = DocumentRecord {
            id: "doc1".to_string(),
            filename: "cargo_loading.txt".to_string(),
            raw_text: "x".repeat(25),
            source_path: "/data/cargo_loading.txt".to_string(),
            category: Category::Cargo,
            file_type: ".txt".to_string(),
            ingested_at: Utc::now(),
        };
        let config = ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 2,
            output_dir: dir.path().to_path_buf(),
        };
        let chunks = chunk_document(&doc, &config).unwrap();
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            write_chunk_file(dir.path(), chunk).unwrap();
        }
        assert!(dir.path().join("chunk_doc1_0.json").exists());

        let read = read_chunk_files(dir.path()).unwrap();
        assert_eq!(read, chunks);
        assert!(read.iter().all(|c| c.category == "cargo"));

        prepare_output_dir(dir.path(), "chunk_").unwrap();
        assert!(read_chunk_files(dir.path()).unwrap().is_empty());
    }

    fn store_config(root: &Path) -> Config {
        crate::config::parse_config(&format!(
            r#"
[warehouse]
path = "{root}/warehouse.sqlite"

[docstore]
path = "{root}/docs.sqlite"

[documents]
paths = ["{root}/docs"]

[chunking]
chunk_size = 400
chunk_overlap = 50
output_dir = "{root}/chunks"
"#,
            root = root.display()
        ))
        .unwrap()
    }

    async fn store_chunks_without_vectors(config: &Config) {
        let records: Vec<EmbeddingRecord> = read_chunk_files(&config.chunking.output_dir)
            .unwrap()
            .into_iter()
            .map(|chunk| EmbeddingRecord {
                chunk,
                embedding: None,
                metadata: serde_json::json!({}),
            })
            .collect();
        let pool = db::connect_docstore(config).await.unwrap();
        crate::vector_store::insert_records(&pool, &records, None)
            .await
            .unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn second_cycle_chunks_only_new_documents() {
        let dir = TempDir::new().unwrap();
        let config = store_config(dir.path());
        crate::migrate::run_migrations(&config).await.unwrap();
        crate::sample_data::write_sample_documents(&dir.path().join("docs")).unwrap();

        crate::ingest::process_documents(&config).await.unwrap();
        let first = chunk_new_documents(&config).await.unwrap();
        assert_eq!(first.documents, 5);
        let first_ids: Vec<String> = read_chunk_files(&config.chunking.output_dir)
            .unwrap()
            .into_iter()
            .map(|c| c.source_document_id)
            .collect();
        store_chunks_without_vectors(&config).await;

        crate::ingest::process_documents(&config).await.unwrap();
        let second = chunk_new_documents(&config).await.unwrap();
        assert_eq!(second.documents, 5);
        assert_eq!(second.chunks, first.chunks);
        let second_chunks = read_chunk_files(&config.chunking.output_dir).unwrap();
        assert_eq!(second_chunks.len(), second.chunks);
        assert!(second_chunks
            .iter()
            .all(|c| !first_ids.contains(&c.source_document_id)));

        store_chunks_without_vectors(&config).await;
        assert_eq!(chunk_new_documents(&config).await.unwrap().documents, 0);
        assert_eq!(chunk_documents(&config).await.unwrap().documents, 10);
    }
}
