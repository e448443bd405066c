use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::chunk::{prepare_output_dir, read_chunk_files};
use crate::config::{Config, EmbeddingFailurePolicy};
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{ChunkRecord, EmbeddingRecord};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EmbedStats {
    pub processed: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// CLI entry point for `avrag embed`.
pub async fn run_embed(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let provider = embedding::create_provider(&config.embedding)?;
    let stats = generate_embeddings(config, provider.as_ref()).await?;

    println!("embed chunks");
    println!("  processed: {}", stats.processed);
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);
    println!("  output: {}", config.embedding.output_dir.display());
    println!("ok");
    Ok(())
}

/// Embed every chunk file and write `embedding_<n>.json` records.
///
/// Each non-empty chunk is embedded with one provider call. A failed call
/// yields a record with a null embedding unless the failure policy is
/// `abort`.
pub async fn generate_embeddings(
    config: &Config,
    provider: &dyn EmbeddingProvider,
) -> Result<EmbedStats> {
    let chunks = read_chunk_files(&config.chunking.output_dir)?;
    let out_dir = &config.embedding.output_dir;
    prepare_output_dir(out_dir, "embedding_")?;

    let mut stats = EmbedStats::default();
    for chunk in chunks {
        if chunk.text.trim().is_empty() {
            continue;
        }

        let input = truncate_chars(&chunk.text, config.embedding.max_input_chars);
        let embedding = match embedding::embed_query(provider, input).await {
            Ok(vec) => {
                stats.embedded += 1;
                Some(vec)
            }
            Err(e) => {
                if config.policy.embedding_failure == EmbeddingFailurePolicy::Abort {
                    return Err(e.context(format!("Embedding failed for chunk {}", chunk.id)));
                }
                warn!(chunk = %chunk.id, error = %e, "embedding failed, storing without vector");
                stats.failed += 1;
                None
            }
        };

        let record = to_record(chunk, embedding);
        write_embedding_file(out_dir, stats.processed, &record)?;
        stats.processed += 1;
    }

    info!(
        processed = stats.processed,
        embedded = stats.embedded,
        failed = stats.failed,
        model = provider.model_name(),
        "embedding generation finished"
    );
    Ok(stats)
}

fn to_record(chunk: ChunkRecord, embedding: Option<Vec<f32>>) -> EmbeddingRecord {
    let metadata = serde_json::json!({
        "source": "aviation_docs",
        "category": chunk.category,
        "filename": chunk.filename,
        "source_document_id": chunk.source_document_id,
        "chunk_index": chunk.chunk_index,
    });
    EmbeddingRecord {
        chunk,
        embedding,
        metadata,
    }
}

/// The first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn write_embedding_file(dir: &Path, n: usize, record: &EmbeddingRecord) -> Result<()> {
    let path = dir.join(format!("embedding_{}.json", n));
    std::fs::write(&path, serde_json::to_string(record)?)
        .with_context(|| format!("Failed to write embedding file: {}", path.display()))
}

/// Read all `embedding_<n>.json` files from `dir` in numeric order.
pub fn read_embedding_files(dir: &Path) -> Result<Vec<EmbeddingRecord>> {
    let mut numbered = Vec::new();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let n = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("embedding_"))
            .and_then(|n| n.strip_suffix(".json"))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(n) = n {
            let content = std::fs::read_to_string(&path)?;
            let record: EmbeddingRecord = serde_json::from_str(&content)
                .with_context(|| format!("Malformed embedding file: {}", path.display()))?;
            numbered.push((n, record));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, r)| r).collect())
}
