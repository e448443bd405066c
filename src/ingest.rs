//! Document ingestion: scan, extract, categorise, and bulk-insert.
//!
//! Every run inserts fresh records with new ids; re-ingesting the same file
//! produces a second copy.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::category::{categorize, Category};
use crate::config::{Config, DocumentsConfig};
use crate::connector_fs;
use crate::db;
use crate::extract::{extract_text, FileType};
use crate::models::DocumentRecord;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestStats {
    pub files_found: usize,
    pub documents_inserted: usize,
    pub skipped: usize,
}

/// Ingest all configured document paths into `processed_documents`.
pub async fn process_documents(config: &Config) -> Result<IngestStats> {
    let (records, files_found) = load_documents(&config.documents)?;
    let pool = db::connect_docstore(config).await?;
    let inserted = insert_documents(&pool, &records).await?;
    pool.close().await;

    let stats = IngestStats {
        files_found,
        documents_inserted: inserted,
        skipped: files_found - records.len(),
    };
    info!(
        files = stats.files_found,
        inserted = stats.documents_inserted,
        skipped = stats.skipped,
        "document ingestion finished"
    );
    Ok(stats)
}

/// CLI entry point for `avrag ingest`.
pub async fn run_ingest(config: &Config) -> Result<()> {
    let stats = process_documents(config).await?;
    println!("ingest documents");
    println!("  files found: {}", stats.files_found);
    println!("  documents inserted: {}", stats.documents_inserted);
    println!("  skipped: {}", stats.skipped);
    println!("ok");
    Ok(())
}

/// Scan and extract documents. Returns the records and the number of files found.
pub fn load_documents(config: &DocumentsConfig) -> Result<(Vec<DocumentRecord>, usize)> {
    let files = connector_fs::scan_documents(config)?;
    let found = files.len();
    let mut records = Vec::with_capacity(found);

    for path in &files {
        match read_document(path) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => warn!(path = %path.display(), "no text extracted, skipping"),
            Err(e) => warn!(path = %path.display(), error = %e, "extraction failed, skipping"),
        }
    }
    Ok((records, found))
}

/// Build a record for a single file. `Ok(None)` when the text is blank.
fn read_document(path: &Path) -> Result<Option<DocumentRecord>> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_type = FileType::from_extension(&ext)
        .ok_or_else(|| crate::extract::ExtractError::UnsupportedFileType(ext.clone()))?;

    let bytes = std::fs::read(path)?;
    let text = extract_text(&bytes, file_type)?;
    if text.trim().is_empty() {
        return Ok(None);
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Some(DocumentRecord {
        id: Uuid::new_v4().to_string(),
        category: categorize(&filename),
        filename,
        raw_text: text,
        source_path: path.display().to_string(),
        file_type: file_type.as_suffix().to_string(),
        ingested_at: Utc::now(),
    }))
}

/// Insert all records in one transaction.
pub async fn insert_documents(pool: &SqlitePool, records: &[DocumentRecord]) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    for record in records {
        sqlx::query(
            r#"
            INSERT INTO processed_documents (id, filename, content, file_path, category, file_type, processed_at, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.filename)
        .bind(&record.raw_text)
        .bind(&record.source_path)
        .bind(record.category.as_str())
        .bind(&record.file_type)
        .bind(record.ingested_at.to_rfc3339())
        .bind(record.metadata().to_string())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(records.len())
}

/// All processed documents, oldest first.
pub async fn fetch_documents(pool: &SqlitePool) -> Result<Vec<DocumentRecord>> {
    let rows = sqlx::query(
        "SELECT id, filename, content, file_path, category, file_type, processed_at \
         FROM processed_documents ORDER BY processed_at, id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_document).collect())
}

/// Processed documents with no rows in `embedded_documents` yet, oldest first.
pub async fn fetch_unindexed_documents(pool: &SqlitePool) -> Result<Vec<DocumentRecord>> {
    let rows = sqlx::query(
        "SELECT id, filename, content, file_path, category, file_type, processed_at \
         FROM processed_documents p \
         WHERE NOT EXISTS ( \
             SELECT 1 FROM embedded_documents e WHERE e.source_document_id = p.id \
         ) \
         ORDER BY processed_at, id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_document).collect())
}

fn row_to_document(row: &SqliteRow) -> DocumentRecord {
    let category: String = row.get("category");
    let processed_at: String = row.get("processed_at");
    DocumentRecord {
        id: row.get("id"),
        filename: row.get("filename"),
        raw_text: row.get("content"),
        source_path: row.get("file_path"),
        category: Category::parse(&category).unwrap_or(Category::General),
        file_type: row.get("file_type"),
        ingested_at: chrono::DateTime::parse_from_rfc3339(&processed_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_and_categorises_text_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("iata_regulation_2024.txt"),
            "Lithium batteries shipped as cargo must comply with PI 965.",
        )
        .unwrap();
        std::fs::write(dir.path().join("crew_notes.txt"), "Briefing at 0600.").unwrap();
        std::fs::write(dir.path().join("blank_safety.txt"), "   \n  ").unwrap();

        let config = DocumentsConfig {
            paths: vec![dir.path().to_path_buf()],
            ..DocumentsConfig::default()
        };
        let (records, found) = load_documents(&config).unwrap();

        assert_eq!(found, 3);
        assert_eq!(records.len(), 2);
        let reg = records
            .iter()
            .find(|r| r.filename == "iata_regulation_2024.txt")
            .unwrap();
        assert_eq!(reg.category, Category::Regulations);
        assert_eq!(reg.file_type, ".txt");
        let notes = records
            .iter()
            .find(|r| r.filename == "crew_notes.txt")
            .unwrap();
        assert_eq!(notes.category, Category::General);
    }

    #[test]
    fn unreadable_pdf_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("maintenance_manual.pdf"), "not a pdf").unwrap();
        let config = DocumentsConfig {
            paths: vec![dir.path().to_path_buf()],
            ..DocumentsConfig::default()
        };
        let (records, found) = load_documents(&config).unwrap();
        assert_eq!(found, 1);
        assert!(records.is_empty());
    }
}
