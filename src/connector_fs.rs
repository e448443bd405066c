use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::DocumentsConfig;

/// Files in the configured document directories that match the include globs.
///
/// Each directory is listed one level deep. Missing directories are logged
/// and skipped. Globs match the file name case-insensitively.
pub fn scan_documents(config: &DocumentsConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs)?;
    let mut files = Vec::new();

    for root in &config.paths {
        if !root.exists() {
            warn!(path = %root.display(), "document path does not exist, skipping");
            continue;
        }

        let walker = WalkDir::new(root).min_depth(1).max_depth(1);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if !include_set.is_match(&name) {
                continue;
            }
            files.push(entry.into_path());
        }
    }

    // Sort for deterministic ordering
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lists_matching_files_in_each_path() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(a.path().join("safety.txt"), "x").unwrap();
        std::fs::write(a.path().join("manual.PDF"), "x").unwrap();
        std::fs::write(a.path().join("image.png"), "x").unwrap();
        std::fs::create_dir(a.path().join("nested")).unwrap();
        std::fs::write(a.path().join("nested").join("deep.txt"), "x").unwrap();
        std::fs::write(b.path().join("loading.docx"), "x").unwrap();

        let config = DocumentsConfig {
            paths: vec![
                a.path().to_path_buf(),
                PathBuf::from("/nonexistent/aviation/docs"),
                b.path().to_path_buf(),
            ],
            ..DocumentsConfig::default()
        };
        let files = scan_documents(&config).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(files.len(), 3);
        assert!(names.contains(&"safety.txt".to_string()));
        assert!(names.contains(&"manual.PDF".to_string()));
        assert!(names.contains(&"loading.docx".to_string()));
    }
}
