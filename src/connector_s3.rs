//! External flight data loader.
//!
//! Lists CSV objects under `[external] bucket/prefix` with the S3 REST API
//! (`ListObjectsV2`, SigV4 signed), downloads each one, and stores every
//! data row in `external_flights` as a JSON object keyed by the header row.
//!
//! # Configuration
//!
//! ```toml
//! [external]
//! bucket = "aviation-data"
//! prefix = "external/"
//! region = "us-east-1"
//! include_globs = ["**/*.csv"]
//! # endpoint_url = "http://localhost:9000"   # MinIO, path-style
//! ```
//!
//! Without an `[external]` section the stage logs and does nothing.
//! Rows are keyed by `(object_key, row_index)`, so reloading an object
//! replaces its rows.

use anyhow::{bail, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::aws::{self, AwsCredentials, RequestParts};
use crate::config::{Config, ExternalConfig};
use crate::db;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExternalStats {
    pub objects: usize,
    pub rows: usize,
}

/// Pipeline stage: load external CSV data if `[external]` is configured.
pub async fn load_external_data(config: &Config) -> Result<ExternalStats> {
    let Some(ext) = config.external.as_ref() else {
        info!("no [external] source configured, skipping external load");
        return Ok(ExternalStats::default());
    };
    let creds = AwsCredentials::from_env()?;
    let pool = db::connect_warehouse(config).await?;
    let stats = load_external(&pool, ext, &creds).await;
    pool.close().await;
    stats
}

/// CLI entry point for `avrag load-external`.
pub async fn run_load_external(config: &Config) -> Result<()> {
    let stats = load_external_data(config).await?;
    println!("load external data");
    println!("  objects: {}", stats.objects);
    println!("  rows: {}", stats.rows);
    println!("ok");
    Ok(())
}

pub async fn load_external(
    pool: &SqlitePool,
    ext: &ExternalConfig,
    creds: &AwsCredentials,
) -> Result<ExternalStats> {
    let client = S3Client::new(ext, creds);
    let include = build_globset(&ext.include_globs)?;

    let mut keys: Vec<String> = client
        .list_objects()
        .await?
        .into_iter()
        .filter(|key| include.is_match(relative_key(key, &ext.prefix)))
        .collect();
    keys.sort();

    let mut stats = ExternalStats::default();
    for key in &keys {
        let body = client.get_object(key).await?;
        let records = parse_csv(&body);
        let rows = insert_rows(pool, key, &records).await?;
        info!(key = %key, rows, "external object loaded");
        stats.objects += 1;
        stats.rows += rows;
    }

    info!(
        bucket = %ext.bucket,
        objects = stats.objects,
        rows = stats.rows,
        "external data loaded"
    );
    Ok(stats)
}

async fn insert_rows(pool: &SqlitePool, key: &str, records: &[Value]) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM external_flights WHERE object_key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    for (i, record) in records.iter().enumerate() {
        sqlx::query(
            "INSERT INTO external_flights (object_key, row_index, record_json, loaded_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(key)
        .bind(i as i64)
        .bind(record.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(records.len())
}

fn relative_key<'a>(key: &'a str, prefix: &str) -> &'a str {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return key;
    }
    key.strip_prefix(prefix)
        .map(|s| s.trim_start_matches('/'))
        .unwrap_or(key)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ S3 REST ============

struct S3Client<'a> {
    http: reqwest::Client,
    ext: &'a ExternalConfig,
    creds: &'a AwsCredentials,
    /// `scheme://host`
    base_url: String,
    host: String,
    /// Path-style bucket segment for custom endpoints, empty otherwise.
    bucket_path: String,
}

impl<'a> S3Client<'a> {
    fn new(ext: &'a ExternalConfig, creds: &'a AwsCredentials) -> Self {
        let (base_url, host, bucket_path) = match ext.endpoint_url {
            Some(ref endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string();
                let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                    endpoint.to_string()
                } else {
                    format!("https://{}", endpoint)
                };
                (base, host, format!("/{}", aws::uri_encode(&ext.bucket)))
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", ext.bucket, ext.region);
                (format!("https://{}", host), host, String::new())
            }
        };
        Self {
            http: reqwest::Client::new(),
            ext,
            creds,
            base_url,
            host,
            bucket_path,
        }
    }

    async fn signed_get(&self, path: &str, query: &[(String, String)]) -> Result<reqwest::Response> {
        let headers = aws::sign(
            self.creds,
            &RequestParts {
                method: "GET",
                host: &self.host,
                path,
                query,
                payload: b"",
                region: &self.ext.region,
                service: "s3",
            },
            Utc::now(),
        );

        let mut url = format!("{}{}", self.base_url, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&aws::canonical_query(query));
        }

        let mut req = self.http.get(&url);
        for (name, value) in headers {
            req = req.header(name, value);
        }
        Ok(req.send().await?)
    }

    /// Every object key under the prefix, following continuation tokens.
    async fn list_objects(&self) -> Result<Vec<String>> {
        let path = format!("{}/", self.bucket_path);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !self.ext.prefix.is_empty() {
                query.push(("prefix".to_string(), self.ext.prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.signed_get(&path, &query).await.map_err(|e| {
                anyhow::anyhow!(
                    "Failed to list S3 objects in s3://{}/{}: {}",
                    self.ext.bucket,
                    self.ext.prefix,
                    e
                )
            })?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml = resp.text().await?;
            let page = parse_list_objects_response(&xml);
            keys.extend(page.keys);

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<String> {
        let encoded_key = key
            .split('/')
            .map(aws::uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        let path = format!("{}/{}", self.bucket_path, encoded_key);

        let resp = self.signed_get(&path, &[]).await.map_err(|e| {
            anyhow::anyhow!("Failed to get s3://{}/{}: {}", self.ext.bucket, key, e)
        })?;
        if !resp.status().is_success() {
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        let bytes = resp.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }
}

struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

fn parse_list_objects_response(xml: &str) -> ListPage {
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut keys = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(key) = extract_xml_value(block, "Key") {
            // folder placeholders
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(key);
            }
        }
        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    ListPage {
        keys,
        is_truncated,
        next_token,
    }
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(unescape_xml(&xml[start..start + end]))
}

fn unescape_xml(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

// ============ CSV ============

/// Parse CSV text (header row first) into one JSON object per data row.
///
/// Quoted fields may contain commas, newlines, and doubled quotes. Rows whose
/// field count differs from the header are skipped with a warning; blank
/// lines are ignored.
pub fn parse_csv(text: &str) -> Vec<Value> {
    let mut rows = split_csv_rows(text).into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();

    let mut records = Vec::new();
    for (line, fields) in rows.enumerate() {
        if fields.len() != header.len() {
            warn!(
                row = line + 1,
                expected = header.len(),
                found = fields.len(),
                "skipping malformed CSV row"
            );
            continue;
        }
        let object: Map<String, Value> = header
            .iter()
            .cloned()
            .zip(fields.into_iter().map(Value::String))
            .collect();
        records.push(Value::Object(object));
    }
    records
}

fn split_csv_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.trim_start_matches('\u{feff}').chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                push_row(&mut rows, std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        push_row(&mut rows, row);
    }
    rows
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    if row.len() == 1 && row[0].is_empty() {
        return;
    }
    rows.push(row);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Request;
    use axum::Router;
    use std::collections::HashMap;

    #[test]
    fn csv_rows_become_objects() {
        let csv = "flight_number,route,notes\r\n\
                   UA901,JFK-LHR,\"late, crew swap\"\r\n\
                   \r\n\
                   BA117,LHR-DXB,\"said \"\"on time\"\"\"\n\
                   broken,row\n";
        let records = parse_csv(csv);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["flight_number"], "UA901");
        assert_eq!(records[0]["notes"], "late, crew swap");
        assert_eq!(records[1]["notes"], "said \"on time\"");
    }

    #[test]
    fn header_only_csv_has_no_records() {
        assert!(parse_csv("a,b,c\n").is_empty());
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn list_response_skips_folders_and_reads_token() {
        let xml = r#"<ListBucketResult>
            <IsTruncated>true</IsTruncated>
            <Contents><Key>external/</Key></Contents>
            <Contents><Key>external/flights_20240115.csv</Key></Contents>
            <NextContinuationToken>abc&amp;1</NextContinuationToken>
        </ListBucketResult>"#;
        let page = parse_list_objects_response(xml);
        assert_eq!(page.keys, vec!["external/flights_20240115.csv"]);
        assert!(page.is_truncated);
        assert_eq!(page.next_token.as_deref(), Some("abc&1"));
    }

    #[test]
    fn relative_key_strips_prefix() {
        assert_eq!(relative_key("external/a.csv", "external/"), "a.csv");
        assert_eq!(relative_key("a.csv", ""), "a.csv");
        assert_eq!(relative_key("other/a.csv", "external"), "other/a.csv");
    }

    async fn mock_s3() -> String {
        async fn handle(req: Request) -> String {
            let path = req.uri().path().to_string();
            let query = req.uri().query().unwrap_or("").to_string();
            assert!(req.headers().contains_key("authorization"));
            if path == "/aviation-data/" {
                if query.contains("continuation-token") {
                    "<ListBucketResult><IsTruncated>false</IsTruncated>\
                     <Contents><Key>external/readme.txt</Key></Contents>\
                     </ListBucketResult>"
                        .to_string()
                } else {
                    "<ListBucketResult><IsTruncated>true</IsTruncated>\
                     <Contents><Key>external/flights_20240115.csv</Key></Contents>\
                     <NextContinuationToken>page2</NextContinuationToken>\
                     </ListBucketResult>"
                        .to_string()
                }
            } else {
                "flight_number,status\nUA901,ARRIVED\nBA117,DELAYED\n".to_string()
            }
        }

        let app = Router::new().fallback(handle);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn loads_csv_rows_from_paginated_listing() {
        let endpoint = mock_s3().await;
        let ext = ExternalConfig {
            bucket: "aviation-data".to_string(),
            prefix: "external/".to_string(),
            region: "us-east-1".to_string(),
            include_globs: vec!["**/*.csv".to_string()],
            endpoint_url: Some(endpoint),
        };
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        };
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::migrate_warehouse(&pool).await.unwrap();

        let stats = load_external(&pool, &ext, &creds).await.unwrap();
        assert_eq!(stats, ExternalStats { objects: 1, rows: 2 });

        // reloading replaces rather than duplicates
        load_external(&pool, &ext, &creds).await.unwrap();
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT object_key, record_json FROM external_flights ORDER BY row_index",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "external/flights_20240115.csv");
        let first: HashMap<String, String> = serde_json::from_str(&rows[0].1).unwrap();
        assert_eq!(first["flight_number"], "UA901");
        assert_eq!(first["status"], "ARRIVED");
    }

    #[tokio::test]
    async fn missing_section_is_a_no_op() {
        let config = crate::config::parse_config(
            "[warehouse]\npath = \"/nonexistent/wh.sqlite\"\n[docstore]\npath = \"/nonexistent/ds.sqlite\"\n",
        )
        .unwrap();
        assert!(config.external.is_none());
        let stats = load_external_data(&config).await.unwrap();
        assert_eq!(stats, ExternalStats::default());
    }
}
