//! TOML configuration with environment overrides.
//!
//! The file layout mirrors the pipeline stages. Connection parameters and
//! model identifiers may be supplied through the environment instead of the
//! file (a `.env` file is loaded by the binary before parsing):
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `AVRAG_WAREHOUSE_PATH` | `warehouse.path` |
//! | `AVRAG_DOCSTORE_PATH` | `docstore.path` |
//! | `AWS_REGION` | `embedding.region`, `generation.region`, `external.region` when unset |
//! | `TEXT_EMBEDDING_MODEL` | `embedding.model` when unset |
//! | `REASONING_MODEL` | `generation.model` when unset |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub warehouse: WarehouseConfig,
    pub docstore: DocstoreConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub external: Option<ExternalConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocstoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_document_globs")]
    pub include_globs: Vec<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            include_globs: default_document_globs(),
        }
    }
}

fn default_document_globs() -> Vec<String> {
    vec![
        "*.pdf".to_string(),
        "*.docx".to_string(),
        "*.txt".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_chunk_dir")]
    pub output_dir: PathBuf,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            output_dir: default_chunk_dir(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_chunk_dir() -> PathBuf {
    PathBuf::from("./data/chunks")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// AWS region for the `bedrock` provider.
    #[serde(default)]
    pub region: Option<String>,
    /// Base URL for `openai` (compatible) and `ollama` providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_dir")]
    pub output_dir: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            region: None,
            url: None,
            max_input_chars: default_max_input_chars(),
            max_retries: 0,
            timeout_secs: default_timeout_secs(),
            output_dir: default_embedding_dir(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_input_chars() -> usize {
    10_000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_embedding_dir() -> PathBuf {
    PathBuf::from("./data/embeddings")
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
        }
    }
}

fn default_index_name() -> String {
    "aviation_vector_index".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_min_embedded_ratio")]
    pub min_embedded_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_embedded_ratio: default_min_embedded_ratio(),
        }
    }
}

fn default_min_embedded_ratio() -> f64 {
    0.9
}

/// Where a non-general `context_type` is applied during a query.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Rewrite the question as `"<TYPE> CONTEXT: <question>"` before retrieval.
    #[default]
    RetrievalPrefix,
    /// Leave retrieval untouched and label the prompt with the content type.
    GenerationLabel,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub context_mode: ContextMode,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_mode: ContextMode::default(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// When unset, OpenAI and Ollama get 0.9 and Bedrock requests omit it.
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            region: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_generation_timeout_secs() -> u64 {
    60
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn effective_top_p(&self) -> f32 {
        self.top_p.unwrap_or(DEFAULT_TOP_P)
    }
}

pub const DEFAULT_TOP_P: f32 = 0.9;

/// What the embedding stage does when a single embedding call fails.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingFailurePolicy {
    /// Record a null embedding and keep going.
    #[default]
    Skip,
    /// Fail the stage on the first error.
    Abort,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    /// Serve the built-in sample data when a warehouse read fails.
    #[serde(default = "default_true")]
    pub warehouse_fallback: bool,
    #[serde(default)]
    pub embedding_failure: EmbeddingFailurePolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            warehouse_fallback: true,
            embedding_failure: EmbeddingFailurePolicy::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// S3 location of externally delivered flight CSV files.
#[derive(Debug, Deserialize, Clone)]
pub struct ExternalConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_csv_globs")]
    pub include_globs: Vec<String>,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}
fn default_csv_globs() -> Vec<String> {
    vec!["**/*.csv".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_daily_retries")]
    pub daily_retries: u32,
    #[serde(default = "default_vectors_retries")]
    pub vectors_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            daily_retries: default_daily_retries(),
            vectors_retries: default_vectors_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_daily_retries() -> u32 {
    2
}
fn default_vectors_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

/// Read, parse, apply environment overrides, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Parse and validate config text without consulting the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config")?;
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(path) = std::env::var("AVRAG_WAREHOUSE_PATH") {
        config.warehouse.path = PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("AVRAG_DOCSTORE_PATH") {
        config.docstore.path = PathBuf::from(path);
    }
    if let Ok(region) = std::env::var("AWS_REGION") {
        config.embedding.region.get_or_insert_with(|| region.clone());
        config.generation.region.get_or_insert(region);
    }
    if config.embedding.model.is_none() {
        config.embedding.model = std::env::var("TEXT_EMBEDDING_MODEL").ok();
    }
    if config.generation.model.is_none() {
        config.generation.model = std::env::var("REASONING_MODEL").ok();
    }
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Retrieval / validation
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.validation.min_embedded_ratio) {
        bail!("validation.min_embedded_ratio must be in [0.0, 1.0]");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "bedrock" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or bedrock.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" | "bedrock" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, ollama, or bedrock.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }
    if !(0.0..=1.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 1.0]");
    }
    if let Some(top_p) = config.generation.top_p.filter(|p| !(0.0..=1.0).contains(p)) {
        bail!("generation.top_p must be in [0.0, 1.0], got {}", top_p);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[warehouse]
path = "/tmp/wh.sqlite"

[docstore]
path = "/tmp/docs.sqlite"
"#;

    #[test]
    fn defaults_match_pipeline_settings() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.chunk_overlap, 200);
        assert_eq!(cfg.embedding.max_input_chars, 10_000);
        assert_eq!(cfg.embedding.max_retries, 0);
        assert_eq!(cfg.index.name, "aviation_vector_index");
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.retrieval.context_mode, ContextMode::RetrievalPrefix);
        assert!((cfg.validation.min_embedded_ratio - 0.9).abs() < 1e-9);
        assert!(cfg.policy.warehouse_fallback);
        assert_eq!(cfg.policy.embedding_failure, EmbeddingFailurePolicy::Skip);
        assert_eq!(cfg.pipeline.daily_retries, 2);
        assert_eq!(cfg.pipeline.vectors_retries, 3);
        assert!(cfg.external.is_none());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let text = format!("{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn enabled_embedding_requires_dims() {
        let text = format!(
            "{}\n[embedding]\nprovider = \"bedrock\"\nmodel = \"amazon.titan-embed-text-v1\"\n",
            MINIMAL
        );
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn unknown_generation_provider_rejected() {
        let text = format!("{}\n[generation]\nprovider = \"mystery\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn context_mode_parses_snake_case() {
        let text = format!(
            "{}\n[retrieval]\ncontext_mode = \"generation_label\"\n",
            MINIMAL
        );
        let cfg = parse_config(&text).unwrap();
        assert_eq!(cfg.retrieval.context_mode, ContextMode::GenerationLabel);
    }

    #[test]
    fn example_config_parses() {
        let cfg = parse_config(include_str!("../config/avrag.example.toml")).unwrap();
        assert_eq!(cfg.embedding.dims, Some(1024));
        assert_eq!(cfg.policy.embedding_failure, EmbeddingFailurePolicy::Skip);
        assert!(cfg.external.is_none());
    }
}
