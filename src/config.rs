//! Configuration types and constants for semindex
//!
//! Defines embedding providers and models, chunking parameters, query
//! defaults and file filtering rules. A [`Config`] is validated once when a
//! component is constructed and is immutable afterwards.

use crate::error::{Result, SemindexError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Supported local embedding models (all run locally via ONNX)
///
/// These models are downloaded on first use and cached locally.
/// No API keys or network access required after initial download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmbeddingModel {
    /// Fast, small model (384 dims, ~30MB) - good for most use cases
    #[default]
    #[serde(rename = "minilm", alias = "all-MiniLM-L6-v2", alias = "all-minilm-l6-v2")]
    AllMiniLmL6V2,
    /// Higher quality (384 dims, ~90MB) - better semantic understanding
    #[serde(rename = "bge", alias = "bge-small-en-v1.5")]
    BgeSmallEnV15,
    /// Best quality for code (768 dims, ~90MB)
    #[serde(rename = "nomic", alias = "nomic-embed-text-v1.5")]
    NomicEmbedTextV15,
    /// Multilingual support (384 dims, ~470MB)
    #[serde(rename = "multilingual", alias = "multilingual-e5-small")]
    MultilingualE5Small,
}

impl EmbeddingModel {
    /// All models, in the order they are listed to users
    pub const ALL: [EmbeddingModel; 4] = [
        Self::AllMiniLmL6V2,
        Self::BgeSmallEnV15,
        Self::NomicEmbedTextV15,
        Self::MultilingualE5Small,
    ];

    /// Get the HuggingFace model identifier
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::BgeSmallEnV15 => "BAAI/bge-small-en-v1.5",
            Self::NomicEmbedTextV15 => "nomic-ai/nomic-embed-text-v1.5",
            Self::MultilingualE5Small => "intfloat/multilingual-e5-small",
        }
    }

    /// Short name accepted on the command line
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "minilm",
            Self::BgeSmallEnV15 => "bge",
            Self::NomicEmbedTextV15 => "nomic",
            Self::MultilingualE5Small => "multilingual",
        }
    }

    /// Get the embedding vector dimension
    pub fn dimension(&self) -> usize {
        match self {
            Self::AllMiniLmL6V2 => 384,
            Self::BgeSmallEnV15 => 384,
            Self::NomicEmbedTextV15 => 768,
            Self::MultilingualE5Small => 384,
        }
    }
}

impl std::str::FromStr for EmbeddingModel {
    type Err = SemindexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minilm" | "all-minilm-l6-v2" | "default" => Ok(Self::AllMiniLmL6V2),
            "bge" | "bge-small" | "bge-small-en-v1.5" => Ok(Self::BgeSmallEnV15),
            "nomic" | "nomic-embed" | "nomic-embed-text-v1.5" => Ok(Self::NomicEmbedTextV15),
            "multilingual" | "e5" | "multilingual-e5-small" => Ok(Self::MultilingualE5Small),
            _ => Err(SemindexError::Config(format!(
                "Unknown model: {}. Valid options: minilm, bge, nomic, multilingual",
                s
            ))),
        }
    }
}

/// Which embedding backend produces the vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// fastembed model running in-process
    #[default]
    #[serde(alias = "huggingface")]
    Local,
    /// Vertex AI text embedding API
    #[serde(alias = "vertexai")]
    Cloud,
}

impl std::str::FromStr for ProviderKind {
    type Err = SemindexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" | "huggingface" => Ok(Self::Local),
            "cloud" | "vertexai" => Ok(Self::Cloud),
            _ => Err(SemindexError::Config(format!(
                "Unsupported embedding provider: {}. Supported providers: local, cloud",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cloud => write!(f, "cloud"),
        }
    }
}

/// Configuration for one semantic search component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory to scan and index
    pub scan_directory: PathBuf,
    /// File extensions to include, e.g. ".md"
    pub file_extensions: Vec<String>,
    /// Chunk size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
    /// Embedding backend
    pub embedding_provider: ProviderKind,
    /// Model used by the local provider
    pub local_model: EmbeddingModel,
    /// Where the local provider caches downloaded weights
    pub model_cache_dir: Option<PathBuf>,
    /// Model used by the cloud provider
    pub cloud_model: String,
    /// Cloud project; falls back to `GOOGLE_CLOUD_PROJECT`
    pub cloud_project_id: Option<String>,
    /// Cloud region
    pub cloud_location: String,
    /// Requested output dimensionality; model default when unset
    pub cloud_dimension: Option<usize>,
    /// Environment variable holding the OAuth access token
    pub cloud_access_token_env: String,
    /// Base URL override for the embedding API
    pub cloud_endpoint: Option<String>,
    /// Per-request timeout for the embedding API
    pub cloud_timeout_secs: u64,
    /// Default minimum similarity score for results
    pub similarity_threshold: f64,
    /// Default maximum number of results
    pub limit: usize,
    /// Number of chunks embedded and stored per batch
    pub embed_batch_size: usize,
    /// Maximum file size to index (bytes)
    pub max_file_size: u64,
}

/// Extensions indexed when the configuration does not name any
pub const DEFAULT_EXTENSIONS: &[&str] = &[".md", ".txt", ".py", ".js", ".ts", ".yaml", ".yml"];

const CHUNK_SIZE_RANGE: std::ops::RangeInclusive<usize> = 100..=4000;
const MAX_CHUNK_OVERLAP: usize = 500;
pub(crate) const LIMIT_RANGE: std::ops::RangeInclusive<usize> = 1..=100;

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_directory: PathBuf::from("."),
            file_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            chunk_size: 1000,
            chunk_overlap: 200,
            embedding_provider: ProviderKind::default(),
            local_model: EmbeddingModel::default(),
            model_cache_dir: None,
            cloud_model: "text-embedding-004".to_string(),
            cloud_project_id: None,
            cloud_location: "us-central1".to_string(),
            cloud_dimension: None,
            cloud_access_token_env: "GOOGLE_CLOUD_ACCESS_TOKEN".to_string(),
            cloud_endpoint: None,
            cloud_timeout_secs: 30,
            similarity_threshold: 0.3,
            limit: 10,
            embed_batch_size: 100,
            max_file_size: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl Config {
    /// Create a new config for the given scan directory
    pub fn new(scan_directory: impl Into<PathBuf>) -> Self {
        Self {
            scan_directory: scan_directory.into(),
            ..Default::default()
        }
    }

    /// Set the embedding provider
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.embedding_provider = provider;
        self
    }

    /// Set the local embedding model
    pub fn with_model(mut self, model: EmbeddingModel) -> Self {
        self.local_model = model;
        self
    }

    /// Set chunk size and overlap
    pub fn with_chunking(mut self, size: usize, overlap: usize) -> Self {
        self.chunk_size = size;
        self.chunk_overlap = overlap;
        self
    }

    /// Set the extension allow-list
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Load configuration from a JSON file
    ///
    /// Missing fields take their defaults. The result is not validated yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SemindexError::InvalidPath(path.display().to_string()));
        }
        let json = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Check every constraint and normalize the extension list
    pub fn validated(mut self) -> Result<Self> {
        if !CHUNK_SIZE_RANGE.contains(&self.chunk_size) {
            return Err(SemindexError::Config(format!(
                "chunk_size must be between {} and {}, got {}",
                CHUNK_SIZE_RANGE.start(),
                CHUNK_SIZE_RANGE.end(),
                self.chunk_size
            )));
        }
        if self.chunk_overlap > MAX_CHUNK_OVERLAP {
            return Err(SemindexError::Config(format!(
                "chunk_overlap must be at most {}, got {}",
                MAX_CHUNK_OVERLAP, self.chunk_overlap
            )));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(SemindexError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(SemindexError::Config(format!(
                "similarity_threshold must be between 0 and 1, got {}",
                self.similarity_threshold
            )));
        }
        if !LIMIT_RANGE.contains(&self.limit) {
            return Err(SemindexError::Config(format!(
                "limit must be between {} and {}, got {}",
                LIMIT_RANGE.start(),
                LIMIT_RANGE.end(),
                self.limit
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(SemindexError::Config(
                "embed_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(SemindexError::Config(
                "max_file_size must be at least 1".to_string(),
            ));
        }
        if self.embedding_provider == ProviderKind::Cloud {
            if self.cloud_model.trim().is_empty() {
                return Err(SemindexError::Config("cloud_model must not be empty".to_string()));
            }
            if self.cloud_timeout_secs == 0 {
                return Err(SemindexError::Config(
                    "cloud_timeout_secs must be at least 1".to_string(),
                ));
            }
            if self.cloud_dimension == Some(0) {
                return Err(SemindexError::Config(
                    "cloud_dimension must be at least 1".to_string(),
                ));
            }
        }

        let mut extensions = Vec::with_capacity(self.file_extensions.len());
        for ext in &self.file_extensions {
            let ext = normalize_extension(ext).ok_or_else(|| {
                SemindexError::Config(format!("Invalid file extension: {:?}", ext))
            })?;
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        if extensions.is_empty() {
            return Err(SemindexError::Config(
                "file_extensions must name at least one extension".to_string(),
            ));
        }
        self.file_extensions = extensions;

        Ok(self)
    }

    /// Check if a file should be indexed based on its extension
    pub fn should_index_file(&self, path: &Path) -> bool {
        file_extension(path)
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.file_extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    /// Directory holding the persisted collection for a named component
    ///
    /// Derived from the scan directory, the component name and the provider
    /// fingerprint, so a different provider never reuses another's vectors.
    pub fn store_dir(&self, name: &str, fingerprint: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(fingerprint.as_bytes()));
        self.scan_directory
            .join(format!(".semindex_{}", name))
            .join(&digest[..16])
    }
}

/// Reject names that cannot be used as a single path component
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SemindexError::Config(format!(
            "Invalid component name {:?}: use letters, digits, '-' or '_'",
            name
        )))
    }
}

/// File suffix with its leading dot, as written on disk
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
}

fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() || trimmed.contains(['/', '\\', '.']) {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}
