//! The semantic search component
//!
//! [`SemanticSearchTool`] owns one provider and one store for a configured
//! directory. Construction spawns a background thread that indexes the
//! directory once; queries can be issued right away and are answered with an
//! `indexing_in_progress` response until the store has data.
//!
//! Two locks guard the lifecycle. The run lock is held for a whole indexing
//! run so runs never overlap. The status mutex is only held to read or
//! change [`IndexStatus`], never while embedding or touching the store, so a
//! query is never blocked behind a run.

use crate::config::{validate_name, Config, LIMIT_RANGE};
use crate::embedder::{self, EmbeddingProvider};
use crate::error::{IndexRunError, Result, SemindexError};
use crate::index::{UsearchStore, VectorStore};
use crate::indexer::{IndexReport, Indexer};
use crate::searcher::{QueryResult, Searcher, SimilarityStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

const PENDING_MESSAGE: &str = "Search index is still being built. Please try again in a moment.";

/// Files listed in the diagnostics of a pending response
const DIAGNOSTIC_FILE_COUNT: usize = 5;

/// Where the background index is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    #[default]
    NotStarted,
    Indexing,
    /// Terminal. Also reached when a run gives up; see [`IndexStatus::last_error`]
    Complete,
}

/// Snapshot of the indexing lifecycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStatus {
    pub state: IndexState,
    /// Runs spawned but not yet finished
    pub pending_runs: usize,
    pub files_processed: usize,
    pub chunks_indexed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Why the last run stopped early, if it did
    pub last_error: Option<String>,
}

impl IndexStatus {
    /// A run is queued or executing
    pub fn in_progress(&self) -> bool {
        self.pending_runs > 0
    }
}

/// Arguments of one search call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_threshold(mut self, similarity_threshold: f64) -> Self {
        self.similarity_threshold = Some(similarity_threshold);
        self
    }
}

/// Settings a successful search actually used
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedSettings {
    pub limit: usize,
    pub similarity_threshold: f64,
    pub indexed_directory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchSuccess {
    pub query: String,
    pub results_count: usize,
    pub results: Vec<QueryResult>,
    pub debug: SimilarityStats,
    pub config: AppliedSettings,
}

/// What the component saw when it refused to search yet
#[derive(Debug, Clone, Serialize)]
pub struct PendingDiagnostics {
    pub indexing_complete: bool,
    pub state: IndexState,
    pub collection_count: usize,
    pub scan_directory: String,
    pub directory_exists: bool,
    pub files_in_directory: Vec<String>,
    pub supported_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexingPending {
    pub message: String,
    pub query: String,
    pub debug_info: PendingDiagnostics,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchFailure {
    pub error: String,
    pub query: String,
}

/// Result of a search call, tagged by `status` when serialized
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchResponse {
    Success(SearchSuccess),
    IndexingInProgress(IndexingPending),
    Error(SearchFailure),
}

impl SearchResponse {
    fn error(query: &str, error: impl Into<String>) -> Self {
        Self::Error(SearchFailure {
            error: error.into(),
            query: query.to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Ranked results; empty unless the search succeeded
    pub fn results(&self) -> &[QueryResult] {
        match self {
            Self::Success(success) => &success.results,
            _ => &[],
        }
    }
}

/// One argument a caller may pass when invoking the tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub required: bool,
}

/// The part of the configuration the background run depends on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundConfig {
    pub scan_directory: PathBuf,
    pub file_extensions: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Semantic search over one directory, indexed in the background
pub struct SemanticSearchTool {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    description: String,
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    searcher: Searcher,
    status: Mutex<IndexStatus>,
    idle: Condvar,
    run_lock: Mutex<()>,
}

impl SemanticSearchTool {
    /// Build the configured provider, open the persistent store and start
    /// indexing in the background
    ///
    /// Fails only on configuration errors. A missing or empty scan
    /// directory is not an error.
    pub fn new(name: &str, description: &str, config: Config) -> Result<Self> {
        validate_name(name)?;
        let config = config.validated()?;
        let provider = embedder::from_config(&config)?;
        info!(
            "Initialized {} embedding provider ({})",
            config.embedding_provider,
            provider.fingerprint()
        );

        let fingerprint = provider.fingerprint();
        let store_dir = config.store_dir(name, &fingerprint);
        let store = UsearchStore::open(store_dir, &fingerprint, provider.dimension())?;

        Self::with_parts(name, description, config, provider, Arc::new(store))
    }

    /// Start a component over an existing provider and store
    pub fn with_parts(
        name: &str,
        description: &str,
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let tool = Self::assemble(name, description, config, provider, store)?;
        tool.trigger_indexing()?;
        Ok(tool)
    }

    /// Validate and wire the parts without starting a run
    fn assemble(
        name: &str,
        description: &str,
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        validate_name(name)?;
        let config = config.validated()?;

        if provider.dimension() != store.dimension() {
            return Err(SemindexError::Config(format!(
                "Provider produces {}-dimensional vectors but the store holds {}",
                provider.dimension(),
                store.dimension()
            )));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                description: description.to_string(),
                searcher: Searcher::new(Arc::clone(&provider), Arc::clone(&store)),
                config,
                provider,
                store,
                status: Mutex::new(IndexStatus::default()),
                idle: Condvar::new(),
                run_lock: Mutex::new(()),
            }),
        })
    }

    /// Spawn an indexing run
    ///
    /// Runs execute one at a time. A run that finds the index complete
    /// does nothing, so this only has an effect after a failed upsert.
    pub fn trigger_indexing(&self) -> Result<()> {
        self.shared.lock_status().pending_runs += 1;

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(format!("semindex-{}", self.shared.name))
            .spawn(move || shared.run_indexing());

        if let Err(e) = spawned {
            let mut status = self.shared.lock_status();
            status.pending_runs -= 1;
            drop(status);
            self.shared.idle.notify_all();
            return Err(e.into());
        }

        info!("Background indexing thread launched");
        Ok(())
    }

    /// Current lifecycle snapshot
    pub fn status(&self) -> IndexStatus {
        self.shared.lock_status().clone()
    }

    pub fn state(&self) -> IndexState {
        self.shared.lock_status().state
    }

    /// Block until no run is pending or `timeout` elapses
    ///
    /// Returns the snapshot seen last; check [`IndexStatus::in_progress`] to
    /// tell the two apart.
    pub fn wait_until_idle(&self, timeout: Duration) -> IndexStatus {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.lock_status();

        while status.in_progress() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            status = self
                .shared
                .idle
                .wait_timeout(status, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        status.clone()
    }

    /// Run a typed search
    pub fn search(&self, request: &SearchRequest) -> SearchResponse {
        let shared = &self.shared;
        let query = request.query.as_str();

        if query.trim().is_empty() {
            return SearchResponse::error(query, "Query parameter is required");
        }

        let limit = request.limit.unwrap_or(shared.config.limit);
        if !LIMIT_RANGE.contains(&limit) {
            return SearchResponse::error(
                query,
                format!(
                    "limit must be between {} and {}, got {}",
                    LIMIT_RANGE.start(),
                    LIMIT_RANGE.end(),
                    limit
                ),
            );
        }

        let similarity_threshold = request
            .similarity_threshold
            .unwrap_or(shared.config.similarity_threshold);
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return SearchResponse::error(
                query,
                format!(
                    "similarity_threshold must be between 0 and 1, got {}",
                    similarity_threshold
                ),
            );
        }

        let collection_count = match shared.store.count() {
            Ok(count) => count,
            Err(e) => {
                error!("Search failed: {}", e);
                return SearchResponse::error(query, e.to_string());
            }
        };

        if let Some(state) = shared.check_ready(collection_count) {
            return SearchResponse::IndexingInProgress(IndexingPending {
                message: PENDING_MESSAGE.to_string(),
                query: query.to_string(),
                debug_info: shared.diagnostics(state, collection_count),
            });
        }

        match shared.searcher.search(query, limit, similarity_threshold) {
            Ok(outcome) => SearchResponse::Success(SearchSuccess {
                query: query.to_string(),
                results_count: outcome.results.len(),
                results: outcome.results,
                debug: outcome.debug,
                config: AppliedSettings {
                    limit,
                    similarity_threshold,
                    indexed_directory: shared.config.scan_directory.display().to_string(),
                },
            }),
            Err(e) => {
                error!("Search failed: {}", e);
                SearchResponse::error(query, e.to_string())
            }
        }
    }

    /// Function-calling entry point
    ///
    /// Accepts `{"query": .., "limit": .., "similarity_threshold": ..}` and
    /// always answers with a JSON object carrying a `status` field.
    pub fn execute(&self, params: &Value) -> Value {
        let request: SearchRequest = match serde_json::from_value(params.clone()) {
            Ok(request) => request,
            Err(e) => {
                let query = params.get("query").cloned().unwrap_or(Value::Null);
                return json!({
                    "status": "error",
                    "error": format!("Invalid parameters: {}", e),
                    "query": query,
                });
            }
        };

        let response = self.search(&request);
        serde_json::to_value(&response).unwrap_or_else(|e| {
            json!({
                "status": "error",
                "error": e.to_string(),
                "query": request.query,
            })
        })
    }

    /// Arguments callers may pass to [`execute`](Self::execute)
    pub fn parameters(&self) -> Vec<ToolParam> {
        parameters(&self.shared.config)
    }

    /// Declaration of this tool for a function-calling model
    pub fn function_declaration(&self) -> Value {
        function_declaration(&self.shared.name, &self.shared.description, &self.shared.config)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn description(&self) -> &str {
        &self.shared.description
    }

    /// The validated configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn background_config(&self) -> BackgroundConfig {
        let config = &self.shared.config;
        BackgroundConfig {
            scan_directory: config.scan_directory.clone(),
            file_extensions: config.file_extensions.clone(),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

impl Shared {
    fn lock_status(&self) -> MutexGuard<'_, IndexStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Body of the background thread
    fn run_indexing(&self) {
        let span = info_span!("semantic_search", tool = %self.name);
        let _enter = span.enter();
        info!("Background indexing thread started");

        let _run = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);

        {
            let mut status = self.lock_status();
            if status.state == IndexState::Complete {
                debug!("Index already complete, nothing to do");
                self.finish_run(status);
                return;
            }
            status.state = IndexState::Indexing;
            status.started_at = Some(Utc::now());
            status.finished_at = None;
            status.last_error = None;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.index_once()));

        let mut status = self.lock_status();
        let outcome = outcome.map_err(|payload| panic_message(payload.as_ref()));
        record_outcome(&mut status, outcome);

        self.finish_run(status);
    }

    fn index_once(&self) -> std::result::Result<IndexReport, IndexRunError> {
        let indexer = Indexer::new(
            self.config.clone(),
            Arc::clone(&self.provider),
            Arc::clone(&self.store),
        )
        .map_err(IndexRunError::Scan)?;
        indexer.run()
    }

    fn finish_run(&self, mut status: MutexGuard<'_, IndexStatus>) {
        status.pending_runs = status.pending_runs.saturating_sub(1);
        drop(status);
        self.idle.notify_all();
    }

    /// `None` when queries may proceed, else the state that blocks them
    ///
    /// A non-empty store always answers queries. While indexing it means the
    /// run got far enough to be useful, so the state is promoted to
    /// `Complete`. Before the first run starts the data comes from a
    /// reopened store and the state is left alone so the scan still happens.
    fn check_ready(&self, collection_count: usize) -> Option<IndexState> {
        let mut status = self.lock_status();
        if status.state == IndexState::Complete {
            return None;
        }
        if collection_count == 0 {
            return Some(status.state);
        }
        if status.state == IndexState::NotStarted {
            debug!(
                "Serving {} stored documents before the first run",
                collection_count
            );
            return None;
        }

        info!(
            "Indexing appears complete ({} documents), fixing completion flag",
            collection_count
        );
        status.state = IndexState::Complete;
        None
    }

    fn diagnostics(&self, state: IndexState, collection_count: usize) -> PendingDiagnostics {
        let scan_directory = self.config.scan_directory.as_path();
        let directory_exists = scan_directory.is_dir();

        PendingDiagnostics {
            indexing_complete: state == IndexState::Complete,
            state,
            collection_count,
            scan_directory: scan_directory.display().to_string(),
            directory_exists,
            files_in_directory: if directory_exists {
                list_entries(scan_directory, DIAGNOSTIC_FILE_COUNT)
            } else {
                Vec::new()
            },
            supported_extensions: self.config.file_extensions.clone(),
        }
    }
}

/// Arguments a component built from `config` accepts
pub fn parameters(config: &Config) -> Vec<ToolParam> {
    vec![
        ToolParam {
            name: "query".to_string(),
            param_type: "string".to_string(),
            description: "The query to search for".to_string(),
            default: None,
            required: true,
        },
        ToolParam {
            name: "limit".to_string(),
            param_type: "integer".to_string(),
            description: "Maximum number of search results to return".to_string(),
            default: Some(json!(config.limit)),
            required: false,
        },
        ToolParam {
            name: "similarity_threshold".to_string(),
            param_type: "number".to_string(),
            description: "Minimum similarity score for results".to_string(),
            default: Some(json!(config.similarity_threshold)),
            required: false,
        },
    ]
}

/// JSON-Schema style declaration for function-calling models
pub fn function_declaration(name: &str, description: &str, config: &Config) -> Value {
    let params = parameters(config);

    let mut properties = Map::new();
    for param in &params {
        let mut property = Map::new();
        property.insert("type".to_string(), json!(param.param_type));
        property.insert("description".to_string(), json!(param.description));
        if let Some(default) = &param.default {
            property.insert("default".to_string(), default.clone());
        }
        properties.insert(param.name.clone(), Value::Object(property));
    }

    let required: Vec<&str> = params
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();

    json!({
        "name": name,
        "description": description,
        "parameters": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

/// Apply the result of one run to the status
///
/// A finished run or a failed scan ends in `Complete`; a failed upsert
/// leaves the state alone so a later run can retry. `Err(message)` in the
/// outer result is a panic.
fn record_outcome(
    status: &mut IndexStatus,
    outcome: std::result::Result<std::result::Result<IndexReport, IndexRunError>, String>,
) {
    status.finished_at = Some(Utc::now());

    match outcome {
        Ok(Ok(report)) => {
            status.state = IndexState::Complete;
            status.files_processed = report.files_processed;
            status.chunks_indexed = report.chunks_indexed;
            info!("Indexing completed successfully ({})", report);
        }
        Ok(Err(e @ IndexRunError::Upsert { .. })) => {
            error!("Failed to add documents to the index: {}", e);
            status.last_error = Some(e.to_string());
        }
        Ok(Err(e)) => {
            error!("Background indexing failed: {}", e);
            status.state = IndexState::Complete;
            status.last_error = Some(e.to_string());
        }
        Err(message) => {
            error!("Background indexing panicked: {}", message);
            status.state = IndexState::Complete;
            status.last_error = Some(format!("indexing panicked: {}", message));
        }
    }
}

/// First `count` entries of `dir` in name order
fn list_entries(dir: &Path, count: usize) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {:?}: {}", dir, e);
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    paths
        .into_iter()
        .take(count)
        .map(|p| p.display().to_string())
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for SemanticSearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticSearchTool")
            .field("name", &self.shared.name)
            .field("scan_directory", &self.shared.config.scan_directory)
            .field("provider", &self.shared.provider.fingerprint())
            .finish()
    }
}
