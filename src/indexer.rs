//! File discovery and indexing
//!
//! Walks the scan directory (its files plus one level of sub-directories),
//! chunks matching files, embeds the chunks in fixed-size batches and
//! upserts them into the vector store.

use crate::chunker::{Chunker, DocumentChunk};
use crate::config::Config;
use crate::embedder::EmbeddingProvider;
use crate::error::{IndexRunError, Result, SemindexError};
use crate::index::VectorStore;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Chunks collected by a directory scan
#[derive(Debug, Default)]
pub struct ScanOutput {
    /// Chunks in file order, then chunk order
    pub chunks: Vec<DocumentChunk>,
    /// Files that were read and chunked
    pub files_processed: usize,
    /// The scan directory did not exist
    pub directory_missing: bool,
}

/// Outcome of a successful indexing run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    /// Files that were read and chunked
    pub files_processed: usize,
    /// Chunks embedded and stored
    pub chunks_indexed: usize,
    /// Embedding batches sent to the provider
    pub batches: usize,
    /// The scan directory did not exist
    pub directory_missing: bool,
}

impl std::fmt::Display for IndexReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Files: {}, Chunks: {}, Batches: {}",
            self.files_processed, self.chunks_indexed, self.batches
        )
    }
}

/// Runs one full scan of the configured directory into a store
pub struct Indexer {
    config: Config,
    chunker: Chunker,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl Indexer {
    /// Create a new indexer with the given configuration
    pub fn new(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap)?;

        Ok(Self {
            config,
            chunker,
            provider,
            store,
        })
    }

    /// Scan, embed and store everything
    ///
    /// The error says which phase failed; see [`IndexRunError`].
    pub fn run(&self) -> std::result::Result<IndexReport, IndexRunError> {
        let scan = self.scan().map_err(IndexRunError::Scan)?;

        info!(
            "Scanned {} files, found {} document chunks",
            scan.files_processed,
            scan.chunks.len()
        );

        let mut report = IndexReport {
            files_processed: scan.files_processed,
            directory_missing: scan.directory_missing,
            ..Default::default()
        };

        if scan.chunks.is_empty() {
            info!("No documents found to index");
            return Ok(report);
        }

        let (chunks_indexed, batches) = self.store_chunks(scan.chunks)?;
        report.chunks_indexed = chunks_indexed;
        report.batches = batches;

        info!("Successfully indexed {} document chunks", chunks_indexed);
        Ok(report)
    }

    /// Read and chunk every matching file
    pub fn scan(&self) -> Result<ScanOutput> {
        let root = self.config.scan_directory.as_path();
        info!("Starting indexing of directory: {:?}", root);

        if !root.is_dir() {
            error!("Directory does not exist: {:?}", root);
            return Ok(ScanOutput {
                directory_missing: true,
                ..Default::default()
            });
        }

        let paths = self.discover_files(root)?;
        debug!("Found {} candidate files", paths.len());

        // Read files in parallel, keeping discovery order
        let contents: Vec<Option<(PathBuf, String)>> = paths
            .into_par_iter()
            .map(|path| read_text(&path).map(|text| (path, text)))
            .collect();

        let mut output = ScanOutput::default();
        for (path, text) in contents.into_iter().flatten() {
            let chunks = self.chunker.chunk_file(&path, &text);
            debug!("Processed {:?}: {} chunks", path, chunks.len());
            output.files_processed += 1;
            output.chunks.extend(chunks);
        }

        Ok(output)
    }

    /// Files at depth 1 and 2 that pass the extension and size filters
    fn discover_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        // An unreadable root is a failed scan, not an empty one
        std::fs::read_dir(root).map_err(|e| {
            SemindexError::InvalidPath(format!("{}: {}", root.display(), e))
        })?;

        let files = WalkDir::new(root)
            .min_depth(1)
            .max_depth(2)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| {
                entry.file_type().is_file() && self.config.should_index_file(entry.path())
            })
            .filter(|entry| match entry.metadata() {
                Ok(meta) if meta.len() <= self.config.max_file_size => true,
                Ok(meta) => {
                    debug!("Skipping {:?}: {} bytes", entry.path(), meta.len());
                    false
                }
                Err(e) => {
                    warn!("Skipping {:?}: {}", entry.path(), e);
                    false
                }
            })
            .map(|entry| entry.into_path())
            .collect();

        Ok(files)
    }

    /// Embed and upsert in batches; returns (chunks stored, batches)
    fn store_chunks(
        &self,
        chunks: Vec<DocumentChunk>,
    ) -> std::result::Result<(usize, usize), IndexRunError> {
        let batch_size = self.config.embed_batch_size;
        let mut stored = 0;
        let mut batch_no = 0;
        let mut remaining = chunks.into_iter();

        loop {
            let batch: Vec<DocumentChunk> = remaining.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            batch_no += 1;
            let count = batch.len();

            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embeddings = self
                .provider
                .embed_texts(&texts)
                .map_err(|source| IndexRunError::Upsert {
                    batch: batch_no,
                    source,
                })?;

            self.store
                .upsert(batch, embeddings)
                .map_err(|source| IndexRunError::Upsert {
                    batch: batch_no,
                    source,
                })?;

            stored += count;
            debug!("Added batch {}: {} chunks", batch_no, count);
        }

        Ok((stored, batch_no))
    }
}

/// File content if it is valid UTF-8; anything else is skipped
fn read_text(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                debug!("Skipping non-UTF-8 file {:?}", path);
                None
            }
        },
        Err(e) => {
            warn!("Failed to process file {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryStore;
    use crate::testing::{write_file, FailingEmbedder, HashEmbedder, TEST_DIMENSION};

    fn indexer_for(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> (Indexer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(TEST_DIMENSION));
        let indexer = Indexer::new(config.validated().unwrap(), provider, store.clone()).unwrap();
        (indexer, store)
    }

    #[test]
    fn test_scan_depth_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "top.md", "top level notes");
        write_file(dir.path(), "sub/nested.txt", "one level down");
        write_file(dir.path(), "sub/deeper/too_deep.md", "two levels down");
        write_file(dir.path(), "script.rs", "fn main() {}");
        write_file(dir.path(), "binary.md", [0xffu8, 0xfe, 0x00, 0x80]);
        write_file(dir.path(), "blank.md", "   \n\n  ");

        let (indexer, _) = indexer_for(Config::new(dir.path()), Arc::new(HashEmbedder::new()));
        let scan = indexer.scan().unwrap();

        let mut names: Vec<&str> = scan.chunks.iter().map(|c| c.file_name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["nested.txt", "top.md"]);
        // blank.md is read but yields no chunks
        assert_eq!(scan.files_processed, 3);
        assert!(!scan.directory_missing);
    }

    #[test]
    fn test_batches_span_files() {
        let dir = tempfile::tempdir().unwrap();
        let content = "word ".repeat(50);
        for i in 0..5 {
            write_file(dir.path(), &format!("doc{}.txt", i), &content);
        }

        let mut config = Config::new(dir.path()).with_chunking(100, 0);
        config.embed_batch_size = 4;
        let provider = Arc::new(HashEmbedder::new());
        let (indexer, store) = indexer_for(config, provider.clone());

        let report = indexer.run().unwrap();
        assert_eq!(report.files_processed, 5);
        assert_eq!(report.chunks_indexed, 15);
        assert_eq!(report.batches, 4);
        assert_eq!(provider.batch_calls(), 4);
        assert_eq!(store.count().unwrap(), 15);
    }

    #[test]
    fn test_rerun_upserts_in_place() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.md", "alpha beta gamma");
        write_file(dir.path(), "b.md", "delta epsilon");

        let (indexer, store) = indexer_for(Config::new(dir.path()), Arc::new(HashEmbedder::new()));
        indexer.run().unwrap();
        indexer.run().unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_missing_directory_is_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let (indexer, store) = indexer_for(Config::new(&missing), Arc::new(HashEmbedder::new()));
        let report = indexer.run().unwrap();

        assert!(report.directory_missing);
        assert_eq!(report.chunks_indexed, 0);
        assert_eq!(store.count().unwrap(), 0);
        assert!(!missing.exists());
    }

    #[test]
    fn test_batch_failure_is_upsert_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.md", "alpha");

        let (indexer, store) = indexer_for(
            Config::new(dir.path()),
            Arc::new(FailingEmbedder { fail_queries: false }),
        );

        match indexer.run() {
            Err(IndexRunError::Upsert { batch, .. }) => assert_eq!(batch, 1),
            other => panic!("expected upsert error, got {:?}", other),
        }
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_large_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "small.md", "tiny");
        write_file(dir.path(), "large.md", "x".repeat(2048));

        let mut config = Config::new(dir.path());
        config.max_file_size = 1024;
        let (indexer, _) = indexer_for(config, Arc::new(HashEmbedder::new()));

        let scan = indexer.scan().unwrap();
        assert_eq!(scan.files_processed, 1);
        assert_eq!(scan.chunks[0].file_name, "small.md");
    }
}
