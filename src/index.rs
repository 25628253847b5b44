//! Vector stores
//!
//! [`VectorStore`] is the contract the indexer writes to and the searcher
//! reads from: upsert by chunk id, count, and nearest-neighbour query by
//! cosine distance. [`UsearchStore`] persists an HNSW index to disk;
//! [`MemoryStore`] keeps everything in process.

use crate::chunker::DocumentChunk;
use crate::embedder::cosine_similarity;
use crate::error::{Result, SemindexError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

/// A stored chunk returned by a nearest-neighbour query
#[derive(Debug, Clone)]
pub struct Neighbor {
    /// The matched chunk
    pub chunk: DocumentChunk,
    /// Cosine distance to the query (0.0 is identical)
    pub distance: f32,
}

/// Embedding-indexed collection of chunks
///
/// Implementations handle their own locking and must be safe to read while
/// another thread writes.
pub trait VectorStore: Send + Sync {
    /// Vector length this store accepts
    fn dimension(&self) -> usize;

    /// Number of chunks currently stored
    fn count(&self) -> Result<usize>;

    /// Insert chunks, replacing any stored chunk with the same id
    fn upsert(&self, chunks: Vec<DocumentChunk>, embeddings: Vec<Vec<f32>>) -> Result<()>;

    /// Up to `limit` chunks ordered by ascending distance
    fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<Neighbor>>;
}

fn check_batch(dimension: usize, chunks: &[DocumentChunk], embeddings: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != embeddings.len() {
        return Err(SemindexError::Index(
            "Chunks and embeddings count mismatch".to_string(),
        ));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
        return Err(SemindexError::Index(format!(
            "Expected embeddings of dimension {}, got {}",
            dimension,
            bad.len()
        )));
    }
    Ok(())
}

fn check_query(dimension: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() != dimension {
        return Err(SemindexError::Index(format!(
            "Query embedding has dimension {}, store expects {}",
            embedding.len(),
            dimension
        )));
    }
    Ok(())
}

fn poisoned<E: std::fmt::Display>(e: E) -> SemindexError {
    SemindexError::Index(format!("Store lock poisoned: {}", e))
}

/// Persisted chunk metadata, keyed by usearch key
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreMetadata {
    /// Provider fingerprint the vectors were produced with
    fingerprint: String,
    /// Embedding vector dimension
    dimension: usize,
    /// Chunks by usearch key
    chunks: HashMap<u64, DocumentChunk>,
    /// usearch key by chunk id
    keys: HashMap<String, u64>,
    /// Next usearch key to assign
    next_key: u64,
}

struct StoreInner {
    index: Index,
    metadata: StoreMetadata,
}

/// On-disk vector store using usearch (HNSW, cosine metric)
///
/// Nothing is written until the first upsert, so opening a store for a
/// directory that does not exist leaves the filesystem untouched.
pub struct UsearchStore {
    dir: PathBuf,
    dimension: usize,
    inner: RwLock<StoreInner>,
}

fn index_options(dimension: usize) -> IndexOptions {
    IndexOptions {
        dimensions: dimension,
        metric: MetricKind::Cos, // Cosine similarity
        quantization: ScalarKind::F32,
        connectivity: 16,     // M parameter for HNSW
        expansion_add: 128,   // ef_construction
        expansion_search: 64, // ef
        multi: false,
    }
}

fn new_index(dimension: usize) -> Result<Index> {
    Index::new(&index_options(dimension)).map_err(|e| SemindexError::Index(e.to_string()))
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| SemindexError::InvalidPath(path.display().to_string()))
}

impl UsearchStore {
    /// Open the store in `dir`, loading a previous index if one exists
    ///
    /// An unreadable or mismatched index is logged and replaced by an
    /// empty one.
    pub fn open(dir: PathBuf, fingerprint: &str, dimension: usize) -> Result<Self> {
        let (index, metadata) = if Self::index_path(&dir).exists() {
            match Self::load(&dir, fingerprint, dimension) {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!("Discarding unreadable index in {:?}: {}", dir, e);
                    (new_index(dimension)?, Self::empty_metadata(fingerprint, dimension))
                }
            }
        } else {
            (new_index(dimension)?, Self::empty_metadata(fingerprint, dimension))
        };

        Ok(Self {
            dir,
            dimension,
            inner: RwLock::new(StoreInner { index, metadata }),
        })
    }

    /// Directory the store persists to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(dir: &Path) -> PathBuf {
        dir.join("vectors.usearch")
    }

    fn metadata_path(dir: &Path) -> PathBuf {
        dir.join("metadata.bin")
    }

    fn empty_metadata(fingerprint: &str, dimension: usize) -> StoreMetadata {
        StoreMetadata {
            fingerprint: fingerprint.to_string(),
            dimension,
            ..Default::default()
        }
    }

    fn load(dir: &Path, fingerprint: &str, dimension: usize) -> Result<(Index, StoreMetadata)> {
        let index_path = Self::index_path(dir);
        info!("Loading index from {:?}", index_path);

        // Load metadata first to check it belongs to this provider
        let metadata_bytes = std::fs::read(Self::metadata_path(dir))?;
        let metadata: StoreMetadata = bincode::deserialize(&metadata_bytes)?;
        if metadata.fingerprint != fingerprint || metadata.dimension != dimension {
            return Err(SemindexError::Index(format!(
                "Index was built with {} ({} dims), expected {} ({} dims)",
                metadata.fingerprint, metadata.dimension, fingerprint, dimension
            )));
        }

        let index = new_index(dimension)?;
        index
            .load(path_str(&index_path)?)
            .map_err(|e| SemindexError::Index(e.to_string()))?;

        info!(
            "Loaded {} vectors, {} chunks",
            index.size(),
            metadata.chunks.len()
        );

        Ok((index, metadata))
    }

    fn save(&self, inner: &StoreInner) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        inner
            .index
            .save(path_str(&Self::index_path(&self.dir))?)
            .map_err(|e| SemindexError::Index(e.to_string()))?;

        let metadata_bytes = bincode::serialize(&inner.metadata)?;
        std::fs::write(Self::metadata_path(&self.dir), metadata_bytes)?;

        debug!(
            "Saved {} vectors, {} chunks to {:?}",
            inner.index.size(),
            inner.metadata.chunks.len(),
            self.dir
        );
        Ok(())
    }
}

impl VectorStore for UsearchStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn count(&self) -> Result<usize> {
        Ok(self.inner.read().map_err(poisoned)?.metadata.chunks.len())
    }

    fn upsert(&self, chunks: Vec<DocumentChunk>, embeddings: Vec<Vec<f32>>) -> Result<()> {
        check_batch(self.dimension, &chunks, &embeddings)?;
        if chunks.is_empty() {
            return Ok(());
        }

        let mut guard = self.inner.write().map_err(poisoned)?;
        let inner = &mut *guard;

        // Reserve space
        let needed = inner.index.size() + chunks.len();
        if needed > inner.index.capacity() {
            inner
                .index
                .reserve(needed)
                .map_err(|e| SemindexError::Index(e.to_string()))?;
        }

        for (chunk, embedding) in chunks.into_iter().zip(embeddings.iter()) {
            if let Some(old_key) = inner.metadata.keys.remove(&chunk.id) {
                inner
                    .index
                    .remove(old_key)
                    .map_err(|e| SemindexError::Index(e.to_string()))?;
                inner.metadata.chunks.remove(&old_key);
            }

            let key = inner.metadata.next_key;
            inner.metadata.next_key += 1;
            inner
                .index
                .add(key, embedding)
                .map_err(|e| SemindexError::Index(e.to_string()))?;

            debug!("Added chunk {} from {}", chunk.id, chunk.file_path);
            inner.metadata.keys.insert(chunk.id.clone(), key);
            inner.metadata.chunks.insert(key, chunk);
        }

        self.save(inner)
    }

    fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<Neighbor>> {
        check_query(self.dimension, embedding)?;
        let inner = self.inner.read().map_err(poisoned)?;
        if limit == 0 || inner.metadata.chunks.is_empty() {
            return Ok(vec![]);
        }

        let matches = inner
            .index
            .search(embedding, limit)
            .map_err(|e| SemindexError::Index(e.to_string()))?;

        let mut neighbors: Vec<Neighbor> = matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(key, distance)| {
                inner.metadata.chunks.get(key).map(|chunk| Neighbor {
                    chunk: chunk.clone(),
                    distance: *distance,
                })
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(neighbors)
    }
}

/// In-process vector store with brute-force cosine search
///
/// Not persisted. Useful for embedding hosts that manage their own storage
/// and for tests.
pub struct MemoryStore {
    dimension: usize,
    entries: RwLock<HashMap<String, (DocumentChunk, Vec<f32>)>>,
}

impl MemoryStore {
    /// Create an empty store for vectors of the given dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl VectorStore for MemoryStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }

    fn upsert(&self, chunks: Vec<DocumentChunk>, embeddings: Vec<Vec<f32>>) -> Result<()> {
        check_batch(self.dimension, &chunks, &embeddings)?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            entries.insert(chunk.id.clone(), (chunk, embedding));
        }
        Ok(())
    }

    fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<Neighbor>> {
        check_query(self.dimension, embedding)?;
        let entries = self.entries.read().map_err(poisoned)?;

        let mut neighbors: Vec<Neighbor> = entries
            .values()
            .map(|(chunk, stored)| Neighbor {
                chunk: chunk.clone(),
                distance: 1.0 - cosine_similarity(embedding, stored),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        neighbors.truncate(limit);

        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, content: &str) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            content: content.to_string(),
            file_path: format!("/docs/{}.md", id),
            file_name: format!("{}.md", id),
            chunk_index: 0,
            extension: ".md".to_string(),
        }
    }

    fn seed(store: &dyn VectorStore) {
        store
            .upsert(
                vec![chunk("a", "alpha"), chunk("b", "beta"), chunk("c", "gamma")],
                vec![
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.9, 0.1, 0.0],
                ],
            )
            .unwrap();
    }

    fn ids(neighbors: &[Neighbor]) -> Vec<&str> {
        neighbors.iter().map(|n| n.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_memory_store_orders_by_distance() {
        let store = MemoryStore::new(3);
        seed(&store);

        let neighbors = store.query(&[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(ids(&neighbors), vec!["a", "c", "b"]);
        assert!(neighbors[0].distance.abs() < 1e-6);
        assert!(neighbors.windows(2).all(|w| w[0].distance <= w[1].distance));

        let neighbors = store.query(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(neighbors.len(), 2);
    }

    #[test]
    fn test_memory_store_upsert_replaces_by_id() {
        let store = MemoryStore::new(3);
        seed(&store);

        store
            .upsert(vec![chunk("a", "alpha v2")], vec![vec![0.0, 0.0, 1.0]])
            .unwrap();

        assert_eq!(store.count().unwrap(), 3);
        let top = &store.query(&[0.0, 0.0, 1.0], 1).unwrap()[0];
        assert_eq!(top.chunk.id, "a");
        assert_eq!(top.chunk.content, "alpha v2");
    }

    #[test]
    fn test_dimension_checks() {
        let store = MemoryStore::new(3);
        assert!(store.upsert(vec![chunk("a", "x")], vec![vec![1.0, 0.0]]).is_err());
        assert!(store.upsert(vec![chunk("a", "x")], vec![]).is_err());
        assert!(store.query(&[1.0], 5).is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_usearch_store_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");

        {
            let store = UsearchStore::open(store_dir.clone(), "test:3", 3).unwrap();
            assert_eq!(store.count().unwrap(), 0);
            assert!(!store_dir.exists());

            seed(&store);
            assert_eq!(store.count().unwrap(), 3);

            let neighbors = store.query(&[1.0, 0.0, 0.0], 2).unwrap();
            assert_eq!(ids(&neighbors), vec!["a", "c"]);
        }

        let store = UsearchStore::open(store_dir.clone(), "test:3", 3).unwrap();
        assert_eq!(store.count().unwrap(), 3);
        let neighbors = store.query(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(ids(&neighbors), vec!["b"]);
        assert_eq!(neighbors[0].chunk.file_name, "b.md");
    }

    #[test]
    fn test_usearch_store_upsert_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsearchStore::open(dir.path().to_path_buf(), "test:3", 3).unwrap();
        seed(&store);

        store
            .upsert(vec![chunk("b", "beta v2")], vec![vec![0.0, 0.0, 1.0]])
            .unwrap();

        assert_eq!(store.count().unwrap(), 3);
        let neighbors = store.query(&[0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(neighbors[0].chunk.content, "beta v2");
    }

    #[test]
    fn test_usearch_store_ignores_foreign_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = UsearchStore::open(dir.path().to_path_buf(), "test:3", 3).unwrap();
            seed(&store);
        }

        let store = UsearchStore::open(dir.path().to_path_buf(), "other:3", 3).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }
}
