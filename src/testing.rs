//! Deterministic embedding providers for unit tests
//!
//! None of these touch the network or load model weights.

use crate::embedder::{normalize, EmbeddingProvider};
use crate::error::{Result, SemindexError};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

pub(crate) const TEST_DIMENSION: usize = 64;

/// Bag-of-words vector: every lowercased word bumps one FNV-1a bucket
pub(crate) fn embed_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; TEST_DIMENSION];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.to_lowercase().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        vector[(hash % TEST_DIMENSION as u64) as usize] += 1.0;
    }
    normalize(&mut vector);
    vector
}

/// Write `content` to `root/relative`, creating parent directories
pub(crate) fn write_file(root: &Path, relative: &str, content: impl AsRef<[u8]>) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

#[derive(Default)]
pub(crate) struct HashEmbedder {
    batch_calls: AtomicUsize,
}

impl HashEmbedder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn fingerprint(&self) -> String {
        format!("test:hash:{}", TEST_DIMENSION)
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| embed_words(t)).collect())
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        Ok(embed_words(query))
    }
}

#[derive(Default)]
struct Gate {
    open: bool,
    entered: bool,
}

/// Blocks every batch call until [`GatedEmbedder::open`] is called
#[derive(Default)]
pub(crate) struct GatedEmbedder {
    inner: HashEmbedder,
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl GatedEmbedder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait until the indexer is parked inside `embed_texts`
    pub(crate) fn wait_entered(&self) {
        let mut gate = self.gate.lock().unwrap();
        while !gate.entered {
            gate = self.changed.wait(gate).unwrap();
        }
    }

    pub(crate) fn open(&self) {
        self.gate.lock().unwrap().open = true;
        self.changed.notify_all();
    }
}

impl EmbeddingProvider for GatedEmbedder {
    fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut gate = self.gate.lock().unwrap();
        gate.entered = true;
        self.changed.notify_all();
        while !gate.open {
            gate = self.changed.wait(gate).unwrap();
        }
        drop(gate);
        self.inner.embed_texts(texts)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.inner.embed_query(query)
    }
}

/// Fails every batch; queries fail too when `fail_queries` is set
pub(crate) struct FailingEmbedder {
    pub(crate) fail_queries: bool,
}

impl EmbeddingProvider for FailingEmbedder {
    fn fingerprint(&self) -> String {
        format!("test:hash:{}", TEST_DIMENSION)
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(SemindexError::Embedding("model unavailable".to_string()))
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if self.fail_queries {
            Err(SemindexError::Embedding("model unavailable".to_string()))
        } else {
            Ok(embed_words(query))
        }
    }
}

/// Panics on the first batch
pub(crate) struct PanickingEmbedder;

impl EmbeddingProvider for PanickingEmbedder {
    fn fingerprint(&self) -> String {
        format!("test:hash:{}", TEST_DIMENSION)
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        panic!("embedding backend crashed");
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        Ok(embed_words(query))
    }
}
