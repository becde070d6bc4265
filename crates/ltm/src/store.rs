use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::error::{MemoryError, Result};

/// A chunk plus its (optional) embedding vector. Vectors need not share a
/// dimension across entries; mismatched dimensions simply score 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Option<Vec<f32>>,
}

/// A chunk plus the score it earned against a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f64,
}

/// Cosine similarity. Returns 0 on dimension mismatch, a zero vector on
/// either side, or an empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// File-backed vector store: a map of chunk id -> `IndexedChunk`, persisted
/// as a single JSON array. Corruption at load is not fatal — the store
/// simply starts empty.
pub struct FileVectorStore {
    index_dir: PathBuf,
    inner: RwLock<HashMap<String, IndexedChunk>>,
    dirty: AtomicBool,
}

impl FileVectorStore {
    pub fn open(index_dir: impl AsRef<Path>) -> Result<Self> {
        let index_dir = index_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&index_dir)?;
        let path = index_dir.join("index.json");

        let entries: HashMap<String, IndexedChunk> = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Vec<IndexedChunk>>(&data) {
                Ok(parsed) => parsed.into_iter().map(|e| (e.chunk.id.clone(), e)).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "vector store index corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            index_dir,
            inner: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn index(&self, chunks: Vec<IndexedChunk>) {
        if chunks.is_empty() {
            return;
        }
        let mut guard = self.inner.write();
        for c in chunks {
            guard.insert(c.chunk.id.clone(), c);
        }
        drop(guard);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// `k <= 0` returns everything — the contract the hybrid searcher's
    /// keyword-only path relies on.
    pub fn search(&self, query_vector: &[f32], k: i64) -> Vec<SearchResult> {
        let guard = self.inner.read();
        let mut results: Vec<SearchResult> = Vec::new();

        for entry in guard.values() {
            let score = match &entry.vector {
                Some(v) => cosine_similarity(query_vector, v),
                None => 0.0,
            };
            if k <= 0 {
                results.push(SearchResult {
                    chunk: entry.chunk.clone(),
                    score,
                });
                continue;
            }
            let pos = results
                .binary_search_by(|r| score.partial_cmp(&r.score).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap_or_else(|p| p);
            results.insert(
                pos,
                SearchResult {
                    chunk: entry.chunk.clone(),
                    score,
                },
            );
            if results.len() as i64 > k {
                results.truncate(k as usize);
            }
        }

        if k <= 0 {
            results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }
        results
    }

    pub fn delete_by_source(&self, source: &str) -> usize {
        let mut guard = self.inner.write();
        let before = guard.len();
        guard.retain(|_, v| v.chunk.source != source);
        let removed = before - guard.len();
        if removed > 0 {
            drop(guard);
            self.dirty.store(true, Ordering::SeqCst);
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// No-op when no writes have occurred since open/last close; otherwise
    /// writes to `index.json.tmp` and atomically renames over `index.json`.
    pub async fn close(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let entries: Vec<IndexedChunk> = self.inner.read().values().cloned().collect();
        self.persist(entries).await
    }

    async fn persist(&self, entries: Vec<IndexedChunk>) -> Result<()> {
        let index_dir = self.index_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let json = serde_json::to_string_pretty(&entries)?;
            let tmp_path = index_dir.join("index.json.tmp");
            let final_path = index_dir.join("index.json");
            std::fs::write(&tmp_path, json)?;
            std::fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })
        .await
        .map_err(|e| MemoryError::Io(std::io::Error::other(e.to_string())))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use chrono::Utc;

    fn make_chunk(id_seed: &str, source: &str) -> Chunk {
        Chunk {
            id: chunk_id(source, 0, 0, id_seed),
            source: source.to_string(),
            content: id_seed.to_string(),
            line_start: 0,
            line_end: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn p5_cosine_sanity() {
        let v = vec![1.0f32, 2.0, 3.0];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&v, &[1.0, 2.0]), 0.0); // dimension mismatch
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0); // zero norm
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn index_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileVectorStore::open(dir.path()).unwrap();
        assert_eq!(store.count(), 0);
        store.index(vec![IndexedChunk {
            chunk: make_chunk("hello", "a.md"),
            vector: Some(vec![1.0, 0.0]),
        }]);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn s7_delete_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileVectorStore::open(dir.path()).unwrap();
        store.index(vec![
            IndexedChunk { chunk: make_chunk("one", "a.md"), vector: None },
            IndexedChunk { chunk: make_chunk("two", "a.md"), vector: None },
            IndexedChunk { chunk: make_chunk("three", "b.md"), vector: None },
        ]);
        assert_eq!(store.count(), 3);
        let removed = store.delete_by_source("a.md");
        assert_eq!(removed, 2);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn k_zero_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileVectorStore::open(dir.path()).unwrap();
        store.index(vec![
            IndexedChunk { chunk: make_chunk("one", "a.md"), vector: None },
            IndexedChunk { chunk: make_chunk("two", "a.md"), vector: None },
        ]);
        let results = store.search(&[], 0);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn search_respects_k_and_descending_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileVectorStore::open(dir.path()).unwrap();
        store.index(vec![
            IndexedChunk { chunk: make_chunk("low", "a.md"), vector: Some(vec![0.1, 0.0]) },
            IndexedChunk { chunk: make_chunk("high", "a.md"), vector: Some(vec![1.0, 0.0]) },
            IndexedChunk { chunk: make_chunk("mid", "a.md"), vector: Some(vec![0.5, 0.0]) },
        ]);
        let results = store.search(&[1.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn close_persists_atomically_and_reload_restores() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileVectorStore::open(dir.path()).unwrap();
            store.index(vec![IndexedChunk { chunk: make_chunk("hello", "a.md"), vector: Some(vec![1.0]) }]);
            store.close().await.unwrap();
            assert!(dir.path().join("index.json").exists());
            assert!(!dir.path().join("index.json.tmp").exists());
        }
        let reopened = FileVectorStore::open(dir.path()).unwrap();
        assert_eq!(reopened.count(), 1);
    }

    #[tokio::test]
    async fn close_is_noop_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileVectorStore::open(dir.path()).unwrap();
        store.close().await.unwrap();
        assert!(!dir.path().join("index.json").exists());
    }

    #[test]
    fn corrupt_index_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("index.json"), "not json").unwrap();
        let store = FileVectorStore::open(dir.path()).unwrap();
        assert_eq!(store.count(), 0);
    }
}
