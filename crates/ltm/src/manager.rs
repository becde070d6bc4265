use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::chunk::chunk_text;
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::search::{Embedder, HybridSearcher, EVERGREEN_SOURCE};
use crate::store::{FileVectorStore, IndexedChunk, SearchResult};
use crate::trace::TraceEvent;

const EVERGREEN_HEADER: &str =
    "# MEMORY\n\nEvergreen notes. This file is exempt from temporal decay in search.\n";

/// Owns the memory root on disk: the evergreen file, the per-day logs, and
/// the chunked vector index built over all of it.
pub struct MemoryManager {
    root: PathBuf,
    canonical_root: PathBuf,
    config: MemoryConfig,
    store: Arc<FileVectorStore>,
    searcher: HybridSearcher,
    embedder: Option<Arc<dyn Embedder>>,
}

impl MemoryManager {
    pub fn open(root: &Path, config: MemoryConfig, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        if !root.exists() {
            return Err(MemoryError::RootMissing(root.display().to_string()));
        }
        let canonical_root = root.canonicalize()?;

        let evergreen_path = root.join(EVERGREEN_SOURCE);
        if !evergreen_path.exists() {
            std::fs::write(&evergreen_path, EVERGREEN_HEADER)?;
        }

        let store = Arc::new(FileVectorStore::open(root.join("index"))?);
        let searcher = HybridSearcher::new(store.clone(), embedder.clone(), config.clone());

        Ok(Self {
            root: root.to_path_buf(),
            canonical_root,
            config,
            store,
            searcher,
            embedder,
        })
    }

    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        let results = self.searcher.search(query).await;
        TraceEvent::SearchPerformed {
            query: query.to_string(),
            result_count: results.len(),
            embedder_used: self.embedder.is_some(),
        }
        .emit();
        results
    }

    pub async fn get_file(&self, rel_path: &str) -> Result<String> {
        let root = self.root.clone();
        let canonical_root = self.canonical_root.clone();
        let rel_path = rel_path.to_string();
        tokio::task::spawn_blocking(move || {
            let resolved = sanitize(&root, &canonical_root, &rel_path)?;
            std::fs::read_to_string(&resolved).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MemoryError::NotFound(rel_path.clone())
                } else {
                    MemoryError::Io(e)
                }
            })
        })
        .await
        .map_err(join_err)?
    }

    pub async fn append_daily_log(&self, observation: &str) -> Result<()> {
        let now = Utc::now();
        let date = now.format("%Y-%m-%d").to_string();
        let path = self.root.join(format!("{date}.md"));
        let entry = format!("\n## {}\n{}\n", now.format("%H:%M:%S"), observation);

        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(entry.as_bytes())?;
            Ok(())
        })
        .await
        .map_err(join_err)??;

        TraceEvent::DailyLogAppended { date }.emit();

        if let Some(target) = self.most_recently_modified_non_evergreen().await? {
            if let Err(e) = self.index_file(&target).await {
                tracing::warn!(error = %e, path = %target.display(), "failed to re-index after daily log append");
            }
        }
        Ok(())
    }

    /// Scan over `*.md` excluding the evergreen file; ties broken by
    /// filename for determinism.
    async fn most_recently_modified_non_evergreen(&self) -> Result<Option<PathBuf>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<PathBuf>> {
            let mut best: Option<(PathBuf, std::time::SystemTime, String)> = None;
            for entry in std::fs::read_dir(&root)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                if name == EVERGREEN_SOURCE {
                    continue;
                }
                let modified = entry.metadata()?.modified()?;
                let take = match &best {
                    None => true,
                    Some((_, best_modified, best_name)) => {
                        modified > *best_modified || (modified == *best_modified && name < *best_name)
                    }
                };
                if take {
                    best = Some((path, modified, name));
                }
            }
            Ok(best.map(|(path, _, _)| path))
        })
        .await
        .map_err(join_err)?
    }

    pub async fn index_all(&self) -> Result<()> {
        let root = self.root.clone();
        let paths = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(&root)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("md") {
                    paths.push(path);
                }
            }
            Ok(paths)
        })
        .await
        .map_err(join_err)??;

        for path in paths {
            if let Err(e) = self.index_file(&path).await {
                tracing::warn!(error = %e, path = %path.display(), "failed to index memory file");
            }
        }
        Ok(())
    }

    pub async fn index_file(&self, path: &Path) -> Result<()> {
        let read_path = path.to_path_buf();
        let content = tokio::task::spawn_blocking(move || std::fs::read_to_string(&read_path))
            .await
            .map_err(join_err)??;
        let source = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let removed = self.store.delete_by_source(&source);
        if removed > 0 {
            TraceEvent::SourceDeleted { source: source.clone(), removed_count: removed }.emit();
        }

        let chunks = chunk_text(&content, &source, self.config.chunk_size, self.config.chunk_overlap);
        if chunks.is_empty() {
            return Ok(());
        }
        let chunk_count = chunks.len();

        let indexed = match &self.embedder {
            Some(embedder) => {
                let mut out = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    let vector = match embedder.embed(&chunk.content).await {
                        Ok(v) => Some(v),
                        Err(e) => {
                            tracing::warn!(error = %e, chunk_id = %chunk.id, "embed failed, storing without vector");
                            None
                        }
                    };
                    out.push(IndexedChunk { chunk, vector });
                }
                out
            }
            None => chunks.into_iter().map(|chunk| IndexedChunk { chunk, vector: None }).collect(),
        };

        self.store.index(indexed);
        TraceEvent::ChunkIndexed { source, chunk_count }.emit();
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Rejects any path whose cleaned form is absolute, begins with `..`, or
/// resolves outside `canonical_root`. Free function (not a `&self` method)
/// so it can run inside a `spawn_blocking` closure that only owns the two
/// paths it needs.
fn sanitize(root: &Path, canonical_root: &Path, rel_path: &str) -> Result<PathBuf> {
    for component in Path::new(rel_path).components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MemoryError::UnsafePath {
                    path: rel_path.to_string(),
                    reason: "absolute or parent-relative path".to_string(),
                });
            }
            _ => {}
        }
    }
    let joined = root.join(rel_path);
    let resolved = joined.canonicalize().map_err(|_| MemoryError::UnsafePath {
        path: rel_path.to_string(),
        reason: "does not resolve under the memory root".to_string(),
    })?;
    if !resolved.starts_with(canonical_root) {
        return Err(MemoryError::UnsafePath {
            path: rel_path.to_string(),
            reason: "resolves outside the memory root".to_string(),
        });
    }
    Ok(resolved)
}

fn join_err(e: tokio::task::JoinError) -> MemoryError {
    MemoryError::Io(std::io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_manager(root: &Path) -> MemoryManager {
        MemoryManager::open(root, MemoryConfig::default(), None).unwrap()
    }

    #[tokio::test]
    async fn open_creates_evergreen_file_and_index_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path());
        assert!(dir.path().join(EVERGREEN_SOURCE).exists());
        assert!(manager.get_file(EVERGREEN_SOURCE).await.unwrap().contains("MEMORY"));
    }

    #[test]
    fn open_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let result = MemoryManager::open(&missing, MemoryConfig::default(), None);
        assert!(matches!(result, Err(MemoryError::RootMissing(_))));
    }

    #[tokio::test]
    async fn p7_get_file_rejects_unsafe_paths() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path());
        std::fs::write(dir.path().join("a.md"), "hello").unwrap();

        assert!(manager.get_file("a.md").await.is_ok());
        assert!(matches!(manager.get_file("../a.md").await, Err(MemoryError::UnsafePath { .. })));
        assert!(matches!(manager.get_file("/etc/passwd").await, Err(MemoryError::UnsafePath { .. })));
        assert!(matches!(manager.get_file("sub/../../a.md").await, Err(MemoryError::UnsafePath { .. })));
    }

    #[tokio::test]
    async fn get_file_missing_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path());
        assert!(matches!(manager.get_file("missing.md").await, Err(MemoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn append_daily_log_creates_dated_file_with_entry_format() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path());
        manager.append_daily_log("did a thing").await.unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let content = std::fs::read_to_string(dir.path().join(format!("{today}.md"))).unwrap();
        assert!(content.starts_with("\n## "));
        assert!(content.contains("did a thing"));
    }

    #[tokio::test]
    async fn append_daily_log_appends_on_repeat_calls() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path());
        manager.append_daily_log("first").await.unwrap();
        manager.append_daily_log("second").await.unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let content = std::fs::read_to_string(dir.path().join(format!("{today}.md"))).unwrap();
        assert!(content.contains("first"));
        assert!(content.contains("second"));
    }

    #[tokio::test]
    async fn index_file_and_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path());
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "an important fact about the deploy pipeline").unwrap();

        manager.index_file(&path).await.unwrap();
        let results = manager.search("deploy pipeline").await;
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn index_all_covers_every_markdown_file_non_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path());
        std::fs::write(dir.path().join("a.md"), "alpha content here").unwrap();
        std::fs::write(dir.path().join("b.md"), "bravo content here").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not markdown").unwrap();

        manager.index_all().await.unwrap();
        let results = manager.search("content").await;
        let sources: std::collections::HashSet<_> = results.iter().map(|r| r.chunk.source.clone()).collect();
        assert!(sources.contains("a.md"));
        assert!(sources.contains("b.md"));
    }

    #[tokio::test]
    async fn reindexing_a_source_replaces_its_old_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path());
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "original content").unwrap();
        manager.index_file(&path).await.unwrap();

        std::fs::write(&path, "replaced content").unwrap();
        manager.index_file(&path).await.unwrap();

        let results = manager.search("original").await;
        assert!(results.is_empty());
        let results = manager.search("replaced").await;
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(dir.path());
        manager.close().await.unwrap();
        manager.close().await.unwrap();
    }
}
