use std::collections::{HashMap, HashSet};
use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::MemoryConfig;
use crate::store::{FileVectorStore, IndexedChunk, SearchResult};

/// Name of the evergreen file, exempt from temporal decay.
pub const EVERGREEN_SOURCE: &str = "MEMORY.md";

/// Abstract embedding collaborator. No concrete provider ships in this
/// crate — wiring a real one is the host application's job.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// Lowercase, whitespace-split, strip leading/trailing common punctuation,
/// drop empties, dedupe preserving first-seen order.
pub fn tokenize(text: &str) -> Vec<String> {
    const PUNCTUATION: &[char] = &[
        '.', ',', ';', ':', '!', '?', '"', '\'', '(', ')', '[', ']', '{', '}', '—', '-',
    ];
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for word in text.to_lowercase().split_whitespace() {
        let trimmed = word.trim_matches(|c| PUNCTUATION.contains(&c));
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn keyword_score(q_terms: &[String], content_lower: &str) -> f64 {
    if q_terms.is_empty() {
        return 0.0;
    }
    let matched = q_terms.iter().filter(|t| content_lower.contains(t.as_str())).count();
    matched as f64 / q_terms.len() as f64
}

fn decay_factor(source: &str, created_at: DateTime<Utc>, now: DateTime<Utc>, config: &MemoryConfig) -> f64 {
    if source == EVERGREEN_SOURCE || !config.decay_enabled {
        return 1.0;
    }
    let age_seconds = (now - created_at).num_seconds().max(0) as f64;
    let half_life_seconds = config.decay_half_life_days * 86_400.0;
    if half_life_seconds <= 0.0 {
        return 1.0;
    }
    (-std::f64::consts::LN_2 * age_seconds / half_life_seconds).exp()
}

/// Combines vector similarity, keyword overlap, and temporal decay into a
/// ranked result list.
pub struct HybridSearcher {
    store: Arc<FileVectorStore>,
    embedder: Option<Arc<dyn Embedder>>,
    config: MemoryConfig,
}

impl HybridSearcher {
    pub fn new(store: Arc<FileVectorStore>, embedder: Option<Arc<dyn Embedder>>, config: MemoryConfig) -> Self {
        Self { store, embedder, config }
    }

    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        let top_k = self.config.top_k;
        let now = Utc::now();

        let (candidates, vector_scores, embedder_used) = self.gather_candidates(query, top_k).await;

        let q_terms = tokenize(query);
        let mut scored: Vec<SearchResult> = Vec::new();
        for c in candidates {
            let content_lower = c.chunk.content.to_lowercase();
            let kw = keyword_score(&q_terms, &content_lower);
            let decay = decay_factor(&c.chunk.source, c.chunk.created_at, now, &self.config);

            let final_score = if embedder_used {
                let vscore = vector_scores.get(&c.chunk.id).copied().unwrap_or(0.0);
                (self.config.vector_weight * vscore + self.config.keyword_weight * kw) * decay
            } else {
                kw * decay
            };

            if final_score == 0.0 {
                continue;
            }
            scored.push(SearchResult { chunk: c.chunk, score: final_score });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    async fn gather_candidates(
        &self,
        query: &str,
        top_k: usize,
    ) -> (Vec<IndexedChunk>, HashMap<String, f64>, bool) {
        if let Some(embedder) = &self.embedder {
            match embedder.embed(query).await {
                Ok(vector) if !vector.is_empty() => {
                    let k = (top_k * 3) as i64;
                    let results = self.store.search(&vector, k);
                    let scores: HashMap<String, f64> =
                        results.iter().map(|r| (r.chunk.id.clone(), r.score)).collect();
                    let chunks: Vec<IndexedChunk> = results
                        .into_iter()
                        .map(|r| IndexedChunk { chunk: r.chunk, vector: None })
                        .collect();
                    return (chunks, scores, true);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "embedder call failed, falling back to keyword-only search");
                }
            }
        }
        // Keyword-only mode: `k <= 0` is the vector store's documented
        // "return everything" contract (see §4.3/§9) rather than a
        // separate listing method.
        let chunks = self
            .store
            .search(&[], 0)
            .into_iter()
            .map(|r| IndexedChunk { chunk: r.chunk, vector: None })
            .collect();
        (chunks, HashMap::new(), false)
    }
}
