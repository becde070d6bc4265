use serde::{Deserialize, Serialize};

/// Tuning knobs for the chunker and hybrid searcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "d_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "d_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "d_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "d_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "d_decay_half_life_days")]
    pub decay_half_life_days: f64,
    #[serde(default = "d_true")]
    pub decay_enabled: bool,
    #[serde(default = "d_top_k")]
    pub top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            chunk_size: d_chunk_size(),
            chunk_overlap: d_chunk_overlap(),
            vector_weight: d_vector_weight(),
            keyword_weight: d_keyword_weight(),
            decay_half_life_days: d_decay_half_life_days(),
            decay_enabled: d_true(),
            top_k: d_top_k(),
        }
    }
}

fn d_chunk_size() -> usize {
    1600
}
fn d_chunk_overlap() -> usize {
    320
}
fn d_vector_weight() -> f64 {
    0.7
}
fn d_keyword_weight() -> f64 {
    0.3
}
fn d_decay_half_life_days() -> f64 {
    7.0
}
fn d_true() -> bool {
    true
}
fn d_top_k() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let c = MemoryConfig::default();
        assert_eq!(c.chunk_size, 1600);
        assert_eq!(c.chunk_overlap, 320);
        assert_eq!(c.vector_weight, 0.7);
        assert_eq!(c.keyword_weight, 0.3);
        assert_eq!(c.decay_half_life_days, 7.0);
        assert!(c.decay_enabled);
        assert_eq!(c.top_k, 10);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let c: MemoryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c.chunk_size, 1600);
    }
}
