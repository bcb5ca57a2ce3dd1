use crate::confidence::ConfidencePolicy;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_VECTOR_WEIGHT: f64 = 0.7;
pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_HISTORY_MESSAGES: usize = 10;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSettings {
    pub batch_size: usize,
    pub max_retries: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_backoff: Duration,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub vector_weight: f64,
    pub top_k: usize,
    pub rerank_top_n: usize,
    pub candidate_count: usize,
    pub min_similarity: Option<f64>,
    pub use_hybrid_search: bool,
    pub history_token_budget: usize,
    pub max_history_messages: usize,
    pub embedding: EmbeddingSettings,
    pub confidence: ConfidencePolicy,
    /// Replace the final user turn with a fixed not-found instruction when nothing relevant was retrieved.
    pub not_found_fallback: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            top_k: DEFAULT_TOP_K,
            rerank_top_n: DEFAULT_TOP_K,
            candidate_count: 20,
            min_similarity: None,
            use_hybrid_search: true,
            history_token_budget: 2_000,
            max_history_messages: MAX_HISTORY_MESSAGES,
            embedding: EmbeddingSettings::default(),
            confidence: ConfidencePolicy::default(),
            not_found_fallback: false,
        }
    }
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.vector_weight) {
            return Err(ConfigError::Invalid(format!(
                "vector_weight {} must be within [0, 1]",
                self.vector_weight
            )));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be greater than zero".to_string()));
        }
        if self.rerank_top_n == 0 {
            return Err(ConfigError::Invalid(
                "rerank_top_n must be greater than zero".to_string(),
            ));
        }
        if self.candidate_count < self.top_k {
            return Err(ConfigError::Invalid(format!(
                "candidate_count {} is smaller than top_k {}",
                self.candidate_count, self.top_k
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// API keys for external providers, injected by the caller rather than read from the environment.
#[derive(Clone, Default)]
pub struct ProviderKeys {
    pub embedding_api_key: Option<String>,
    pub rerank_api_key: Option<String>,
}

impl ProviderKeys {
    pub fn new(embedding_api_key: Option<String>, rerank_api_key: Option<String>) -> Self {
        Self {
            embedding_api_key,
            rerank_api_key,
        }
    }

    pub fn is_reranker_enabled(&self) -> bool {
        non_empty(self.rerank_api_key.as_deref()).is_some()
    }

    pub fn require_rerank_key(&self) -> Result<&str, ConfigError> {
        non_empty(self.rerank_api_key.as_deref()).ok_or(ConfigError::MissingKey("rerank"))
    }

    pub fn require_embedding_key(&self) -> Result<&str, ConfigError> {
        non_empty(self.embedding_api_key.as_deref()).ok_or(ConfigError::MissingKey("embedding"))
    }
}

impl fmt::Debug for ProviderKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderKeys")
            .field("embedding_api_key", &self.embedding_api_key.as_ref().map(|_| "<redacted>"))
            .field("rerank_api_key", &self.rerank_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vector_weight, 0.7);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.max_history_messages, 10);
        assert_eq!(config.embedding.batch_size, 20);
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let config = RagConfig {
            vector_weight: 1.2,
            ..RagConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn reranker_toggle_depends_on_key() {
        let keys = ProviderKeys::new(Some("sk-embed".to_string()), None);
        assert!(!keys.is_reranker_enabled());
        assert_eq!(keys.require_rerank_key(), Err(ConfigError::MissingKey("rerank")));

        let keys = ProviderKeys::new(None, Some("  ".to_string()));
        assert!(!keys.is_reranker_enabled());

        let keys = ProviderKeys::new(None, Some("co-key".to_string()));
        assert!(keys.is_reranker_enabled());
        assert_eq!(keys.require_rerank_key(), Ok("co-key"));
        assert_eq!(keys.require_embedding_key(), Err(ConfigError::MissingKey("embedding")));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let keys = ProviderKeys::new(Some("sk-secret".to_string()), Some("co-secret".to_string()));
        let rendered = format!("{keys:?}");
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: RagConfig = serde_json::from_str(r#"{"vector_weight": 0.5}"#).unwrap();
        assert_eq!(config.vector_weight, 0.5);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
    }
}
