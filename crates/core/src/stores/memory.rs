use crate::traits::{ChunkStore, ConversationStore};
use crate::{Chunk, ConversationMessage, SearchFilters, StoreError};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{OnceLock, RwLock};

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Chunk store over a fixed in-process corpus.
///
/// Similarity is cosine similarity. The full-text rank is a length-normalised
/// term frequency, unbounded above like a `ts_rank` score.
#[derive(Debug, Default)]
pub struct InMemoryChunkStore {
    chunks: Vec<StoredChunk>,
}

impl InMemoryChunkStore {
    pub fn new(chunks: Vec<StoredChunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn document_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.chunks
            .iter()
            .filter(|stored| seen.insert(stored.chunk.document_id.clone()))
            .map(|stored| stored.chunk.document_id.clone())
            .collect()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn query_chunks(
        &self,
        document_id: &str,
        query_vector: &[f32],
        query_text: Option<&str>,
        filters: &SearchFilters,
    ) -> Result<Vec<Chunk>, StoreError> {
        let terms = query_text.map(query_terms).unwrap_or_default();

        let mut scored: Vec<Chunk> = Vec::new();
        for stored in &self.chunks {
            if stored.chunk.document_id != document_id {
                continue;
            }
            if filters
                .page_number
                .is_some_and(|page| page != stored.chunk.page_number)
            {
                continue;
            }
            if !stored.embedding.is_empty() && stored.embedding.len() != query_vector.len() {
                return Err(StoreError::Request(format!(
                    "query vector dim {} is not {}",
                    query_vector.len(),
                    stored.embedding.len()
                )));
            }

            let mut chunk = stored.chunk.clone();
            chunk.similarity = cosine_similarity(query_vector, &stored.embedding);
            chunk.fts_rank = if terms.is_empty() {
                None
            } else {
                Some(text_rank(&chunk.content, &terms)).filter(|rank| *rank > 0.0)
            };
            chunk.score = 0.0;
            chunk.rerank_score = None;

            let below_floor = filters
                .min_similarity
                .is_some_and(|floor| chunk.similarity < floor);
            if below_floor && chunk.fts_rank.is_none() {
                continue;
            }
            scored.push(chunk);
        }

        let mut by_similarity = scored.clone();
        by_similarity.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));
        by_similarity.truncate(filters.match_count);

        if terms.is_empty() {
            return Ok(by_similarity);
        }

        let mut by_text: Vec<Chunk> = scored
            .into_iter()
            .filter(|chunk| chunk.fts_rank.is_some())
            .collect();
        by_text.sort_by(|left, right| {
            right
                .fts_rank
                .unwrap_or_default()
                .total_cmp(&left.fts_rank.unwrap_or_default())
        });
        by_text.truncate(filters.match_count);

        let mut seen: HashSet<String> = by_similarity
            .iter()
            .map(|chunk| chunk.chunk_id.clone())
            .collect();
        for chunk in by_text {
            if seen.insert(chunk.chunk_id.clone()) {
                by_similarity.push(chunk);
            }
        }

        Ok(by_similarity)
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot: f64 = left
        .iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();
    let left_norm = left.iter().map(|a| f64::from(*a).powi(2)).sum::<f64>().sqrt();
    let right_norm = right.iter().map(|b| f64::from(*b).powi(2)).sum::<f64>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\p{L}\p{N}$%]+").expect("word pattern is valid"))
}

fn tokenize(text: &str) -> Vec<String> {
    word_pattern()
        .find_iter(text)
        .map(|token| token.as_str().to_lowercase())
        .collect()
}

fn query_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|token| token.chars().count() > 2)
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

fn text_rank(content: &str, terms: &[String]) -> f64 {
    let tokens = tokenize(content);
    if tokens.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in &tokens {
        *counts.entry(token.as_str()).or_default() += 1;
    }
    let hits: usize = terms
        .iter()
        .map(|term| counts.get(term.as_str()).copied().unwrap_or(0))
        .sum();
    hits as f64 / (1.0 + (tokens.len() as f64).ln())
}

/// Conversation history held in memory, keyed by conversation id.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Vec<ConversationMessage>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: ConversationMessage) -> Result<(), StoreError> {
        let mut conversations = self
            .conversations
            .write()
            .map_err(|_| StoreError::Request("conversation store lock poisoned".to_string()))?;
        conversations
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<ConversationMessage>, StoreError> {
        let conversations = self
            .conversations
            .read()
            .map_err(|_| StoreError::Request("conversation store lock poisoned".to_string()))?;
        let mut history = conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        history.sort_by_key(|message| message.created_at);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;

    fn stored(id: &str, document_id: &str, page: u32, content: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            chunk: Chunk {
                chunk_id: id.to_string(),
                document_id: document_id.to_string(),
                document_name: Some(format!("{document_id}.pdf")),
                page_number: page,
                content: content.to_string(),
                bounding_box: None,
                similarity: 0.0,
                fts_rank: None,
                score: 0.0,
                rerank_score: None,
            },
            embedding,
        }
    }

    fn corpus() -> InMemoryChunkStore {
        InMemoryChunkStore::new(vec![
            stored("a", "policy", 1, "Dwelling coverage limit is $350,000", vec![1.0, 0.0]),
            stored("b", "policy", 2, "Flood coverage: flood zone flood exclusion.", vec![0.0, 1.0]),
            stored("c", "policy", 3, "Premium schedule", vec![0.7, 0.7]),
            stored("d", "quote", 1, "Flood deductible $2,500", vec![1.0, 0.0]),
        ])
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scopes_to_document_and_orders_by_similarity() {
        let store = corpus();
        let found = store
            .query_chunks("policy", &[1.0, 0.0], None, &SearchFilters::default())
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|chunk| chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!(found.iter().all(|chunk| chunk.fts_rank.is_none()));
    }

    #[tokio::test]
    async fn full_text_adds_keyword_matches_beyond_match_count() {
        let store = corpus();
        let filters = SearchFilters {
            match_count: 1,
            ..SearchFilters::default()
        };
        let found = store
            .query_chunks("policy", &[1.0, 0.0], Some("flood coverage"), &filters)
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|chunk| chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        let flood_rank = found[1].fts_rank.unwrap();
        assert!(flood_rank > 1.0, "rank {flood_rank} should exceed 1 for repeated terms");
    }

    #[tokio::test]
    async fn min_similarity_drops_weak_vector_only_hits() {
        let store = corpus();
        let filters = SearchFilters {
            min_similarity: Some(0.5),
            ..SearchFilters::default()
        };
        let found = store
            .query_chunks("policy", &[1.0, 0.0], None, &filters)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_an_error() {
        let store = corpus();
        let result = store
            .query_chunks("policy", &[1.0, 0.0, 0.0], None, &SearchFilters::default())
            .await;
        assert!(matches!(result, Err(StoreError::Request(_))));
    }

    #[test]
    fn lists_documents_in_corpus_order() {
        assert_eq!(corpus().document_ids(), vec!["policy", "quote"]);
    }

    #[tokio::test]
    async fn conversation_history_is_chronological() {
        let store = InMemoryConversationStore::new();
        let mut late = ConversationMessage::new("conv", MessageRole::Assistant, "second");
        let early = ConversationMessage::new("conv", MessageRole::User, "first");
        late.created_at = early.created_at + chrono::Duration::seconds(5);
        store.append(late).unwrap();
        store.append(early).unwrap();
        store
            .append(ConversationMessage::new("other", MessageRole::User, "elsewhere"))
            .unwrap();

        let history = store.get_history("conv").await.unwrap();
        let contents: Vec<_> = history.iter().map(|message| message.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert!(store.get_history("missing").await.unwrap().is_empty());
    }
}
