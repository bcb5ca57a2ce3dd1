use crate::confidence::ConfidenceLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

/// Highlight geometry of a chunk on its page, in page coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A page-scoped span of extracted document text, as returned by a chunk store.
///
/// `similarity` is the vector score reported by the store, `fts_rank` the optional
/// full-text rank (unbounded). `score` is the ranking key assigned by hybrid search
/// and `rerank_score` is set only when a reranker reordered the chunk.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_name: Option<String>,
    pub page_number: u32,
    pub content: String,
    pub bounding_box: Option<BoundingBox>,
    pub similarity: f64,
    pub fts_rank: Option<f64>,
    #[serde(default)]
    pub score: f64,
    pub rerank_score: Option<f64>,
}

impl Chunk {
    /// Name used when grouping chunks by document; falls back to the document id.
    pub fn display_name(&self) -> &str {
        self.document_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.document_id)
    }
}

/// Store-side options for a single chunk query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchFilters {
    /// How many candidates the store should return.
    pub match_count: usize,
    /// Candidates with a vector similarity below this are dropped by the store.
    pub min_similarity: Option<f64>,
    /// Restrict to a single page.
    pub page_number: Option<u32>,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            match_count: 20,
            min_similarity: None,
            page_number: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// Pointer from an answer back to the chunk that informed it.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceCitation {
    pub page_number: u32,
    pub text: String,
    pub chunk_id: String,
    pub similarity_score: Option<f64>,
    pub bounding_box: Option<BoundingBox>,
    pub document_id: Option<String>,
    pub document_name: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<SourceCitation>,
    pub confidence: Option<ConfidenceLevel>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(conversation_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            sources: Vec::new(),
            confidence: None,
            created_at: Utc::now(),
        }
    }
}

/// One entry of the message array handed to the LLM streaming layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}
