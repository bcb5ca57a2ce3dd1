use crate::confidence::ConfidenceLevel;
use crate::traits::{ChunkStore, ConversationStore};
use crate::{
    BoundingBox, Chunk, ConversationMessage, MessageRole, SearchFilters, SourceCitation, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

const DEFAULT_SEARCH_FUNCTION: &str = "match_document_chunks_hybrid";
const DEFAULT_MESSAGES_TABLE: &str = "chat_messages";

/// Chunk and conversation store backed by a PostgREST endpoint (for example a hosted Postgres with pgvector).
pub struct PostgrestStore {
    client: Client,
    base_url: Url,
    api_key: String,
    search_function: String,
    messages_table: String,
}

impl PostgrestStore {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, StoreError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            api_key: api_key.into(),
            search_function: DEFAULT_SEARCH_FUNCTION.to_string(),
            messages_table: DEFAULT_MESSAGES_TABLE.to_string(),
        })
    }

    pub fn with_search_function(mut self, name: impl Into<String>) -> Self {
        self.search_function = name.into();
        self
    }

    pub fn with_messages_table(mut self, name: impl Into<String>) -> Self {
        self.messages_table = name.into();
        self
    }

    fn rpc_url(&self) -> Result<Url, StoreError> {
        Ok(self
            .base_url
            .join("rest/v1/rpc/")?
            .join(&self.search_function)?)
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        Ok(self.base_url.join("rest/v1/")?.join(table)?)
    }
}

#[async_trait]
impl ChunkStore for PostgrestStore {
    async fn query_chunks(
        &self,
        document_id: &str,
        query_vector: &[f32],
        query_text: Option<&str>,
        filters: &SearchFilters,
    ) -> Result<Vec<Chunk>, StoreError> {
        let body = json!({
            "p_document_id": document_id,
            "p_query_embedding": query_vector,
            "p_query_text": query_text,
            "p_match_count": filters.match_count,
            "p_min_similarity": filters.min_similarity,
            "p_page_number": filters.page_number,
        });

        let response = self
            .client
            .post(self.rpc_url()?)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "postgrest".to_string(),
                details: response.status().to_string(),
            });
        }

        let rows: Value = response.json().await?;
        parse_chunk_rows(&rows, document_id)
    }
}

#[async_trait]
impl ConversationStore for PostgrestStore {
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<ConversationMessage>, StoreError> {
        let mut url = self.table_url(&self.messages_table)?;
        url.query_pairs_mut()
            .append_pair("conversation_id", &format!("eq.{conversation_id}"))
            .append_pair("order", "created_at.asc")
            .append_pair(
                "select",
                "id,conversation_id,role,content,sources,confidence,created_at",
            );

        let response = self
            .client
            .get(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "postgrest".to_string(),
                details: response.status().to_string(),
            });
        }

        let rows: Vec<MessageRow> = response.json().await?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }
}

#[derive(Deserialize)]
struct ChunkRow {
    id: Value,
    document_id: Option<String>,
    document_name: Option<String>,
    page_number: Option<u32>,
    content: String,
    bounding_box: Option<BoundingBox>,
    similarity: Option<f64>,
    fts_rank: Option<f64>,
}

fn parse_chunk_rows(rows: &Value, document_id: &str) -> Result<Vec<Chunk>, StoreError> {
    let rows = rows.as_array().ok_or_else(|| StoreError::BackendResponse {
        backend: "postgrest".to_string(),
        details: "expected an array of chunk rows".to_string(),
    })?;

    rows.iter()
        .map(|row| -> Result<Chunk, StoreError> {
            let row: ChunkRow = serde_json::from_value(row.clone())?;
            let chunk_id = match &row.id {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            };
            Ok(Chunk {
                chunk_id,
                document_id: row.document_id.unwrap_or_else(|| document_id.to_string()),
                document_name: row.document_name,
                page_number: row.page_number.unwrap_or(1),
                content: row.content,
                bounding_box: row.bounding_box,
                similarity: row.similarity.unwrap_or(0.0),
                fts_rank: row.fts_rank,
                score: 0.0,
                rerank_score: None,
            })
        })
        .collect()
}

#[derive(Deserialize)]
struct MessageRow {
    id: Uuid,
    conversation_id: String,
    role: MessageRole,
    content: String,
    sources: Option<Vec<SourceCitation>>,
    confidence: Option<ConfidenceLevel>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> ConversationMessage {
        ConversationMessage {
            id: self.id,
            conversation_id: self.conversation_id,
            role: self.role,
            content: self.content,
            sources: self.sources.unwrap_or_default(),
            confidence: self.confidence,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_rest_urls_under_base_path() {
        let store = PostgrestStore::new("https://example.supabase.co", "anon").unwrap();
        assert_eq!(
            store.rpc_url().unwrap().as_str(),
            "https://example.supabase.co/rest/v1/rpc/match_document_chunks_hybrid"
        );

        let store = PostgrestStore::new("http://localhost:54321/api", "anon")
            .unwrap()
            .with_messages_table("messages");
        assert_eq!(
            store.table_url("messages").unwrap().as_str(),
            "http://localhost:54321/api/rest/v1/messages"
        );
    }

    #[test]
    fn parses_rows_with_missing_optional_fields() {
        let rows = json!([
            {
                "id": 17,
                "content": "Section II - Liability",
                "page_number": 4,
                "similarity": 0.82,
                "fts_rank": 1.7,
                "document_name": "HO-3.pdf"
            },
            {
                "id": "chunk-b",
                "document_id": "doc-2",
                "content": "Exclusions",
                "bounding_box": {"x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0}
            }
        ]);

        let chunks = parse_chunk_rows(&rows, "doc-1").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_id, "17");
        assert_eq!(chunks[0].document_id, "doc-1");
        assert_eq!(chunks[0].fts_rank, Some(1.7));
        assert_eq!(chunks[1].document_id, "doc-2");
        assert_eq!(chunks[1].similarity, 0.0);
        assert_eq!(chunks[1].page_number, 1);
        assert!(chunks[1].bounding_box.is_some());
    }

    #[test]
    fn non_array_payload_is_rejected() {
        let result = parse_chunk_rows(&json!({"message": "function not found"}), "doc");
        assert!(matches!(result, Err(StoreError::BackendResponse { .. })));
    }

    #[test]
    fn message_rows_tolerate_null_sources() {
        let row: MessageRow = serde_json::from_value(json!({
            "id": "6f1c1d1e-2f4b-4a8e-9d59-3a6a6c0f4f11",
            "conversation_id": "conv-1",
            "role": "assistant",
            "content": "The deductible is $1,000 [Policy.pdf, Page 3].",
            "sources": null,
            "confidence": "high",
            "created_at": "2024-05-01T12:00:00Z"
        }))
        .unwrap();
        let message = row.into_message();
        assert!(message.sources.is_empty());
        assert_eq!(message.confidence, Some(ConfidenceLevel::High));
        assert_eq!(message.role, MessageRole::Assistant);
    }
}
