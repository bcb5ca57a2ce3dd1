use crate::confidence::ConfidenceLevel;
use crate::{Chunk, ConversationMessage, PromptMessage};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashMap;
use std::fmt::Write;

pub const NOT_FOUND_RESPONSE: &str = "I don't see that information in the uploaded documents.";
pub const NO_CONTEXT_NOTICE: &str =
    "No relevant sections were found in the uploaded documents for this question.";

const SYSTEM_PROMPT: &str = "You are an assistant for insurance agents answering questions about their uploaded policy documents and quotes.

Rules:
- Answer only from the DOCUMENT CONTEXT and EXTRACTED POLICY DATA sections. Do not rely on outside knowledge about coverage terms.
- Always cite the source of each fact with the document name and page, in the form [Document Name, Page N].
- When sections come from several documents, say which document each fact comes from and point out differences between them.
- If the context does not contain the answer, say plainly that you could not find it in the documents instead of guessing.
- Keep answers concise and use the exact figures (limits, deductibles, premiums) as written in the documents.";

/// A single field already extracted from a document, such as a limit or a deductible.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedField {
    pub name: String,
    pub value: String,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StructuredContext {
    pub title: String,
    pub fields: Vec<ExtractedField>,
}

impl StructuredContext {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder<'a> {
    structured: Option<&'a StructuredContext>,
    confidence: Option<ConfidenceLevel>,
}

impl<'a> PromptBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_structured_context(mut self, structured: Option<&'a StructuredContext>) -> Self {
        self.structured = structured;
        self
    }

    /// Adds a retrieval-quality note for `low` and `not_found` results.
    pub fn with_confidence(mut self, confidence: ConfidenceLevel) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn build(
        &self,
        user_message: &str,
        chunks: &[Chunk],
        history: &[ConversationMessage],
    ) -> Vec<PromptMessage> {
        let mut body = String::new();

        body.push_str("DOCUMENT CONTEXT:\n");
        body.push_str(&format_chunk_context(chunks));
        body.push_str("\n\n");

        if let Some(structured) = self.structured.filter(|context| !context.is_empty()) {
            body.push_str(&format_structured_context(structured));
            body.push_str("\n\n");
        }

        if let Some(note) = self.confidence.and_then(confidence_note) {
            let _ = write!(body, "RETRIEVAL NOTE:\n{note}\n\n");
        }

        if let Some(history) = format_history(history) {
            body.push_str(&history);
            body.push_str("\n\n");
        }

        let _ = write!(body, "USER QUESTION:\n{}", user_message.trim());

        vec![PromptMessage::system(SYSTEM_PROMPT), PromptMessage::user(body)]
    }
}

pub fn build_prompt(
    user_message: &str,
    chunks: &[Chunk],
    history: &[ConversationMessage],
    structured: Option<&StructuredContext>,
) -> Vec<PromptMessage> {
    PromptBuilder::new()
        .with_structured_context(structured)
        .build(user_message, chunks, history)
}

fn format_chunk_lines(chunk: &Chunk) -> String {
    chunk
        .content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| format!("[Page {}] {line}", chunk.page_number))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chunks grouped by document in order of first appearance. Every line carries its page.
pub fn format_chunk_context(chunks: &[Chunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_NOTICE.to_string();
    }

    let mut order: Vec<(&str, Vec<&Chunk>)> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for chunk in chunks {
        let position = *positions
            .entry(chunk.document_id.as_str())
            .or_insert_with(|| {
                order.push((chunk.display_name(), Vec::new()));
                order.len() - 1
            });
        order[position].1.push(chunk);
    }

    order
        .into_iter()
        .map(|(name, group)| {
            let sections = group
                .into_iter()
                .map(format_chunk_lines)
                .collect::<Vec<_>>()
                .join("\n\n");
            format!("--- {name} ---\n{sections}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn format_history(history: &[ConversationMessage]) -> Option<String> {
    if history.is_empty() {
        return None;
    }

    let mut rendered = String::from("CONVERSATION HISTORY:");
    for message in history {
        let _ = write!(rendered, "\n{}: {}", message.role.as_str(), message.content.trim());
    }
    Some(rendered)
}

fn format_structured_context(structured: &StructuredContext) -> String {
    let mut rendered = if structured.title.trim().is_empty() {
        String::from("EXTRACTED POLICY DATA:")
    } else {
        format!("EXTRACTED POLICY DATA ({}):", structured.title.trim())
    };
    for field in &structured.fields {
        let _ = write!(rendered, "\n- {}: {}", field.name, field.value);
        if let Some(page) = field.page_number {
            let _ = write!(rendered, " (Page {page})");
        }
    }
    rendered
}

fn confidence_note(confidence: ConfidenceLevel) -> Option<&'static str> {
    match confidence {
        ConfidenceLevel::High | ConfidenceLevel::Medium => None,
        ConfidenceLevel::Low => Some(
            "The retrieved sections are only loosely related to the question. If they do not answer it, say so.",
        ),
        ConfidenceLevel::NotFound => Some(
            "No relevant sections were retrieved. Tell the user the documents do not appear to contain this information.",
        ),
    }
}

/// Overwrites the last user turn with an instruction to reply with [`NOT_FOUND_RESPONSE`].
pub fn apply_not_found_fallback(messages: &mut [PromptMessage]) {
    if let Some(last_user) = messages
        .iter_mut()
        .rev()
        .find(|message| message.role == crate::MessageRole::User)
    {
        last_user.content = format!(
            "Respond with exactly the following sentence and nothing else: \"{NOT_FOUND_RESPONSE}\""
        );
    }
}
