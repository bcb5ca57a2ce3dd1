use crate::embeddings::EmbeddingClient;
use crate::stores::{InMemoryChunkStore, StoredChunk};
use crate::traits::EmbeddingProvider;
use crate::{BoundingBox, Chunk, RagError, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// One chunk as exported from the document pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    #[serde(default)]
    pub chunk_id: Option<String>,
    pub document_id: String,
    #[serde(default)]
    pub document_name: Option<String>,
    pub page_number: u32,
    pub content: String,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExportFile {
    Records(Vec<ChunkRecord>),
    Wrapped { chunks: Vec<ChunkRecord> },
}

pub fn discover_export_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_json = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Reads a chunk export file, or every `*.json` export below a directory.
pub fn load_chunk_exports(path: &Path) -> Result<Vec<ChunkRecord>, StoreError> {
    let files = if path.is_dir() {
        discover_export_files(path)
    } else {
        vec![path.to_path_buf()]
    };

    if files.is_empty() {
        return Err(StoreError::Request(format!(
            "no chunk exports found in {}",
            path.display()
        )));
    }

    let mut records = Vec::new();
    for file in files {
        let raw = fs::read_to_string(&file)?;
        let parsed: ExportFile = serde_json::from_str(&raw)?;
        let mut batch = match parsed {
            ExportFile::Records(records) => records,
            ExportFile::Wrapped { chunks } => chunks,
        };
        for record in &mut batch {
            if record.chunk_id.as_deref().map_or(true, str::is_empty) {
                record.chunk_id = Some(make_chunk_id(
                    &record.document_id,
                    record.page_number,
                    &record.content,
                ));
            }
        }
        records.extend(batch);
    }

    Ok(records)
}

/// Embeds records that carry no vector and loads everything into an in-memory store.
pub async fn build_memory_store<P>(
    records: Vec<ChunkRecord>,
    embeddings: &EmbeddingClient<P>,
) -> Result<InMemoryChunkStore, RagError>
where
    P: EmbeddingProvider,
{
    let missing: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.embedding.is_none())
        .map(|(index, _)| index)
        .collect();
    let texts: Vec<String> = missing
        .iter()
        .map(|index| records[*index].content.clone())
        .collect();
    let mut computed = embeddings.embed(&texts).await?.into_iter();

    info!(
        chunks = records.len(),
        embedded = missing.len(),
        "building in-memory chunk store"
    );

    let mut stored = Vec::with_capacity(records.len());
    for record in records {
        let embedding = match record.embedding {
            Some(embedding) => embedding,
            None => computed.next().ok_or_else(|| {
                RagError::InvalidRequest("embedding count does not match chunk count".to_string())
            })?,
        };
        let chunk_id = record.chunk_id.unwrap_or_else(|| {
            make_chunk_id(&record.document_id, record.page_number, &record.content)
        });
        stored.push(StoredChunk {
            chunk: Chunk {
                chunk_id,
                document_id: record.document_id,
                document_name: record.document_name,
                page_number: record.page_number,
                content: record.content,
                bounding_box: record.bounding_box,
                similarity: 0.0,
                fts_rank: None,
                score: 0.0,
                rerank_score: None,
            },
            embedding,
        });
    }

    Ok(InMemoryChunkStore::new(stored))
}

fn make_chunk_id(document_id: &str, page: u32, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
