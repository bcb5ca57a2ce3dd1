pub mod memory;
pub mod postgrest;

pub use memory::{InMemoryChunkStore, InMemoryConversationStore, StoredChunk};
pub use postgrest::PostgrestStore;
