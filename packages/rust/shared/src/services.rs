//! Collaborator traits the digest orchestrator is written against.
//!
//! Concrete implementations live in their own crates (Slack, Notion, the LLM
//! client, the file checkpoint store); the CLI constructs them and injects
//! them into the orchestrator.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Block, Message, Timestamp};

/// Yields chat messages newer than a checkpoint.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch every message in `channel` strictly newer than `since`.
    ///
    /// Implementations return the batch newest-first. An empty batch is a
    /// normal result, not an error.
    async fn fetch(&self, channel: &str, since: Timestamp) -> Result<Vec<Message>>;
}

/// Low-level block operations of the document store.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// List the child blocks of `container_id`, in store order.
    async fn list_children(&self, container_id: &str) -> Result<Vec<Block>>;

    /// Delete a single block.
    async fn delete_block(&self, block_id: &str) -> Result<()>;

    /// Append one paragraph block holding `text` under `container_id`.
    async fn append_paragraph(&self, container_id: &str, text: &str) -> Result<()>;

    /// Longest text, in chars, one [`append_paragraph`](Self::append_paragraph)
    /// accepts. `None` means unbounded.
    fn max_paragraph_chars(&self) -> Option<usize> {
        None
    }
}

/// A single-shot chat completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send a system + user prompt pair and return the assistant's text.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Persists the "last processed" timestamp across runs.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint, creating and persisting a default when absent or corrupt.
    async fn load(&self) -> Result<Timestamp>;

    /// Overwrite the persisted checkpoint.
    async fn save(&self, timestamp: Timestamp) -> Result<()>;
}
