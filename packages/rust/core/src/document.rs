//! Whole-document view over a block store.
//!
//! A document is the ordered list of child blocks under one container id.
//! Reading flattens them to plain text; replacing deletes every child and
//! appends a single paragraph.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use channel_digest_shared::{Block, BlockStore, DigestError, Result};

/// Separator placed between block texts when a document is read.
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// Reads and overwrites documents held in a [`BlockStore`].
#[derive(Clone)]
pub struct DocumentStore {
    blocks: Arc<dyn BlockStore>,
}

impl DocumentStore {
    pub fn new(blocks: Arc<dyn BlockStore>) -> Self {
        Self { blocks }
    }

    /// Plain-text body of the document under `id`.
    ///
    /// Never fails: a listing error is logged and read as an empty document.
    /// Use [`try_read`](Self::try_read) to tell an unreadable page from an
    /// empty one.
    pub async fn read(&self, id: &str) -> String {
        match self.try_read(id).await {
            Ok(text) => text,
            Err(e) => {
                warn!(page = id, error = %e, "document unreadable, treating as empty");
                String::new()
            }
        }
    }

    /// Plain-text body of the document under `id`, or the listing error.
    #[instrument(skip(self))]
    pub async fn try_read(&self, id: &str) -> Result<String> {
        let blocks = self.blocks.list_children(id).await?;
        let text = join_blocks(&blocks);
        debug!(blocks = blocks.len(), chars = text.len(), "document read");
        Ok(text)
    }

    /// Replace the whole document under `id` with `text`.
    ///
    /// Text longer than the store accepts in one paragraph is rejected before
    /// anything is deleted. Otherwise not atomic: if a delete or the append
    /// fails, the document is left with whatever remained at that point and
    /// the error is returned.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn replace(&self, id: &str, text: &str) -> Result<()> {
        if let Some(limit) = self.blocks.max_paragraph_chars() {
            let chars = text.chars().count();
            if chars > limit {
                return Err(DigestError::validation(format!(
                    "document is {chars} chars, the store takes at most {limit}"
                )));
            }
        }

        let existing = self.blocks.list_children(id).await?;
        for block in &existing {
            self.blocks.delete_block(&block.id).await?;
        }
        debug!(deleted = existing.len(), "document cleared");

        if !text.is_empty() {
            self.blocks.append_paragraph(id, text).await?;
        }
        Ok(())
    }
}

fn join_blocks(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter_map(|b| b.text.as_deref())
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBlocks;

    fn store(blocks: &Arc<MemoryBlocks>) -> DocumentStore {
        DocumentStore::new(blocks.clone())
    }

    #[tokio::test]
    async fn read_joins_blocks_with_blank_lines() {
        let blocks = Arc::new(MemoryBlocks::default());
        blocks.seed("page", &["  # Topics", "- alpha", "- beta\n"]);
        blocks.push_empty("page");

        let text = store(&blocks).read("page").await;
        assert_eq!(text, "# Topics\n\n- alpha\n\n- beta");
    }

    #[tokio::test]
    async fn read_of_unknown_page_is_empty() {
        let blocks = Arc::new(MemoryBlocks::default());
        assert_eq!(store(&blocks).read("nothing-here").await, "");
    }

    #[tokio::test]
    async fn read_failure_is_absorbed() {
        let blocks = Arc::new(MemoryBlocks {
            fail_list: true,
            ..Default::default()
        });
        assert_eq!(store(&blocks).read("page").await, "");
    }

    #[tokio::test]
    async fn try_read_reports_listing_errors() {
        let blocks = Arc::new(MemoryBlocks {
            fail_list: true,
            ..Default::default()
        });
        assert!(store(&blocks).try_read("page").await.is_err());

        let blocks = Arc::new(MemoryBlocks::default());
        assert_eq!(store(&blocks).try_read("empty").await.unwrap(), "");
    }

    #[tokio::test]
    async fn oversize_replace_keeps_the_page() {
        let blocks = Arc::new(MemoryBlocks {
            max_chars: Some(5),
            ..Default::default()
        });
        blocks.seed("page", &["old"]);
        let docs = store(&blocks);

        let err = docs.replace("page", "123456").await.unwrap_err();
        assert!(matches!(err, DigestError::Validation { .. }));
        assert_eq!(blocks.texts("page"), vec!["old"]);

        docs.replace("page", "12345").await.unwrap();
        assert_eq!(blocks.texts("page"), vec!["12345"]);
    }

    #[tokio::test]
    async fn replace_overwrites_every_block() {
        let blocks = Arc::new(MemoryBlocks::default());
        blocks.seed("page", &["one", "two", "three", "four"]);
        blocks.push_empty("page");
        let docs = store(&blocks);

        docs.replace("page", "X").await.unwrap();

        assert_eq!(blocks.blocks("page").len(), 1);
        assert_eq!(docs.read("page").await, "X");
    }

    #[tokio::test]
    async fn replace_leaves_other_pages_alone() {
        let blocks = Arc::new(MemoryBlocks::default());
        blocks.seed("a", &["keep me"]);
        blocks.seed("b", &["old"]);

        store(&blocks).replace("b", "new").await.unwrap();
        assert_eq!(blocks.texts("a"), vec!["keep me"]);
        assert_eq!(blocks.texts("b"), vec!["new"]);
    }

    #[tokio::test]
    async fn replace_with_empty_text_clears_the_page() {
        let blocks = Arc::new(MemoryBlocks::default());
        blocks.seed("page", &["old"]);
        let docs = store(&blocks);

        docs.replace("page", "").await.unwrap();
        assert!(blocks.blocks("page").is_empty());
        assert_eq!(docs.read("page").await, "");
    }

    #[tokio::test]
    async fn failed_append_leaves_page_empty() {
        let blocks = Arc::new(MemoryBlocks {
            fail_append: true,
            ..Default::default()
        });
        blocks.seed("page", &["old"]);

        let result = store(&blocks).replace("page", "new").await;
        assert!(result.is_err());
        assert!(blocks.blocks("page").is_empty());
    }

    #[tokio::test]
    async fn failed_delete_stops_before_append() {
        let blocks = Arc::new(MemoryBlocks {
            fail_delete: true,
            ..Default::default()
        });
        blocks.seed("page", &["old"]);

        assert!(store(&blocks).replace("page", "new").await.is_err());
        assert_eq!(blocks.texts("page"), vec!["old"]);
    }
}
