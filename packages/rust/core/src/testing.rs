//! In-memory collaborators for exercising the orchestrator without network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use channel_digest_shared::{
    Block, BlockStore, CheckpointStore, CompletionClient, DigestError, Message, MessageSource,
    Result, Timestamp,
};

/// Returns its scripted messages that are newer than `since`, in script order.
pub struct ScriptedSource {
    messages: Vec<Message>,
    fail: bool,
    pub calls: Mutex<Vec<Timestamp>>,
}

impl ScriptedSource {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn fetch(&self, _channel: &str, since: Timestamp) -> Result<Vec<Message>> {
        self.calls.lock().unwrap().push(since);
        if self.fail {
            return Err(DigestError::api("slack", "ratelimited"));
        }
        Ok(self
            .messages
            .iter()
            .filter(|m| m.ts > since)
            .cloned()
            .collect())
    }
}

/// Block store holding pages in memory.
#[derive(Default)]
pub struct MemoryBlocks {
    pub pages: Mutex<HashMap<String, Vec<Block>>>,
    pub next_id: AtomicUsize,
    pub fail_list: bool,
    /// Fail this many `list_children` calls, then recover.
    pub fail_list_calls: AtomicUsize,
    pub fail_append: bool,
    pub fail_delete: bool,
    pub max_chars: Option<usize>,
}

impl MemoryBlocks {
    /// Put one paragraph per entry of `texts` under `page`.
    pub fn seed(&self, page: &str, texts: &[&str]) {
        let blocks = texts.iter().map(|t| self.block(Some(*t))).collect();
        self.pages.lock().unwrap().insert(page.to_string(), blocks);
    }

    /// Add a text-less block (divider, image, ...) to `page`.
    pub fn push_empty(&self, page: &str) {
        let block = self.block(None);
        self.pages
            .lock()
            .unwrap()
            .entry(page.to_string())
            .or_default()
            .push(block);
    }

    pub fn blocks(&self, page: &str) -> Vec<Block> {
        self.pages
            .lock()
            .unwrap()
            .get(page)
            .cloned()
            .unwrap_or_default()
    }

    /// Plain texts of `page`, in order.
    pub fn texts(&self, page: &str) -> Vec<String> {
        self.blocks(page).into_iter().filter_map(|b| b.text).collect()
    }

    fn block(&self, text: Option<&str>) -> Block {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Block {
            id: format!("block-{n}"),
            text: text.map(str::to_string),
        }
    }
}

#[async_trait]
impl BlockStore for MemoryBlocks {
    async fn list_children(&self, container_id: &str) -> Result<Vec<Block>> {
        let transient = self
            .fail_list_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if self.fail_list || transient {
            return Err(DigestError::Network("connection reset".into()));
        }
        Ok(self.blocks(container_id))
    }

    async fn delete_block(&self, block_id: &str) -> Result<()> {
        if self.fail_delete {
            return Err(DigestError::api("notion", "conflict_error"));
        }
        for blocks in self.pages.lock().unwrap().values_mut() {
            blocks.retain(|b| b.id != block_id);
        }
        Ok(())
    }

    fn max_paragraph_chars(&self) -> Option<usize> {
        self.max_chars
    }

    async fn append_paragraph(&self, container_id: &str, text: &str) -> Result<()> {
        if self.fail_append {
            return Err(DigestError::api("notion", "validation_error"));
        }
        let block = self.block(Some(text));
        self.pages
            .lock()
            .unwrap()
            .entry(container_id.to_string())
            .or_default()
            .push(block);
        Ok(())
    }
}

/// Completion client answering every prompt with the same canned outcome.
pub struct CannedCompletion {
    response: std::result::Result<String, String>,
    pub prompts: Mutex<Vec<String>>,
}

impl CannedCompletion {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            response: Ok(text.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            response: Err(reason.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for CannedCompletion {
    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(user_prompt.to_string());
        self.response
            .clone()
            .map_err(|reason| DigestError::api("llm", reason))
    }
}

/// Checkpoint kept in memory.
pub struct MemoryCheckpoint {
    pub value: Mutex<Timestamp>,
    pub fail_save: bool,
    pub saves: AtomicUsize,
}

impl MemoryCheckpoint {
    pub fn at(ts: Timestamp) -> Self {
        Self {
            value: Mutex::new(ts),
            fail_save: false,
            saves: AtomicUsize::new(0),
        }
    }

    pub fn get(&self) -> Timestamp {
        *self.value.lock().unwrap()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn load(&self) -> Result<Timestamp> {
        Ok(self.get())
    }

    async fn save(&self, timestamp: Timestamp) -> Result<()> {
        if self.fail_save {
            return Err(DigestError::Checkpoint("disk full".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.value.lock().unwrap() = timestamp;
        Ok(())
    }
}
