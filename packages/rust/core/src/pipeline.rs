//! One digest pass: checkpoint → fetch → read → merge → replace → checkpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use channel_digest_shared::{
    BlockStore, CheckpointStore, CompletionClient, DigestError, DocumentKind, Message,
    MessageSource, Result, Timestamp,
};

use crate::document::DocumentStore;
use crate::merge::{MergeEngine, MergeStatus};

/// Ids the digest reads from and writes to.
#[derive(Debug, Clone)]
pub struct DigestConfig {
    /// Channel whose history is digested.
    pub channel_id: String,
    /// Page holding the topics summary.
    pub topics_page_id: String,
    /// Page holding the changelog.
    pub changelog_page_id: String,
}

impl DigestConfig {
    /// Reject configurations where one replace would clobber the other document.
    pub fn validate(&self) -> Result<()> {
        for (value, what) in [
            (&self.channel_id, "channel id"),
            (&self.topics_page_id, "topics page id"),
            (&self.changelog_page_id, "changelog page id"),
        ] {
            if value.trim().is_empty() {
                return Err(DigestError::validation(format!("{what} is empty")));
            }
        }
        if self.topics_page_id == self.changelog_page_id {
            return Err(DigestError::validation(
                "topics and changelog must be different pages",
            ));
        }
        Ok(())
    }
}

/// Outcome of a single [`Digest::run`].
#[derive(Debug)]
pub struct DigestRunResult {
    /// Messages fetched and merged; zero for a no-op run.
    pub messages_processed: usize,
    /// Checkpoint loaded at the start of the run.
    pub checkpoint_before: Timestamp,
    /// Checkpoint saved at the end, `None` when nothing was processed.
    pub checkpoint_after: Option<Timestamp>,
    /// Whether the model output was used. `None` for a no-op run.
    pub merge_status: Option<MergeStatus>,
    /// Documents whose replace failed.
    pub write_failures: Vec<DocumentKind>,
    /// Documents left untouched because they could not be read and the merge
    /// fell back, so there was no content to write.
    pub skipped_writes: Vec<DocumentKind>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

impl DigestRunResult {
    pub fn is_noop(&self) -> bool {
        self.messages_processed == 0
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the run completes.
    fn done(&self, result: &DigestRunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _result: &DigestRunResult) {}
}

/// Incremental channel digest over injected collaborators.
pub struct Digest {
    config: DigestConfig,
    source: Arc<dyn MessageSource>,
    documents: DocumentStore,
    merger: MergeEngine,
    checkpoint: Arc<dyn CheckpointStore>,
}

impl Digest {
    pub fn new(
        config: DigestConfig,
        source: Arc<dyn MessageSource>,
        blocks: Arc<dyn BlockStore>,
        completion: Arc<dyn CompletionClient>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            source,
            documents: DocumentStore::new(blocks),
            merger: MergeEngine::new(completion),
            checkpoint,
        }
    }

    /// Run one pass.
    ///
    /// Only checkpoint load/save failures are returned as errors. Source,
    /// read, merge and write failures are logged and absorbed:
    /// 1. Load the checkpoint
    /// 2. Fetch messages newer than it (stop here if there are none)
    /// 3. Read both documents
    /// 4. Merge
    /// 5. Replace both documents, except one that could not be read when the
    ///    merge fell back
    /// 6. Save the advanced checkpoint
    #[instrument(skip_all, fields(channel = %self.config.channel_id))]
    pub async fn run(&self, progress: &dyn ProgressReporter) -> Result<DigestRunResult> {
        let start = Instant::now();

        progress.phase("Loading checkpoint");
        let before = self
            .checkpoint
            .load()
            .await
            .map_err(|e| DigestError::Checkpoint(format!("load failed: {e}")))?;
        info!(checkpoint = %before, "starting digest run");

        progress.phase("Fetching messages");
        let mut messages = match self.source.fetch(&self.config.channel_id, before).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "message source unavailable, treating as no new messages");
                Vec::new()
            }
        };

        if messages.is_empty() {
            info!("no new messages, nothing to do");
            let result = DigestRunResult {
                messages_processed: 0,
                checkpoint_before: before,
                checkpoint_after: None,
                merge_status: None,
                write_failures: Vec::new(),
                skipped_writes: Vec::new(),
                elapsed: start.elapsed(),
            };
            progress.done(&result);
            return Ok(result);
        }

        if !is_newest_first(&messages) {
            warn!(count = messages.len(), "source batch not newest-first, reordering");
            messages.sort_by(|a, b| b.ts.cmp(&a.ts));
        }

        progress.phase("Reading documents");
        let (topics, topics_read) = self.read_document(&self.config.topics_page_id).await;
        let (changelog, changelog_read) =
            self.read_document(&self.config.changelog_page_id).await;

        progress.phase("Merging");
        let merged = self.merger.merge(&messages, &topics, &changelog).await;

        progress.phase("Writing documents");
        let mut write_failures = Vec::new();
        let mut skipped_writes = Vec::new();
        for (kind, id, text, was_read) in [
            (
                DocumentKind::Topics,
                &self.config.topics_page_id,
                &merged.topics,
                topics_read,
            ),
            (
                DocumentKind::Changelog,
                &self.config.changelog_page_id,
                &merged.changelog,
                changelog_read,
            ),
        ] {
            // A fallback hands back what was read; for an unreadable page that
            // is an empty stand-in, and writing it would wipe the real page.
            if !was_read && !merged.status.is_merged() {
                warn!(document = %kind, "document unread and merge fell back, leaving it untouched");
                skipped_writes.push(kind);
                continue;
            }
            if let Err(e) = self.documents.replace(id, text).await {
                error!(document = %kind, error = %e, "document write failed");
                write_failures.push(kind);
            }
        }

        progress.phase("Saving checkpoint");
        let after = next_checkpoint(before, &messages);
        self.checkpoint
            .save(after)
            .await
            .map_err(|e| DigestError::Checkpoint(format!("save failed: {e}")))?;

        let result = DigestRunResult {
            messages_processed: messages.len(),
            checkpoint_before: before,
            checkpoint_after: Some(after),
            merge_status: Some(merged.status),
            write_failures,
            skipped_writes,
            elapsed: start.elapsed(),
        };

        info!(
            messages = result.messages_processed,
            checkpoint = %after,
            merged = result.merge_status.as_ref().is_some_and(MergeStatus::is_merged),
            write_failures = result.write_failures.len(),
            skipped_writes = result.skipped_writes.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "digest run complete"
        );

        progress.done(&result);
        Ok(result)
    }

    /// Body of page `id` and whether it was actually read.
    async fn read_document(&self, id: &str) -> (String, bool) {
        match self.documents.try_read(id).await {
            Ok(text) => (text, true),
            Err(e) => {
                warn!(page = id, error = %e, "document unreadable, merging from empty");
                (String::new(), false)
            }
        }
    }
}

/// The checkpoint after processing `messages`: never behind `current`.
pub fn next_checkpoint(current: Timestamp, messages: &[Message]) -> Timestamp {
    messages
        .iter()
        .map(|m| m.ts)
        .max()
        .map_or(current, |newest| newest.max(current))
}

fn is_newest_first(messages: &[Message]) -> bool {
    messages.windows(2).all(|w| w[0].ts >= w[1].ts)
}
