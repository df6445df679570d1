//! File-backed checkpoint store.
//!
//! The checkpoint is a single decimal timestamp (`"1700000000.123456"`) in a
//! plain text file. A missing or unparsable file is a normal first-run
//! condition: the store falls back to *now − 14 days*, persists that value,
//! and returns it.
//!
//! There is no locking. One process reads the file once and writes it once
//! per run; overlapping runs must be prevented by whoever schedules them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use channel_digest_shared::{CheckpointStore, DigestError, Result, Timestamp};

/// How far back the first run looks when no checkpoint exists.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 14;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Checkpoint persisted as decimal text in a single file.
pub struct FileCheckpointStore {
    path: PathBuf,
    clock: Clock,
}

impl FileCheckpointStore {
    /// Store backed by `path`, using the system clock for defaults.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Utc::now)
    }

    /// Store backed by `path` with an injected clock.
    pub fn with_clock(
        path: impl Into<PathBuf>,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            clock: Box::new(clock),
        }
    }

    /// Location of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn default_checkpoint(&self) -> Timestamp {
        default_checkpoint_at((self.clock)())
    }

    /// Sibling file used for write-then-rename.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// The first-run checkpoint for a given "now".
pub fn default_checkpoint_at(now: DateTime<Utc>) -> Timestamp {
    Timestamp::from_datetime(now - chrono::Duration::days(DEFAULT_LOOKBACK_DAYS))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Timestamp> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match parse_checkpoint(&bytes) {
                Some(ts) => {
                    debug!(path = ?self.path, checkpoint = %ts, "checkpoint loaded");
                    return Ok(ts);
                }
                None => {
                    warn!(
                        path = ?self.path,
                        bytes = bytes.len(),
                        "checkpoint unparsable, resetting to default"
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    path = ?self.path,
                    lookback_days = DEFAULT_LOOKBACK_DAYS,
                    "no checkpoint found, starting from default"
                );
            }
            Err(e) => return Err(DigestError::io(&self.path, e)),
        }

        let ts = self.default_checkpoint();
        self.save(ts).await?;
        Ok(ts)
    }

    async fn save(&self, timestamp: Timestamp) -> Result<()> {
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DigestError::io(parent, e))?;
        }

        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| DigestError::io(&tmp, e))?;
        file.write_all(timestamp.to_string().as_bytes())
            .await
            .map_err(|e| DigestError::io(&tmp, e))?;
        // Data must be on disk before the rename makes it visible.
        file.sync_all().await.map_err(|e| DigestError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DigestError::io(&self.path, e))?;

        // Persist the rename itself. Directories cannot be opened on every
        // platform, so this step is best effort.
        if let Ok(dir) = tokio::fs::File::open(parent.unwrap_or(Path::new("."))).await {
            let _ = dir.sync_all().await;
        }

        debug!(path = ?self.path, checkpoint = %timestamp, "checkpoint saved");
        Ok(())
    }
}

/// Decode checkpoint file contents; `None` for non-UTF-8 or non-decimal data.
fn parse_checkpoint(bytes: &[u8]) -> Option<Timestamp> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
