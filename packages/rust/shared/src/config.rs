//! Application configuration for channel-digest.
//!
//! User config lives at `~/.channel-digest/channel-digest.toml`.
//! CLI flags and environment variables override config file values,
//! which override defaults. Secrets are never stored in the file; the file
//! only names the environment variables that hold them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DigestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "channel-digest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".channel-digest";

/// Default checkpoint file name inside the config directory.
const CHECKPOINT_FILE_NAME: &str = "last_processed.txt";

// ---------------------------------------------------------------------------
// Config structs (matching channel-digest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Slack message source.
    #[serde(default)]
    pub slack: SlackConfig,

    /// Notion document store.
    #[serde(default)]
    pub notion: NotionConfig,

    /// Chat-completion merge service.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Checkpoint persistence.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// `[slack]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Name of the env var holding the bot token.
    #[serde(default = "default_slack_token_env")]
    pub token_env: String,

    /// Channel to digest.
    #[serde(default)]
    pub channel_id: String,

    /// Slack Web API base URL.
    #[serde(default = "default_slack_base_url")]
    pub base_url: String,

    /// Messages requested per history page.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Upper bound on history pages fetched in one run.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Per-request timeout.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token_env: default_slack_token_env(),
            channel_id: String::new(),
            base_url: default_slack_base_url(),
            page_limit: default_page_limit(),
            max_pages: default_max_pages(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_slack_token_env() -> String {
    "SLACK_API_TOKEN".into()
}
fn default_slack_base_url() -> String {
    "https://slack.com/api".into()
}
fn default_page_limit() -> u32 {
    200
}
fn default_max_pages() -> u32 {
    20
}
fn default_http_timeout() -> u64 {
    30
}

/// `[notion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    /// Name of the env var holding the integration token.
    #[serde(default = "default_notion_token_env")]
    pub token_env: String,

    /// Page holding the topics summary.
    #[serde(default)]
    pub topics_page_id: String,

    /// Page holding the changelog.
    #[serde(default)]
    pub changelog_page_id: String,

    /// Notion API base URL.
    #[serde(default = "default_notion_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            token_env: default_notion_token_env(),
            topics_page_id: String::new(),
            changelog_page_id: String::new(),
            base_url: default_notion_base_url(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_notion_token_env() -> String {
    "NOTION_API_KEY".into()
}
fn default_notion_base_url() -> String {
    "https://api.notion.com/v1".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used for the merge step.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature; provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Completion token cap; provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-request timeout. Merges of long documents are slow.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            model: default_model(),
            temperature: None,
            max_tokens: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4".into()
}
fn default_llm_timeout() -> u64 {
    120
}

/// `[checkpoint]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoint file path; empty means `~/.channel-digest/last_processed.txt`.
    #[serde(default)]
    pub path: String,
}

// ---------------------------------------------------------------------------
// Runtime config (resolved from file + env + CLI flags)
// ---------------------------------------------------------------------------

/// A secret value whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Values supplied on the command line or via the CLI's env-backed flags.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub channel_id: Option<String>,
    pub topics_page_id: Option<String>,
    pub changelog_page_id: Option<String>,
    pub checkpoint_path: Option<PathBuf>,
}

/// Resolved Slack settings.
#[derive(Debug, Clone)]
pub struct SlackSettings {
    pub token: Secret,
    pub channel_id: String,
    pub base_url: Url,
    pub page_limit: u32,
    pub max_pages: u32,
    pub timeout: Duration,
}

/// Resolved Notion settings.
#[derive(Debug, Clone)]
pub struct NotionSettings {
    pub token: Secret,
    pub topics_page_id: String,
    pub changelog_page_id: String,
    pub base_url: Url,
    pub timeout: Duration,
}

/// Resolved chat-completion settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: Secret,
    pub base_url: Url,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

/// Fully resolved configuration for one digest process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub slack: SlackSettings,
    pub notion: NotionSettings,
    pub llm: LlmSettings,
    pub checkpoint_path: PathBuf,
}

impl RuntimeConfig {
    /// Resolve against the process environment.
    pub fn resolve(config: &AppConfig, overrides: &Overrides) -> Result<Self> {
        Self::resolve_with(config, overrides, |name| std::env::var(name).ok())
    }

    /// Resolve using `lookup` to read environment variables.
    ///
    /// Every missing or invalid item is reported in a single config error.
    pub fn resolve_with(
        config: &AppConfig,
        overrides: &Overrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut problems: Vec<String> = Vec::new();

        let mut secret = |var: &str| match lookup(var) {
            Some(v) if !v.trim().is_empty() => Some(Secret::new(v.trim())),
            _ => {
                problems.push(format!("environment variable {var} is not set"));
                None
            }
        };
        let slack_token = secret(&config.slack.token_env);
        let notion_token = secret(&config.notion.token_env);
        let llm_key = secret(&config.llm.api_key_env);

        let channel_id = pick(overrides.channel_id.as_deref(), &config.slack.channel_id);
        let topics_page_id = pick(
            overrides.topics_page_id.as_deref(),
            &config.notion.topics_page_id,
        );
        let changelog_page_id = pick(
            overrides.changelog_page_id.as_deref(),
            &config.notion.changelog_page_id,
        );

        for (value, what) in [
            (&channel_id, "Slack channel id (--channel / SLACK_CHANNEL_ID)"),
            (&topics_page_id, "topics page id (--topics-page / NOTION_TOPICS_PAGE_ID)"),
            (
                &changelog_page_id,
                "changelog page id (--changelog-page / NOTION_CHANGELOG_PAGE_ID)",
            ),
        ] {
            if value.is_empty() {
                problems.push(format!("missing {what}"));
            }
        }

        let mut url = |raw: &str, section: &str| match Url::parse(raw) {
            Ok(u) => Some(u),
            Err(e) => {
                problems.push(format!("[{section}] base_url '{raw}' is invalid: {e}"));
                None
            }
        };
        let slack_url = url(&config.slack.base_url, "slack");
        let notion_url = url(&config.notion.base_url, "notion");
        let llm_url = url(&config.llm.base_url, "llm");

        let checkpoint_path = match resolve_checkpoint_path(config, overrides) {
            Ok(p) => Some(p),
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        };

        match (
            slack_token,
            notion_token,
            llm_key,
            slack_url,
            notion_url,
            llm_url,
            checkpoint_path,
        ) {
            (
                Some(slack_token),
                Some(notion_token),
                Some(llm_key),
                Some(slack_url),
                Some(notion_url),
                Some(llm_url),
                Some(checkpoint_path),
            ) if problems.is_empty() => Ok(Self {
                slack: SlackSettings {
                    token: slack_token,
                    channel_id,
                    base_url: slack_url,
                    page_limit: config.slack.page_limit.max(1),
                    max_pages: config.slack.max_pages.max(1),
                    timeout: Duration::from_secs(config.slack.timeout_secs),
                },
                notion: NotionSettings {
                    token: notion_token,
                    topics_page_id,
                    changelog_page_id,
                    base_url: notion_url,
                    timeout: Duration::from_secs(config.notion.timeout_secs),
                },
                llm: LlmSettings {
                    api_key: llm_key,
                    base_url: llm_url,
                    model: config.llm.model.clone(),
                    temperature: config.llm.temperature,
                    max_tokens: config.llm.max_tokens,
                    timeout: Duration::from_secs(config.llm.timeout_secs),
                },
                checkpoint_path,
            }),
            _ => Err(DigestError::config(format!(
                "invalid configuration:\n  - {}",
                problems.join("\n  - ")
            ))),
        }
    }
}

/// Checkpoint file: `--checkpoint` flag, then `[checkpoint] path`, then the default location.
pub fn resolve_checkpoint_path(config: &AppConfig, overrides: &Overrides) -> Result<PathBuf> {
    match &overrides.checkpoint_path {
        Some(p) => Ok(p.clone()),
        None if !config.checkpoint.path.trim().is_empty() => {
            Ok(PathBuf::from(config.checkpoint.path.trim()))
        }
        None => default_checkpoint_path(),
    }
}

/// Prefer a non-empty override, else the trimmed file value.
fn pick(override_value: Option<&str>, file_value: &str) -> String {
    override_value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| file_value.trim())
        .to_string()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.channel-digest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DigestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.channel-digest/channel-digest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Default checkpoint location (`~/.channel-digest/last_processed.txt`).
pub fn default_checkpoint_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CHECKPOINT_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DigestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DigestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| DigestError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| DigestError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| DigestError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}
