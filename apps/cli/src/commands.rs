//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use channel_digest_checkpoint::FileCheckpointStore;
use channel_digest_core::{
    Digest, DigestConfig, DigestRunResult, MergeStatus, ProgressReporter, SilentProgress,
};
use channel_digest_llm::ChatClient;
use channel_digest_notion::NotionClient;
use channel_digest_shared::{
    AppConfig, CheckpointStore, Overrides, RuntimeConfig, config_file_path, init_config_at,
    load_config, load_config_from, resolve_checkpoint_path,
};
use channel_digest_slack::SlackClient;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// channel-digest: fold new channel messages into a topics summary and a changelog.
#[derive(Parser)]
#[command(
    name = "channel-digest",
    version,
    about = "Incrementally digest a Slack channel into Notion topics and changelog pages.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.channel-digest/channel-digest.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Slack channel to digest.
    #[arg(long, env = "SLACK_CHANNEL_ID", global = true)]
    pub channel: Option<String>,

    /// Notion page holding the topics summary.
    #[arg(long, env = "NOTION_TOPICS_PAGE_ID", global = true)]
    pub topics_page: Option<String>,

    /// Notion page holding the changelog.
    #[arg(long, env = "NOTION_CHANGELOG_PAGE_ID", global = true)]
    pub changelog_page: Option<String>,

    /// Checkpoint file (defaults to ~/.channel-digest/last_processed.txt).
    #[arg(long, env = "CHANNEL_DIGEST_CHECKPOINT", global = true)]
    pub checkpoint: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            channel_id: self.channel.clone(),
            topics_page_id: self.topics_page.clone(),
            changelog_page_id: self.changelog_page.clone(),
            checkpoint_path: self.checkpoint.clone(),
        }
    }

    fn app_config(&self) -> Result<AppConfig> {
        Ok(match &self.config {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        })
    }
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one digest pass.
    Run,

    /// Run digest passes on a fixed interval until interrupted.
    Watch {
        /// Seconds between the start of consecutive passes.
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,
    },

    /// Show the current checkpoint.
    Status,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show the configuration file contents (defaults filled in).
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "channel_digest=info",
        1 => "channel_digest=debug",
        _ => "channel_digest=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Run => cmd_run(&cli).await,
        Command::Watch { interval_secs } => cmd_watch(&cli, *interval_secs).await,
        Command::Status => cmd_status(&cli).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(cli.config.as_deref()),
            ConfigAction::Show => cmd_config_show(&cli),
        },
    }
}

/// Build the orchestrator from config, env and flags.
fn build_digest(cli: &Cli) -> Result<Digest> {
    let config = cli.app_config()?;
    let runtime = RuntimeConfig::resolve(&config, &cli.overrides())?;

    let source = Arc::new(SlackClient::new(&runtime.slack)?);
    let blocks = Arc::new(NotionClient::new(&runtime.notion)?);
    let completion = Arc::new(ChatClient::new(&runtime.llm)?);
    let checkpoint = Arc::new(FileCheckpointStore::new(&runtime.checkpoint_path));

    info!(
        channel = %runtime.slack.channel_id,
        model = completion.model(),
        checkpoint = %runtime.checkpoint_path.display(),
        "digest configured"
    );

    let digest_config = DigestConfig {
        channel_id: runtime.slack.channel_id.clone(),
        topics_page_id: runtime.notion.topics_page_id.clone(),
        changelog_page_id: runtime.notion.changelog_page_id.clone(),
    };
    digest_config.validate()?;
    Ok(Digest::new(
        digest_config,
        source,
        blocks,
        completion,
        checkpoint,
    ))
}

async fn cmd_run(cli: &Cli) -> Result<()> {
    let digest = build_digest(cli)?;

    let reporter = CliProgress::new();
    let result = digest.run(&reporter).await;
    reporter.spinner.finish_and_clear();

    print_summary(&result?);
    Ok(())
}

async fn cmd_watch(cli: &Cli, interval_secs: u64) -> Result<()> {
    if interval_secs == 0 {
        return Err(eyre!("--interval-secs must be at least 1"));
    }
    let digest = build_digest(cli)?;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval_secs, "watching channel, Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted, stopping");
                break;
            }
            _ = ticker.tick() => {
                // A failed pass (checkpoint I/O) is retried on the next tick.
                match digest.run(&SilentProgress).await {
                    Ok(result) => print_summary(&result),
                    Err(e) => error!(error = %e, "digest run failed"),
                }
            }
        }
    }
    Ok(())
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let config = cli.app_config()?;
    let path = resolve_checkpoint_path(&config, &cli.overrides())?;
    let store = FileCheckpointStore::new(&path);
    let checkpoint = store.load().await?;

    println!();
    println!("  Checkpoint: {checkpoint}");
    if let Some(at) = checkpoint.to_datetime() {
        println!("  As UTC:     {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("  File:       {}", path.display());
    println!();
    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if path.exists() {
        return Err(eyre!("config file already exists at {}", path.display()));
    }
    init_config_at(&path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(cli: &Cli) -> Result<()> {
    let config = cli.app_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn print_summary(result: &DigestRunResult) {
    println!();
    if result.is_noop() {
        println!("  No new messages since {}.", result.checkpoint_before);
        println!();
        return;
    }

    println!("  Digest complete!");
    println!("  Messages:   {}", result.messages_processed);
    match &result.merge_status {
        Some(MergeStatus::Merged) | None => println!("  Merge:      merged"),
        Some(MergeStatus::Fallback { reason }) => {
            println!("  Merge:      skipped, documents kept ({reason})")
        }
    }
    if let Some(after) = result.checkpoint_after {
        println!("  Checkpoint: {} -> {after}", result.checkpoint_before);
    }
    if !result.write_failures.is_empty() {
        let failed: Vec<&str> = result.write_failures.iter().map(|k| k.as_str()).collect();
        println!("  Failed:     {}", failed.join(", "));
    }
    if !result.skipped_writes.is_empty() {
        let skipped: Vec<&str> = result.skipped_writes.iter().map(|k| k.as_str()).collect();
        println!("  Unread:     {} (left untouched)", skipped.join(", "));
    }
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _result: &DigestRunResult) {
        self.spinner.finish_and_clear();
    }
}
