//! Shared types, error model, configuration and collaborator traits for channel-digest.
//!
//! This crate is the foundation depended on by all other channel-digest crates.
//! It provides:
//! - [`DigestError`], the unified error type
//! - Domain types ([`Timestamp`], [`Message`], [`DocumentKind`], [`Block`])
//! - Collaborator traits ([`MessageSource`], [`BlockStore`], [`CompletionClient`], [`CheckpointStore`])
//! - Configuration ([`AppConfig`], [`RuntimeConfig`], config loading)

pub mod config;
pub mod error;
pub mod services;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CheckpointConfig, LlmConfig, LlmSettings, NotionConfig, NotionSettings,
    Overrides, RuntimeConfig, Secret, SlackConfig, SlackSettings, config_dir, config_file_path,
    default_checkpoint_path, init_config_at, load_config, load_config_from,
    resolve_checkpoint_path,
};
pub use error::{DigestError, Result};
pub use services::{BlockStore, CheckpointStore, CompletionClient, MessageSource};
pub use types::{Block, DocumentKind, Message, Timestamp};
