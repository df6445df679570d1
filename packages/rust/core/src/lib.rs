//! Digest orchestration for channel-digest.
//!
//! Ties the message source, document store and completion model together
//! into a single incremental pass ([`Digest::run`]).

pub mod document;
pub mod merge;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use document::DocumentStore;
pub use merge::{MergeEngine, MergeParseError, MergeResult, MergeStatus};
pub use pipeline::{Digest, DigestConfig, DigestRunResult, ProgressReporter, SilentProgress};
