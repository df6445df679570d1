//! AI merge of new messages into the topics summary and changelog.
//!
//! One completion call per run. The model is asked for two labelled sections;
//! the answer is split at [`CHANGELOG_DELIMITER`]. Anything that goes wrong
//! (transport, empty answer, unparsable answer) yields the input documents
//! unchanged together with [`MergeStatus::Fallback`].

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, instrument, warn};

use channel_digest_shared::{CompletionClient, DocumentKind, Message};

/// Header the model puts in front of the topics section.
pub const TOPICS_HEADER: &str = "UPDATED TOPICS SUMMARY";

/// Literal separating the topics section from the changelog section.
pub const CHANGELOG_DELIMITER: &str = "UPDATED CHANGELOG";

pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that organizes and summarizes information.";

/// Why a model answer could not be split into the two documents.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeParseError {
    #[error("response has no UPDATED CHANGELOG section")]
    MissingDelimiter,

    #[error("{0} section of the response is empty")]
    EmptySection(DocumentKind),
}

/// Whether the documents in a [`MergeResult`] came from the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    Merged,
    Fallback { reason: String },
}

impl MergeStatus {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged)
    }
}

/// Document bodies to write back after a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub topics: String,
    pub changelog: String,
    pub status: MergeStatus,
}

impl MergeResult {
    fn fallback(topics: &str, changelog: &str, reason: String) -> Self {
        Self {
            topics: topics.to_string(),
            changelog: changelog.to_string(),
            status: MergeStatus::Fallback { reason },
        }
    }
}

/// Merges message batches into the two documents with a completion model.
#[derive(Clone)]
pub struct MergeEngine {
    client: Arc<dyn CompletionClient>,
}

impl MergeEngine {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Merge `messages` (newest-first) into the current documents, dated today (UTC).
    pub async fn merge(&self, messages: &[Message], topics: &str, changelog: &str) -> MergeResult {
        self.merge_on(messages, topics, changelog, Utc::now().date_naive())
            .await
    }

    /// Same as [`merge`](Self::merge) with an explicit changelog date.
    #[instrument(skip_all, fields(messages = messages.len(), %today))]
    pub async fn merge_on(
        &self,
        messages: &[Message],
        topics: &str,
        changelog: &str,
        today: NaiveDate,
    ) -> MergeResult {
        let prompt = build_prompt(messages, topics, changelog, today);

        let response = match self.client.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "merge call failed, keeping current documents");
                return MergeResult::fallback(topics, changelog, e.to_string());
            }
        };

        match parse_response(&response) {
            Ok((new_topics, new_changelog)) => {
                info!(
                    topics_chars = new_topics.len(),
                    changelog_chars = new_changelog.len(),
                    "documents merged"
                );
                MergeResult {
                    topics: new_topics,
                    changelog: new_changelog,
                    status: MergeStatus::Merged,
                }
            }
            Err(e) => {
                warn!(error = %e, "merge response unusable, keeping current documents");
                MergeResult::fallback(topics, changelog, e.to_string())
            }
        }
    }
}

/// Build the user prompt for one merge.
pub fn build_prompt(
    messages: &[Message],
    topics: &str,
    changelog: &str,
    today: NaiveDate,
) -> String {
    let new_content = messages
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are helping to organize and summarize messages from a team chat channel.

New messages (newest first):
{new_content}

Current Topics Summary:
{topics}

Current Changelog:
{changelog}

Update both the Topics Summary and the Changelog using the new messages.
For the Topics Summary, fold new information into existing topics or add new topics where needed.
For the Changelog, add a section dated {today} summarizing the key updates, and keep the earlier entries.

Respond with exactly two sections, headed {TOPICS_HEADER} and {CHANGELOG_DELIMITER}, in that order."
    )
}

/// Split a model answer into `(topics, changelog)`.
///
/// The split happens at the first [`CHANGELOG_DELIMITER`]. When the head
/// contains [`TOPICS_HEADER`], everything before it (a chatty "Sure, here is
/// the update:" line) is discarded; without the header the whole head is the
/// topics body. Heading markup the model wraps around the two section titles
/// is removed; the bodies themselves are only trimmed.
pub fn parse_response(response: &str) -> Result<(String, String), MergeParseError> {
    let (head, tail) = response
        .split_once(CHANGELOG_DELIMITER)
        .ok_or(MergeParseError::MissingDelimiter)?;

    let topics_part = match head.find(TOPICS_HEADER) {
        Some(at) => &head[at + TOPICS_HEADER.len()..],
        None => head,
    };
    let topics = strip_dangling_marker(strip_title_suffix(topics_part)).trim();
    let changelog = strip_title_suffix(tail).trim();

    if topics.is_empty() {
        return Err(MergeParseError::EmptySection(DocumentKind::Topics));
    }
    if changelog.is_empty() {
        return Err(MergeParseError::EmptySection(DocumentKind::Changelog));
    }
    Ok((topics.to_string(), changelog.to_string()))
}

/// Drop the `**:` / `:` left behind a section title on its own line.
fn strip_title_suffix(s: &str) -> &str {
    s.trim_start_matches(|c: char| matches!(c, '*' | ':' | ' ' | '\t'))
}

/// Drop a trailing line made only of `#`/`*`, the opening markup of the next title.
fn strip_dangling_marker(s: &str) -> &str {
    let s = s.trim_end();
    let (rest, last) = match s.rsplit_once('\n') {
        Some((rest, last)) => (rest, last),
        None => ("", s),
    };
    let last = last.trim();
    if !last.is_empty() && last.chars().all(|c| c == '#' || c == '*') {
        rest
    } else {
        s
    }
}
