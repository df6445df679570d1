//! Notion block store.
//!
//! Implements [`BlockStore`] over the Notion blocks API: list a page's child
//! blocks (paginated), delete a block, append a paragraph.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use channel_digest_shared::{Block, BlockStore, DigestError, NotionSettings, Result, Secret};

/// Notion API version this client speaks.
pub const NOTION_VERSION: &str = "2022-06-28";

/// Maximum characters Notion accepts in a single rich-text run.
pub const MAX_RICH_TEXT_CHARS: usize = 2000;

/// Maximum rich-text runs Notion accepts in one paragraph.
pub const MAX_RICH_TEXT_RUNS: usize = 100;

/// Longest paragraph [`NotionClient::append_paragraph`] can send.
pub const MAX_PARAGRAPH_CHARS: usize = MAX_RICH_TEXT_CHARS * MAX_RICH_TEXT_RUNS;

/// Page size for child listing (Notion's maximum).
const PAGE_SIZE: &str = "100";

/// Safety cap on child-listing pages for one container.
const MAX_LIST_PAGES: usize = 1000;

/// User-Agent string for Notion requests.
const USER_AGENT: &str = concat!("channel-digest/", env!("CARGO_PKG_VERSION"));

const SERVICE: &str = "notion";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Notion API client implementing [`BlockStore`].
pub struct NotionClient {
    client: Client,
    base_url: String,
    token: Secret,
}

impl NotionClient {
    /// Build a client from resolved settings.
    pub fn new(settings: &NotionSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DigestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.base_url.as_str().trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(self.token.expose())
            .header("Notion-Version", NOTION_VERSION)
    }

    /// Send a request and turn non-2xx answers into [`DigestError::Api`].
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| DigestError::Network(format!("{what}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = match response.json::<ApiError>().await {
            Ok(ApiError {
                code: Some(code),
                message,
            }) => format!("{code}: {}", message.unwrap_or_default()),
            _ => String::new(),
        };
        Err(DigestError::api(
            SERVICE,
            format!("{what}: HTTP {status} {detail}").trim_end().to_string(),
        ))
    }
}

#[async_trait]
impl BlockStore for NotionClient {
    #[instrument(skip(self))]
    async fn list_children(&self, container_id: &str) -> Result<Vec<Block>> {
        let url = format!("{}/blocks/{container_id}/children", self.base_url);
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut request = self
                .client
                .get(&url)
                .query(&[("page_size", PAGE_SIZE)]);
            if let Some(c) = &cursor {
                request = request.query(&[("start_cursor", c.as_str())]);
            }

            let page: ChildrenPage = self
                .send(request, "list children")
                .await?
                .json()
                .await
                .map_err(|e| DigestError::parse(format!("invalid children listing: {e}")))?;

            blocks.extend(page.results.iter().filter_map(parse_block));

            match page.next_cursor.filter(|_| page.has_more) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(count = blocks.len(), "listed child blocks");
        Ok(blocks)
    }

    #[instrument(skip(self))]
    async fn delete_block(&self, block_id: &str) -> Result<()> {
        let url = format!("{}/blocks/{block_id}", self.base_url);
        self.send(self.client.delete(&url), "delete block").await?;
        Ok(())
    }

    fn max_paragraph_chars(&self) -> Option<usize> {
        Some(MAX_PARAGRAPH_CHARS)
    }

    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn append_paragraph(&self, container_id: &str, text: &str) -> Result<()> {
        let chars = text.chars().count();
        if chars > MAX_PARAGRAPH_CHARS {
            return Err(DigestError::validation(format!(
                "paragraph of {chars} chars exceeds Notion's {MAX_PARAGRAPH_CHARS}"
            )));
        }
        let url = format!("{}/blocks/{container_id}/children", self.base_url);
        let body = paragraph_children(text);
        self.send(self.client.patch(&url).json(&body), "append paragraph")
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract id and plain text from a raw block object.
fn parse_block(raw: &Value) -> Option<Block> {
    let id = raw.get("id")?.as_str()?.to_string();

    let text = raw
        .get("type")
        .and_then(Value::as_str)
        .and_then(|kind| raw.get(kind))
        .and_then(|body| body.get("rich_text"))
        .and_then(Value::as_array)
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("plain_text").and_then(Value::as_str))
                .collect::<String>()
        });

    Some(Block { id, text })
}

/// Split `text` into runs of at most [`MAX_RICH_TEXT_CHARS`] characters.
fn chunk_text(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let split_at = rest
            .char_indices()
            .nth(MAX_RICH_TEXT_CHARS)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(split_at);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

/// Request body appending a single paragraph block.
fn paragraph_children(text: &str) -> Value {
    let rich_text: Vec<Value> = chunk_text(text)
        .into_iter()
        .map(|chunk| json!({"type": "text", "text": {"content": chunk}}))
        .collect();

    json!({
        "children": [{
            "object": "block",
            "type": "paragraph",
            "paragraph": {"rich_text": rich_text}
        }]
    })
}
