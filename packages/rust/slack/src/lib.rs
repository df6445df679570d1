//! Slack message source.
//!
//! Reads channel history through `conversations.history`, following cursors
//! until Slack reports no more pages, and returns the batch newest-first.
//!
//! Slack pages from the newest message backwards, so a partial batch would be
//! missing the oldest messages while still carrying the newest timestamp. A
//! backlog that does not fit in `max_pages` pages is therefore an error, not a
//! truncated result.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use channel_digest_shared::{
    DigestError, Message, MessageSource, Result, Secret, SlackSettings, Timestamp,
};

/// User-Agent string for Slack requests.
const USER_AGENT: &str = concat!("channel-digest/", env!("CARGO_PKG_VERSION"));

const SERVICE: &str = "slack";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Envelope of a `conversations.history` response.
#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    ts: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    user: Option<String>,
}

impl HistoryResponse {
    /// Cursor for the next page, if Slack says there is one.
    fn next_cursor(&self) -> Option<&str> {
        if !self.has_more {
            return None;
        }
        self.response_metadata
            .as_ref()
            .and_then(|m| m.next_cursor.as_deref())
            .filter(|c| !c.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Slack Web API client implementing [`MessageSource`].
pub struct SlackClient {
    client: Client,
    base_url: String,
    token: Secret,
    page_limit: u32,
    max_pages: u32,
}

impl SlackClient {
    /// Build a client from resolved settings.
    pub fn new(settings: &SlackSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DigestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.base_url.as_str().trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            page_limit: settings.page_limit,
            max_pages: settings.max_pages,
        })
    }

    /// Fetch one page of channel history.
    async fn history_page(
        &self,
        channel: &str,
        since: Timestamp,
        cursor: Option<&str>,
    ) -> Result<HistoryResponse> {
        let url = format!("{}/conversations.history", self.base_url);
        let oldest = since.to_string();
        let limit = self.page_limit.to_string();

        let mut query: Vec<(&str, &str)> = vec![
            ("channel", channel),
            ("oldest", oldest.as_str()),
            ("limit", limit.as_str()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.token.expose())
            .query(&query)
            .send()
            .await
            .map_err(|e| DigestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::api(SERVICE, format!("HTTP {status}")));
        }

        let page: HistoryResponse = response
            .json()
            .await
            .map_err(|e| DigestError::parse(format!("invalid conversations.history body: {e}")))?;

        if !page.ok {
            let code = page.error.as_deref().unwrap_or("unknown_error");
            return Err(DigestError::api(SERVICE, code));
        }

        Ok(page)
    }
}

#[async_trait]
impl MessageSource for SlackClient {
    #[instrument(skip_all, fields(channel = %channel, since = %since))]
    async fn fetch(&self, channel: &str, since: Timestamp) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        for page_no in 1..=self.max_pages {
            let page = self.history_page(channel, since, cursor.as_deref()).await?;
            debug!(page = page_no, count = page.messages.len(), "history page received");

            let next = page.next_cursor().map(str::to_string);
            messages.extend(page.messages.into_iter().filter_map(convert_message));

            match next {
                Some(c) if page_no < self.max_pages => cursor = Some(c),
                Some(_) => {
                    warn!(
                        max_pages = self.max_pages,
                        page_limit = self.page_limit,
                        "history page cap reached before the end of the backlog"
                    );
                    return Err(DigestError::api(
                        SERVICE,
                        format!(
                            "backlog exceeds {} pages of {} messages; raise [slack] max_pages",
                            self.max_pages, self.page_limit
                        ),
                    ));
                }
                None => break,
            }
        }

        // Newest-first is part of the MessageSource contract.
        messages.sort_by(|a, b| b.ts.cmp(&a.ts));

        info!(count = messages.len(), "fetched new messages");
        Ok(messages)
    }
}

/// Convert a wire message, dropping ones whose `ts` is not a decimal timestamp.
fn convert_message(raw: RawMessage) -> Option<Message> {
    match raw.ts.parse::<Timestamp>() {
        Ok(ts) => Some(Message {
            ts,
            text: raw.text,
            user: raw.user,
        }),
        Err(e) => {
            warn!(ts = %raw.ts, error = %e, "skipping message with unparsable ts");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn settings(server: &MockServer, max_pages: u32) -> SlackSettings {
        SlackSettings {
            token: Secret::new("xoxb-test"),
            channel_id: "C1".into(),
            base_url: Url::parse(&server.uri()).unwrap(),
            page_limit: 2,
            max_pages,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn fetch_single_page_newest_first() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(query_param("channel", "C1"))
            .and(query_param("oldest", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    {"type": "message", "user": "U1", "text": "B", "ts": "100"},
                    {"type": "message", "user": "U2", "text": "A", "ts": "200"}
                ],
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::new(&settings(&server, 5)).unwrap();
        let messages = client.fetch("C1", Timestamp::new(50, 0)).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "A");
        assert_eq!(messages[0].ts, Timestamp::new(200, 0));
        assert_eq!(messages[1].user.as_deref(), Some("U1"));
    }

    #[tokio::test]
    async fn fetch_follows_cursor() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    {"text": "newest", "ts": "300.000002"},
                    {"text": "middle", "ts": "300.000001"}
                ],
                "has_more": true,
                "response_metadata": {"next_cursor": "page-2"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .and(query_param("cursor", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{"text": "oldest", "ts": "299.9"}],
                "has_more": false,
                "response_metadata": {"next_cursor": ""}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::new(&settings(&server, 5)).unwrap();
        let messages = client.fetch("C1", Timestamp::new(0, 0)).await.unwrap();

        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["newest", "middle", "oldest"]);
    }

    #[tokio::test]
    async fn fetch_refuses_backlog_beyond_page_cap() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{"text": "x", "ts": "10"}],
                "has_more": true,
                "response_metadata": {"next_cursor": "more"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::new(&settings(&server, 1)).unwrap();
        let err = client.fetch("C1", Timestamp::default()).await.unwrap_err();
        match err {
            DigestError::Api { service, message } => {
                assert_eq!(service, "slack");
                assert!(message.contains("max_pages"));
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_accepts_backlog_ending_on_last_allowed_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .and(query_param("cursor", "more"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{"text": "older", "ts": "5"}],
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{"text": "newer", "ts": "10"}],
                "has_more": true,
                "response_metadata": {"next_cursor": "more"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::new(&settings(&server, 2)).unwrap();
        let messages = client.fetch("C1", Timestamp::default()).await.unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn empty_history_is_ok() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "messages": []})),
            )
            .mount(&server)
            .await;

        let client = SlackClient::new(&settings(&server, 5)).unwrap();
        let messages = client.fetch("C1", Timestamp::new(1, 0)).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn slack_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "channel_not_found"})),
            )
            .mount(&server)
            .await;

        let client = SlackClient::new(&settings(&server, 5)).unwrap();
        let err = client.fetch("C1", Timestamp::new(1, 0)).await.unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }

    #[tokio::test]
    async fn http_failure_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = SlackClient::new(&settings(&server, 5)).unwrap();
        let err = client.fetch("C1", Timestamp::new(1, 0)).await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn unparsable_ts_is_dropped() {
        let raw = RawMessage {
            ts: "yesterday".into(),
            text: "hi".into(),
            user: None,
        };
        assert!(convert_message(raw).is_none());
    }

    #[test]
    fn next_cursor_requires_has_more() {
        let page: HistoryResponse = serde_json::from_value(json!({
            "ok": true,
            "has_more": false,
            "response_metadata": {"next_cursor": "abc"}
        }))
        .unwrap();
        assert!(page.next_cursor().is_none());
    }
}
