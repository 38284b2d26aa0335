//! Slack Web API wrapper for outbound messages, reactions, and uploads.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::blocks::Block;

const API_BASE: &str = "https://slack.com/api";

/// Errors from Slack API operations.
#[derive(Debug, Error)]
pub enum SlackError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    Api(String),
}

impl SlackError {
    /// The transient block-validation failure Slack returns while an
    /// uploaded file is still being processed.
    pub fn is_invalid_blocks(&self) -> bool {
        matches!(self, SlackError::Api(msg) if msg.contains("invalid_blocks"))
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    error: Option<String>,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    ok: bool,
    error: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadFileResponse {
    ok: bool,
    error: Option<String>,
    file: Option<FileSummary>,
}

#[derive(Debug, Deserialize)]
struct FileSummary {
    id: String,
}

fn ensure_ok(resp: &SlackResponse) -> Result<(), SlackError> {
    if resp.ok {
        Ok(())
    } else {
        Err(SlackError::Api(
            resp.error.clone().unwrap_or_else(|| "unknown error".into()),
        ))
    }
}

/// Parameters for one `chat.postMessage` call.
#[derive(Debug, Default)]
pub struct PostMessage<'a> {
    pub channel: &'a str,
    pub username: &'a str,
    pub icon_emoji: &'a str,
    pub icon_url: &'a str,
    pub thread_ts: Option<&'a str>,
    pub reply_broadcast: bool,
    /// Attachment text with a color hint ("good" / "danger").
    pub attachment: Option<(&'a str, &'a str)>,
    /// Block Kit blocks (image posts).
    pub blocks: Option<&'a [Block]>,
    /// Top-level message text; also the notification fallback for blocks.
    pub text: Option<&'a str>,
}

/// Slack Web API client holding both workspace tokens.
///
/// The bot token authorizes posting, reactions, and uploads; the app-level
/// token only ever opens Socket Mode connections.
pub struct SlackApi {
    client: Client,
    base_url: String,
    bot_token: String,
    app_token: String,
}

impl SlackApi {
    pub fn new(bot_token: String, app_token: String) -> Self {
        Self::with_base_url(API_BASE.to_string(), bot_token, app_token)
    }

    /// Point the client at a different API root (tests).
    pub fn with_base_url(base_url: String, bot_token: String, app_token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token,
            app_token,
        }
    }

    /// Resolve the bot's own user ID via `auth.test`.
    pub async fn auth_test(&self) -> Result<String, SlackError> {
        let resp = self
            .client
            .post(format!("{}/auth.test", self.base_url))
            .bearer_auth(&self.bot_token)
            .send()
            .await?;
        let parsed: AuthTestResponse = resp.json().await?;
        if !parsed.ok {
            return Err(SlackError::Api(
                parsed.error.unwrap_or_else(|| "unknown error".into()),
            ));
        }
        parsed
            .user_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SlackError::Api("auth.test returned no user_id".into()))
    }

    /// Open a Socket Mode connection; returns the websocket URL.
    pub async fn connections_open(&self) -> Result<String, SlackError> {
        let resp = self
            .client
            .post(format!("{}/apps.connections.open", self.base_url))
            .bearer_auth(&self.app_token)
            .send()
            .await?;
        let parsed: ConnectionsOpenResponse = resp.json().await?;
        if !parsed.ok {
            return Err(SlackError::Api(
                parsed.error.unwrap_or_else(|| "unknown error".into()),
            ));
        }
        parsed
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| SlackError::Api("apps.connections.open returned no url".into()))
    }

    /// Post a message with optional attachment, blocks, and threading.
    pub async fn post_message(&self, msg: PostMessage<'_>) -> Result<(), SlackError> {
        let mut body = serde_json::json!({ "channel": msg.channel });
        if !msg.username.is_empty() {
            body["username"] = msg.username.into();
        }
        if !msg.icon_emoji.is_empty() {
            body["icon_emoji"] = msg.icon_emoji.into();
        }
        if !msg.icon_url.is_empty() {
            body["icon_url"] = msg.icon_url.into();
        }
        if let Some(thread_ts) = msg.thread_ts {
            body["thread_ts"] = thread_ts.into();
            body["reply_broadcast"] = msg.reply_broadcast.into();
        }
        if let Some((text, color)) = msg.attachment {
            body["attachments"] = serde_json::json!([{ "text": text, "color": color }]);
        }
        if let Some(blocks) = msg.blocks {
            body["blocks"] = serde_json::to_value(blocks)
                .map_err(|e| SlackError::Api(format!("failed to serialize blocks: {e}")))?;
        }
        if let Some(text) = msg.text {
            body["text"] = text.into();
        }

        let resp = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?;
        let parsed: SlackResponse = resp.json().await?;
        ensure_ok(&parsed)
    }

    /// Upload a file via `files.upload` and return its file ID.
    pub async fn upload_file(
        &self,
        filename: &str,
        bytes: &[u8],
        title: Option<&str>,
    ) -> Result<String, SlackError> {
        use reqwest::multipart;

        let file_part = multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string());
        let mut form = multipart::Form::new().part("file", file_part);
        if let Some(title) = title {
            form = form.text("title", title.to_string());
        }

        let resp = self
            .client
            .post(format!("{}/files.upload", self.base_url))
            .bearer_auth(&self.bot_token)
            .multipart(form)
            .send()
            .await?;
        let parsed: UploadFileResponse = resp.json().await?;
        if !parsed.ok {
            return Err(SlackError::Api(
                parsed.error.unwrap_or_else(|| "unknown error".into()),
            ));
        }
        parsed
            .file
            .map(|f| f.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SlackError::Api("files.upload returned no file ID".into()))
    }

    /// Add a reaction emoji to a message.
    pub async fn add_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        emoji: &str,
    ) -> Result<(), SlackError> {
        self.reaction("reactions.add", channel, timestamp, emoji).await
    }

    /// Remove a reaction emoji from a message.
    pub async fn remove_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        emoji: &str,
    ) -> Result<(), SlackError> {
        self.reaction("reactions.remove", channel, timestamp, emoji)
            .await
    }

    async fn reaction(
        &self,
        method: &str,
        channel: &str,
        timestamp: &str,
        emoji: &str,
    ) -> Result<(), SlackError> {
        let body = serde_json::json!({
            "channel": channel,
            "timestamp": timestamp,
            "name": emoji,
        });
        let resp = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?;
        let parsed: SlackResponse = resp.json().await?;
        ensure_ok(&parsed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn api(server: &MockServer) -> SlackApi {
        SlackApi::with_base_url(server.uri(), "xoxb-test".into(), "xapp-test".into())
    }

    #[tokio::test]
    async fn auth_test_returns_user_id() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/auth.test"))
            .and(matchers::header("Authorization", "Bearer xoxb-test"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "user_id": "U0BOT"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(api(&server).auth_test().await.unwrap(), "U0BOT");
    }

    #[tokio::test]
    async fn connections_open_uses_the_app_token() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/apps.connections.open"))
            .and(matchers::header("Authorization", "Bearer xapp-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "url": "wss://example.com/ws"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(
            api(&server).connections_open().await.unwrap(),
            "wss://example.com/ws"
        );
    }

    #[tokio::test]
    async fn post_message_carries_attachment_and_threading() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/chat.postMessage"))
            .and(matchers::body_partial_json(json!({
                "channel": "C123",
                "username": "bosun",
                "thread_ts": "1.2",
                "reply_broadcast": true,
                "attachments": [{"text": "out", "color": "good"}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        api(&server)
            .post_message(PostMessage {
                channel: "C123",
                username: "bosun",
                thread_ts: Some("1.2"),
                reply_broadcast: true,
                attachment: Some(("out", "good")),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn api_level_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "invalid_blocks"})),
            )
            .mount(&server)
            .await;

        let err = api(&server)
            .post_message(PostMessage {
                channel: "C123",
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_invalid_blocks());
        assert_eq!(err.to_string(), "API returned error: invalid_blocks");
    }

    #[tokio::test]
    async fn upload_file_returns_the_file_id() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/files.upload"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "file": {"id": "F42"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = api(&server)
            .upload_file("output.png", b"\x89PNG", Some("bosun output"))
            .await
            .unwrap();
        assert_eq!(id, "F42");
    }

    #[tokio::test]
    async fn reactions_hit_both_endpoints() {
        let server = MockServer::start().await;
        for path in ["/reactions.add", "/reactions.remove"] {
            Mock::given(matchers::method("POST"))
                .and(matchers::path(path))
                .and(matchers::body_partial_json(json!({
                    "channel": "C1", "timestamp": "1.2", "name": "eyes"
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
                .expect(1)
                .mount(&server)
                .await;
        }
        let api = api(&server);
        api.add_reaction("C1", "1.2", "eyes").await.unwrap();
        api.remove_reaction("C1", "1.2", "eyes").await.unwrap();
    }
}
