//! Socket Mode listener: transport events in, `CommandInput`s out.
//!
//! One session = one `apps.connections.open` websocket. Every envelope is
//! acked immediately; `disconnect` envelopes (Slack rotates connections
//! periodically) trigger a clean reconnect, transport errors reconnect with
//! exponential backoff.
//!
//! The enqueue at the end of the pipeline is deliberately non-blocking: a
//! full request queue drops the message instead of stalling the ack path,
//! so Slack never sees the bridge as dead during a command burst.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use bosun_command::CommandInput;
use bosun_types::{Config, ReplyRef};

use crate::api::{SlackApi, SlackError};
use crate::events::{Event, SocketEnvelope};
use crate::normalize::normalize;

/// Sender of reminder messages.
const SLACKBOT_USER: &str = "USLACKBOT";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Which inbound messages are accepted.
#[derive(Debug, Clone, Default)]
pub struct ListenerPolicy {
    pub accept_reminder: bool,
    pub accept_bot_message: bool,
    pub accept_thread_message: bool,
    pub allowed_user_ids: Vec<String>,
    pub allowed_channel_ids: Vec<String>,
}

impl ListenerPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            accept_reminder: cfg.accept_reminder,
            accept_bot_message: cfg.accept_bot_message,
            accept_thread_message: cfg.accept_thread_message,
            allowed_user_ids: cfg.allowed_user_ids.clone(),
            allowed_channel_ids: cfg.allowed_channel_ids.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error(transparent)]
    Api(#[from] SlackError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Run the listener until the request channel closes.
///
/// Reconnects forever: Slack refreshes Socket Mode connections routinely,
/// and transient failures should never take the bridge down.
pub async fn run_listener(
    api: &SlackApi,
    requests: async_channel::Sender<CommandInput>,
    policy: ListenerPolicy,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match run_session(api, &requests, &policy).await {
            Ok(()) => {
                info!("socket mode connection closed; reconnecting");
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs(), "socket mode session failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
        if requests.is_closed() {
            return;
        }
    }
}

async fn run_session(
    api: &SlackApi,
    requests: &async_channel::Sender<CommandInput>,
    policy: &ListenerPolicy,
) -> Result<(), SessionError> {
    // The bot's own user ID (not its bot ID); refreshed once per connection
    // and used to ignore our own chatter.
    let self_id = api.auth_test().await?;
    let socket_url = api.connections_open().await?;
    let (stream, _response) = connect_async(socket_url.as_str()).await?;
    info!("connected to Slack in socket mode");
    let (mut sink, mut source) = stream.split();

    while let Some(message) = source.next().await {
        match message? {
            WsMessage::Text(raw) => {
                let envelope: SocketEnvelope = match serde_json::from_str(&raw) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(error = %e, "ignoring unparseable socket frame");
                        continue;
                    }
                };
                if let Some(envelope_id) = &envelope.envelope_id {
                    let ack = serde_json::json!({ "envelope_id": envelope_id }).to_string();
                    sink.send(WsMessage::Text(ack)).await?;
                }
                match envelope.kind.as_str() {
                    "hello" => debug!("socket mode hello"),
                    "disconnect" => {
                        debug!(reason = ?envelope.reason, "disconnect requested");
                        return Ok(());
                    }
                    "events_api" => {
                        if let Some(event) = envelope.payload.and_then(|p| p.event) {
                            handle_event(event, &self_id, policy, requests);
                        }
                    }
                    other => debug!(kind = %other, "ignoring socket envelope"),
                }
            }
            WsMessage::Close(_) => return Ok(()),
            // tungstenite answers pings on flush; nothing to do here.
            _ => {}
        }
    }
    Ok(())
}

fn handle_event(
    event: Event,
    self_id: &str,
    policy: &ListenerPolicy,
    requests: &async_channel::Sender<CommandInput>,
) {
    let is_mention = match event.kind.as_str() {
        "message" => false,
        "app_mention" => true,
        _ => {
            debug!(kind = %event.kind, "unsupported event type");
            return;
        }
    };

    if event.user == SLACKBOT_USER && !policy.accept_reminder {
        return;
    }
    // Never react to our own output, whatever the policy says.
    if !self_id.is_empty() && event.user == self_id {
        return;
    }
    let from_bot = if is_mention {
        !event.bot_id.is_empty()
    } else {
        event.subtype == "bot_message"
    };
    if from_bot && !policy.accept_bot_message {
        return;
    }
    if !event.thread_ts.is_empty() && !policy.accept_thread_message {
        return;
    }
    if !policy.allowed_user_ids.is_empty() && !policy.allowed_user_ids.contains(&event.user) {
        debug!(user = %event.user, "user not in allow-list");
        return;
    }
    if !policy.allowed_channel_ids.is_empty()
        && !policy.allowed_channel_ids.contains(&event.channel)
    {
        debug!(channel = %event.channel, "channel not in allow-list");
        return;
    }

    let text = extract_text(&event);
    if text.is_empty() {
        return;
    }
    let text = normalize(&text);
    if text.is_empty() {
        return;
    }

    let reply = if is_mention {
        ReplyRef::AppMention {
            channel: event.channel,
            ts: event.ts,
        }
    } else {
        ReplyRef::Message {
            channel: event.channel,
            ts: event.ts,
        }
    };

    // Shed load instead of blocking: the ack path must stay live even when
    // every worker is busy.
    match requests.try_send(CommandInput { reply, text }) {
        Ok(()) => {}
        Err(async_channel::TrySendError::Full(input)) => {
            warn!(text = %input.text, "request queue full; dropping message");
        }
        Err(async_channel::TrySendError::Closed(_)) => {
            debug!("request queue closed");
        }
    }
}

/// Pull the command text out of an event, in preference order.
fn extract_text(event: &Event) -> String {
    if event.user == SLACKBOT_USER {
        if let Some(reminder) = event.text.strip_prefix("Reminder: ") {
            return reminder.strip_suffix('.').unwrap_or(reminder).to_string();
        }
    }
    if !event.text.is_empty() {
        return event.text.clone();
    }
    if let Some(nested) = &event.message {
        if !nested.attachments.is_empty() {
            let attachment = &nested.attachments[0];
            if !attachment.pretext.is_empty() {
                if !attachment.text.is_empty() {
                    return format!("{}\n{}", attachment.pretext, attachment.text);
                }
                return attachment.pretext.clone();
            }
            return attachment.text.clone();
        }
        if !nested.text.is_empty() {
            return nested.text.clone();
        }
    }
    String::new()
}
