//! Socket Mode envelope and Events API payload shapes.
//!
//! Only the fields the listener consumes are modeled; everything else in
//! the envelope is ignored by serde.

use serde::Deserialize;

/// One websocket frame from `wss://wss-primary.slack.com/…`.
#[derive(Debug, Deserialize)]
pub struct SocketEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Present on envelopes that must be acked.
    pub envelope_id: Option<String>,
    pub payload: Option<EventsApiPayload>,
    /// Present on `disconnect` envelopes.
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsApiPayload {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub event: Option<Event>,
}

/// A `message` or `app_mention` event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: String,
    pub user: String,
    pub bot_id: String,
    pub text: String,
    pub channel: String,
    pub ts: String,
    pub thread_ts: String,
    /// Nested message carried by `message_changed` and bot attachments.
    pub message: Option<NestedMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NestedMessage {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub pretext: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_events_api_envelope() {
        let raw = r#"{
            "type": "events_api",
            "envelope_id": "e-1",
            "accepts_response_payload": false,
            "payload": {
                "type": "event_callback",
                "event": {
                    "type": "message",
                    "user": "U123",
                    "text": "date",
                    "channel": "C123",
                    "ts": "1700000000.000100"
                }
            }
        }"#;
        let env: SocketEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.kind, "events_api");
        assert_eq!(env.envelope_id.as_deref(), Some("e-1"));
        let event = env.payload.unwrap().event.unwrap();
        assert_eq!(event.kind, "message");
        assert_eq!(event.user, "U123");
        assert_eq!(event.text, "date");
        assert_eq!(event.channel, "C123");
        assert!(event.thread_ts.is_empty());
        assert!(event.message.is_none());
    }

    #[test]
    fn parses_hello_and_disconnect() {
        let hello: SocketEnvelope = serde_json::from_str(r#"{"type":"hello"}"#).unwrap();
        assert_eq!(hello.kind, "hello");
        assert!(hello.envelope_id.is_none());

        let disconnect: SocketEnvelope =
            serde_json::from_str(r#"{"type":"disconnect","reason":"refresh_requested"}"#).unwrap();
        assert_eq!(disconnect.kind, "disconnect");
        assert_eq!(disconnect.reason.as_deref(), Some("refresh_requested"));
    }

    #[test]
    fn parses_bot_attachments() {
        let raw = r#"{
            "type": "message",
            "subtype": "bot_message",
            "bot_id": "B99",
            "channel": "C123",
            "ts": "1.2",
            "message": {
                "attachments": [{"pretext": "deploy finished", "text": "all green"}]
            }
        }"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.subtype, "bot_message");
        let nested = event.message.unwrap();
        assert_eq!(nested.attachments[0].pretext, "deploy finished");
        assert_eq!(nested.attachments[0].text, "all green");
    }
}
