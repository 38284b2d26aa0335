//! The slice of Block Kit the writer needs: section text plus an image
//! block referencing an uploaded Slack file.
//!
//! Reference: <https://api.slack.com/reference/block-kit/blocks>

use serde::Serialize;

/// A text object used throughout Block Kit.
#[derive(Debug, Clone, Serialize)]
pub struct TextObject {
    /// Text type: "plain_text" or "mrkdwn".
    #[serde(rename = "type")]
    pub text_type: String,
    /// The text content.
    pub text: String,
}

impl TextObject {
    /// Create a mrkdwn text object.
    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            text_type: "mrkdwn".to_string(),
            text: text.into(),
        }
    }
}

/// Reference to an already-uploaded Slack file.
#[derive(Debug, Clone, Serialize)]
pub struct SlackFileRef {
    pub id: String,
}

/// A Block Kit block.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// A section block with mrkdwn text.
    Section { text: TextObject },
    /// An image block backed by an uploaded file.
    Image {
        slack_file: SlackFileRef,
        alt_text: String,
    },
}

impl Block {
    pub fn section(text: impl Into<String>) -> Self {
        Block::Section {
            text: TextObject::mrkdwn(text),
        }
    }

    pub fn image_file(file_id: impl Into<String>, alt_text: impl Into<String>) -> Self {
        Block::Image {
            slack_file: SlackFileRef { id: file_id.into() },
            alt_text: alt_text.into(),
        }
    }
}
