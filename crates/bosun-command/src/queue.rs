//! Messages exchanged between the listener, the executors, and the writer.

use std::sync::Arc;

use bosun_types::{ReplyRef, ReplyStyle};

/// One normalized chat message waiting for execution.
#[derive(Debug, Clone)]
pub struct CommandInput {
    /// Back-reference to the originating chat message.
    pub reply: ReplyRef,
    /// Normalized message body. The first line is the command line; the
    /// remaining lines become the command's stdin.
    pub text: String,
}

/// One unit of feedback for the chat writer.
///
/// Either a lifecycle marker (`spawned` / `finished`) or a payload carrying
/// exactly one of `text` and `image`. Use the constructors; they keep the
/// payload exclusivity intact.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub reply: ReplyRef,
    pub style: Option<Arc<ReplyStyle>>,
    pub text: Option<String>,
    /// PNG bytes converted from an embedded sixel sequence.
    pub image: Option<Vec<u8>>,
    pub is_err_out: bool,
    pub spawned: bool,
    pub finished: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    fn empty(reply: ReplyRef) -> Self {
        Self {
            reply,
            style: None,
            text: None,
            image: None,
            is_err_out: false,
            spawned: false,
            finished: false,
            exit_code: 0,
        }
    }

    /// Marker: the first command of an input matched and execution begins.
    pub fn spawned(reply: ReplyRef) -> Self {
        Self {
            spawned: true,
            ..Self::empty(reply)
        }
    }

    /// Marker: all commands of an input finished with `exit_code`.
    pub fn finished(reply: ReplyRef, exit_code: i32) -> Self {
        Self {
            finished: true,
            exit_code,
            ..Self::empty(reply)
        }
    }

    /// Text payload on the given polarity.
    pub fn text(
        reply: ReplyRef,
        style: Option<Arc<ReplyStyle>>,
        text: String,
        is_err_out: bool,
    ) -> Self {
        Self {
            style,
            text: Some(text),
            is_err_out,
            ..Self::empty(reply)
        }
    }

    /// Image payload (PNG bytes) on the given polarity.
    pub fn image(
        reply: ReplyRef,
        style: Option<Arc<ReplyStyle>>,
        png: Vec<u8>,
        is_err_out: bool,
    ) -> Self {
        Self {
            style,
            image: Some(png),
            is_err_out,
            ..Self::empty(reply)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply() -> ReplyRef {
        ReplyRef::Message {
            channel: "C1".into(),
            ts: "1.2".into(),
        }
    }

    #[test]
    fn payload_constructors_are_exclusive() {
        let t = CommandOutput::text(reply(), None, "hi".into(), false);
        assert!(t.text.is_some() && t.image.is_none());
        assert!(!t.spawned && !t.finished);

        let i = CommandOutput::image(reply(), None, vec![1, 2, 3], true);
        assert!(i.image.is_some() && i.text.is_none());
        assert!(i.is_err_out);
    }

    #[test]
    fn lifecycle_constructors_carry_no_payload() {
        let s = CommandOutput::spawned(reply());
        assert!(s.spawned && !s.finished);
        assert!(s.text.is_none() && s.image.is_none());

        let f = CommandOutput::finished(reply(), 143);
        assert!(f.finished && !f.spawned);
        assert_eq!(f.exit_code, 143);
    }
}
