//! The single output-queue consumer posting results back into Slack.
//!
//! Lifecycle markers drive the reaction dance on the originating message
//! (`:eyes:` while running, `:white_check_mark:` / `:x:` when done); text
//! payloads become styled attachment messages; image payloads are uploaded
//! as files and referenced from an image block. Slack processes uploads
//! asynchronously, so an image-block post can bounce with `invalid_blocks`
//! for a moment -- those posts retry with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use bosun_command::CommandOutput;
use bosun_types::ReplyStyle;

use crate::api::{PostMessage, SlackApi, SlackError};
use crate::blocks::Block;

const IMAGE_POST_ATTEMPTS: u32 = 5;
const IMAGE_POST_BACKOFF: Duration = Duration::from_millis(200);

/// Drain the output queue until every sender is gone.
pub async fn run_writer(api: &SlackApi, mut outputs: mpsc::Receiver<CommandOutput>) {
    let mut running: i64 = 0;
    while let Some(output) = outputs.recv().await {
        if output.spawned {
            running += 1;
            debug!(running, "command spawned");
            react(api, &output, "eyes", true).await;
        } else if output.finished {
            running -= 1;
            debug!(running, exit_code = output.exit_code, "command finished");
            let verdict = if output.exit_code == 0 {
                "white_check_mark"
            } else {
                "x"
            };
            react(api, &output, verdict, true).await;
            react(api, &output, "eyes", false).await;
        }

        if has_meaningful_text(&output) {
            if let Err(e) = post_text(api, &output).await {
                error!(error = %e, "failed to post command output");
            }
        }
        if let Some(png) = output.image.as_deref() {
            if let Err(e) = post_image(api, &output, png).await {
                error!(error = %e, "failed to upload image output");
            }
        }
    }
}

/// Reactions are best-effort; an already-reacted error must not disturb the
/// pipeline.
async fn react(api: &SlackApi, output: &CommandOutput, emoji: &str, add: bool) {
    let channel = output.reply.channel();
    let ts = output.reply.timestamp();
    let result = if add {
        api.add_reaction(channel, ts, emoji).await
    } else {
        api.remove_reaction(channel, ts, emoji).await
    };
    if let Err(e) = result {
        debug!(emoji, add, error = %e, "reaction update failed");
    }
}

fn has_meaningful_text(output: &CommandOutput) -> bool {
    output
        .text
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty())
}

fn style_of(output: &CommandOutput) -> Arc<ReplyStyle> {
    match &output.style {
        Some(style) => style.clone(),
        None => Arc::new(ReplyStyle {
            username: "bosun".into(),
            icon_emoji: ":ghost:".into(),
            ..Default::default()
        }),
    }
}

fn rendered_text(output: &CommandOutput, style: &ReplyStyle) -> String {
    let text = output.text.as_deref().unwrap_or_default();
    if style.monospaced {
        format!("```{text}```")
    } else {
        text.to_string()
    }
}

fn color(output: &CommandOutput) -> &'static str {
    if output.is_err_out {
        "danger"
    } else {
        "good"
    }
}

fn reply_broadcast(output: &CommandOutput, style: &ReplyStyle) -> bool {
    style.post_as_reply && (style.always_broadcast || output.is_err_out)
}

async fn post_text(api: &SlackApi, output: &CommandOutput) -> Result<(), SlackError> {
    let style = style_of(output);
    let text = rendered_text(output, &style);
    api.post_message(PostMessage {
        channel: output.reply.channel(),
        username: &style.username,
        icon_emoji: &style.icon_emoji,
        icon_url: &style.icon_url,
        thread_ts: style.post_as_reply.then(|| output.reply.timestamp()),
        reply_broadcast: reply_broadcast(output, &style),
        attachment: Some((&text, color(output))),
        ..Default::default()
    })
    .await
}

async fn post_image(api: &SlackApi, output: &CommandOutput, png: &[u8]) -> Result<(), SlackError> {
    let style = style_of(output);
    let title = format!("{} output", style.username);
    let file_id = api.upload_file("output.png", png, Some(&title)).await?;

    // The uploaded file is eventually consistent on Slack's side; an image
    // block referencing it can be rejected until processing completes.
    let mut delay = IMAGE_POST_BACKOFF;
    for attempt in 1.. {
        match post_image_block(api, output, &style, &file_id).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_invalid_blocks() && attempt < IMAGE_POST_ATTEMPTS => {
                warn!(attempt, "image block rejected as invalid_blocks; retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn post_image_block(
    api: &SlackApi,
    output: &CommandOutput,
    style: &ReplyStyle,
    file_id: &str,
) -> Result<(), SlackError> {
    let mut blocks = Vec::new();
    let text = has_meaningful_text(output).then(|| rendered_text(output, style));
    if let Some(text) = &text {
        blocks.push(Block::section(text.clone()));
    }
    blocks.push(Block::image_file(file_id, "image output"));

    api.post_message(PostMessage {
        channel: output.reply.channel(),
        username: &style.username,
        icon_emoji: &style.icon_emoji,
        icon_url: &style.icon_url,
        thread_ts: style.post_as_reply.then(|| output.reply.timestamp()),
        reply_broadcast: reply_broadcast(output, style),
        blocks: Some(&blocks),
        text: text.as_deref(),
        ..Default::default()
    })
    .await
}
