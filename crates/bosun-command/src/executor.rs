//! Executor workers: drain the request queue, run matched commands, feed
//! the output queue.
//!
//! The ordering contract per input is strict: one `spawned` marker, then
//! all payloads, then one `finished` marker -- guaranteed by running every
//! command and flushing both output writers inside the worker before the
//! `finished` send. Inputs whose first command matches no keyword produce
//! nothing at all; committing to a reply only after the first keyword match
//! is what keeps casual conversation from triggering error spam.

use std::sync::Arc;
use std::time::Duration;

use bosun_types::{BridgeError, CommandSpec};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::matcher::Matcher;
use crate::output::OutputWriter;
use crate::parser::{self, ParseError, ParsedCommand};
use crate::queue::{CommandInput, CommandOutput};
use crate::runner::{CommandRunner, RunRequest, EXIT_NOT_FOUND, EXIT_PARSE_ERROR};

/// Build the matcher set from validated specs, in declaration order.
///
/// `runner_for` supplies the backend per definition; the caller decides
/// sharing (one exec runner and one lazy compose runner process-wide, one
/// HTTP runner per definition).
pub fn build_matchers(
    specs: Vec<CommandSpec>,
    runner_for: impl Fn(&Arc<CommandSpec>) -> Arc<dyn CommandRunner>,
) -> Result<Arc<[Matcher]>, BridgeError> {
    let mut matchers = Vec::with_capacity(specs.len());
    for spec in specs {
        let spec = Arc::new(spec);
        let runner = runner_for(&spec);
        let matcher = Matcher::new(spec.clone(), runner).ok_or_else(|| {
            BridgeError::Config(format!("keyword cannot be tokenized: {}", spec.keyword))
        })?;
        matchers.push(matcher);
    }
    Ok(matchers.into())
}

/// One executor worker; run `num_workers` of these concurrently.
///
/// Returns when the request channel closes.
pub async fn run_worker(
    requests: async_channel::Receiver<CommandInput>,
    outputs: mpsc::Sender<CommandOutput>,
    matchers: Arc<[Matcher]>,
) {
    while let Ok(input) = requests.recv().await {
        handle_input(&input, &matchers, &outputs).await;
    }
}

async fn handle_input(
    input: &CommandInput,
    matchers: &[Matcher],
    outputs: &mpsc::Sender<CommandOutput>,
) {
    let (command_line, stdin_text) = split_input(&input.text);
    let (cmds, parse_err) = parser::parse_commands(command_line);
    if cmds.is_empty() {
        return;
    }

    let mut ret = 0;
    let mut spawned = false;
    for (i, cmd) in cmds.iter().enumerate() {
        if should_skip(cmd, ret) {
            continue;
        }
        let Some((matcher, argv)) = find_match(matchers, &cmd.argv) else {
            if i == 0 {
                // No keyword matched the first command: treat the whole
                // input as chat, even when a parse error is pending.
                return;
            }
            report_not_found(outputs, input, cmd).await;
            ret = EXIT_NOT_FOUND;
            continue;
        };
        if i == 0 {
            let _ = outputs.send(CommandOutput::spawned(input.reply.clone())).await;
            spawned = true;
        }
        if let Some(err) = &parse_err {
            // The line matched a keyword but had trailing garbage; report
            // instead of running a half-understood pipeline.
            report_parse_error(outputs, input, err).await;
            ret = EXIT_PARSE_ERROR;
            break;
        }
        debug!(argv = ?argv, keyword = %matcher.spec().keyword, "executing command");
        ret = run_matched(matcher, &argv, stdin_text, input, outputs).await;
    }

    if spawned {
        let _ = outputs
            .send(CommandOutput::finished(input.reply.clone(), ret))
            .await;
    }
}

/// First line is the command, the rest becomes stdin.
fn split_input(text: &str) -> (&str, &str) {
    match text.split_once('\n') {
        Some((line, stdin)) => (line, stdin),
        None => (text, ""),
    }
}

fn should_skip(cmd: &ParsedCommand, ret: i32) -> bool {
    (ret == 0 && cmd.skip_if_succeeded) || (ret != 0 && cmd.skip_if_failed)
}

fn find_match<'a>(matchers: &'a [Matcher], argv: &[String]) -> Option<(&'a Matcher, Vec<String>)> {
    matchers.iter().find_map(|m| {
        m.build(argv)
            .filter(|argv| !argv.is_empty())
            .map(|argv| (m, argv))
    })
}

async fn report_not_found(
    outputs: &mpsc::Sender<CommandOutput>,
    input: &CommandInput,
    cmd: &ParsedCommand,
) {
    let stderr = OutputWriter::stderr(outputs.clone(), input.reply.clone(), None);
    stderr
        .write(format!("コマンドが見つかりませんでした: {}", cmd.argv.join(" ")).as_bytes())
        .await;
    stderr.flush().await;
}

async fn report_parse_error(
    outputs: &mpsc::Sender<CommandOutput>,
    input: &CommandInput,
    err: &ParseError,
) {
    let stderr = OutputWriter::stderr(outputs.clone(), input.reply.clone(), None);
    stderr.write(err.to_string().as_bytes()).await;
    stderr.flush().await;
}

async fn run_matched(
    matcher: &Matcher,
    argv: &[String],
    stdin_text: &str,
    input: &CommandInput,
    outputs: &mpsc::Sender<CommandOutput>,
) -> i32 {
    let spec = matcher.spec();
    let timeout = (spec.timeout > 0).then(|| Duration::from_secs(spec.timeout));
    let cancel = CancellationToken::new();
    let stdout = OutputWriter::stdout(outputs.clone(), input.reply.clone(), Some(spec.style.clone()));
    let stderr = OutputWriter::stderr(outputs.clone(), input.reply.clone(), Some(spec.style.clone()));

    let ret = matcher
        .runner()
        .run(RunRequest {
            argv,
            stdin: stdin_text,
            stdout: &stdout,
            stderr: &stderr,
            timeout,
            cancel: cancel.clone(),
        })
        .await;

    stdout.flush().await;
    stderr.flush().await;
    cancel.cancel();
    ret
}
