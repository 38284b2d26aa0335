//! Command-line splitting on the pipeline operators `;`, `&&` and `||`.

use crate::tokenize::{self, Prefix};

/// One argv sequence plus its short-circuit behavior.
///
/// The executor evaluates `skip_if_succeeded` / `skip_if_failed` against the
/// running exit status: `&&` skips after a failure, `||` skips after a
/// success, `;` never skips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub argv: Vec<String>,
    pub skip_if_succeeded: bool,
    pub skip_if_failed: bool,
}

impl ParsedCommand {
    fn new(op: Option<&str>, argv: Vec<String>) -> Self {
        Self {
            argv,
            skip_if_succeeded: op == Some("||"),
            skip_if_failed: op == Some("&&"),
        }
    }
}

/// A command line the tokenizer could not digest.
///
/// This is chat-facing output, not an internal failure: the executor relays
/// the message to the user's thread with exit code 2.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Parse error near `{near}'")]
pub struct ParseError {
    pub near: String,
}

/// Operators checked, in order, at each tokenizer stop position.
const OPERATORS: [&str; 3] = [";", "&&", "||"];

/// Split a line into commands joined by `;` / `&&` / `||`.
///
/// Commands parsed before the offending position are returned alongside the
/// error, so a line like `date;(ls)` still reports what it understood.
pub fn parse_line(line: &str) -> (Vec<ParsedCommand>, Option<ParseError>) {
    let mut cmds = Vec::new();
    let mut rest = line;
    let mut prev_op: Option<&str> = None;

    loop {
        let (tokens, stop) = match tokenize::tokenize_prefix(rest) {
            Ok(Prefix { tokens, stop }) if !tokens.is_empty() => (tokens, stop),
            // No tokens: either we ran off the end after an operator, or the
            // next bytes are something we refuse to parse.
            _ => {
                let near = prev_op
                    .map(str::to_owned)
                    .unwrap_or_else(|| rest.chars().take(2).collect());
                return (cmds, Some(ParseError { near }));
            }
        };
        cmds.push(ParsedCommand::new(prev_op, tokens));

        let Some(stop) = stop else {
            return (cmds, None);
        };
        let tail = &rest[stop..];
        prev_op = OPERATORS.iter().find(|op| tail.starts_with(**op)).copied();
        // An unrecognized operator leaves `rest` pointing at the offending
        // byte; the next iteration then fails with a two-character preview.
        rest = &rest[stop + prev_op.map_or(0, str::len)..];
    }
}

/// [`parse_line`] plus the best-effort fallback: when parsing yields nothing
/// at all (an unterminated quote, usually) but the line has words, run them
/// as a single command.
pub fn parse_commands(line: &str) -> (Vec<ParsedCommand>, Option<ParseError>) {
    let (mut cmds, err) = parse_line(line);
    if cmds.is_empty() {
        let fields: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        if !fields.is_empty() {
            cmds.push(ParsedCommand::new(None, fields));
        }
    }
    (cmds, err)
}
