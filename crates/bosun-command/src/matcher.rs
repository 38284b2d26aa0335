//! Keyword matching and command-template expansion.
//!
//! A [`Matcher`] binds one validated command definition to its runner. Its
//! keyword is pre-tokenized at startup; `build` turns a candidate argv into
//! the final command argv, or `None` when the keyword does not match.
//!
//! The single `*` in a keyword captures a contiguous argv slice. When the
//! command template is expanded, every captured token is escaped against
//! shell metacharacters before splicing, so user input can never smuggle an
//! operator into the executed command. The quoting of the `*` in the
//! template then decides the final shape: bare `*` splices the capture as
//! separate argv entries, `"*"` collapses it into one entry, and `'*'`
//! keeps the escaped text literal.

use std::sync::Arc;

use bosun_types::CommandSpec;

use crate::runner::CommandRunner;
use crate::tokenize;

pub struct Matcher {
    spec: Arc<CommandSpec>,
    keywords: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("spec", &self.spec)
            .field("keywords", &self.keywords)
            .finish_non_exhaustive()
    }
}

impl Matcher {
    /// Bind a definition to a runner.
    ///
    /// Returns `None` when the keyword cannot be tokenized as a plain word
    /// sequence (unbalanced quotes, embedded operators).
    pub fn new(spec: Arc<CommandSpec>, runner: Arc<dyn CommandRunner>) -> Option<Matcher> {
        let keywords = tokenize::tokenize_full(&spec.keyword)?;
        if keywords.is_empty() {
            return None;
        }
        Some(Matcher {
            spec,
            keywords,
            runner,
        })
    }

    pub fn spec(&self) -> &Arc<CommandSpec> {
        &self.spec
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Match `input` against the keyword and expand the command template.
    ///
    /// Returns the final argv, or `None` on mismatch or when the expanded
    /// template does not re-tokenize cleanly.
    pub fn build(&self, input: &[String]) -> Option<Vec<String>> {
        let has_wildcard = self.keywords.iter().any(|k| k == "*");

        if has_wildcard {
            // The wildcard may capture an empty slice.
            if input.len() + 1 < self.keywords.len() {
                return None;
            }
        } else if input.len() != self.keywords.len() {
            return None;
        }

        // Literal positions before the wildcard align with the input head,
        // positions after it align with the input tail; the wildcard takes
        // the slice in between.
        let mut offset: isize = 0;
        let mut wildcard: &[String] = &[];
        for (i, kw) in self.keywords.iter().enumerate() {
            if kw == "*" {
                let delta = input.len() as isize - self.keywords.len() as isize;
                let start = i;
                let end = (i as isize + delta + 1) as usize;
                wildcard = &input[start..end];
                offset = delta;
            } else {
                let idx = i as isize + offset;
                if idx < 0 || idx >= input.len() as isize || *kw != input[idx as usize] {
                    return None;
                }
            }
        }

        let mut line = self.spec.command.clone();
        if has_wildcard {
            let joined = wildcard
                .iter()
                .map(|t| escape_metachars(t))
                .collect::<Vec<_>>()
                .join(" ");
            line = line.replacen('*', &joined, 1);
        }

        tokenize::tokenize_full(&line).filter(|argv| !argv.is_empty())
    }
}

/// Backslash-escape everything the tokenizer treats specially, so captured
/// user input survives re-tokenization as literal text.
fn escape_metachars(token: &str) -> String {
    const ESCAPED: &[char] = &[
        '\\', ' ', '\t', '`', '(', ')', '"', '\'', ';', '&', '|', '<', '>',
    ];
    let mut out = String::with_capacity(token.len());
    for c in token.chars() {
        if ESCAPED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
