//! Shellword tokenization with stop-position reporting.
//!
//! The command-line parser needs to know *where* tokenization stopped so it
//! can recognize the pipeline operators (`;`, `&&`, `||`) that follow, which
//! is why this scanner reports a byte offset instead of failing outright on
//! shell metacharacters.
//!
//! Quoting rules: single quotes are fully literal; everywhere else a
//! backslash escapes the next character (including metacharacters and
//! whitespace). Quotes may produce empty tokens (`""`). Scanning stops,
//! without consuming it, at the first unquoted metacharacter.

/// Characters that end the scan when they appear unquoted and unescaped.
///
/// `;`, `&` and `|` start pipeline operators; the rest are shell syntax the
/// bridge refuses to forward to a subprocess (redirection, subshells,
/// command substitution).
const METACHARS: &[u8] = b";&|<>()`";

/// Result of scanning a line prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    /// Tokens produced before the scan ended.
    pub tokens: Vec<String>,
    /// Byte offset of the metacharacter that stopped the scan, or `None`
    /// when the whole line was consumed.
    pub stop: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("unterminated quote")]
    UnterminatedQuote,
    #[error("trailing escape character")]
    TrailingEscape,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Tokenize `line` up to the first unquoted metacharacter.
pub fn tokenize_prefix(line: &str) -> Result<Prefix, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // Distinguishes "no token" from an explicit empty token such as "".
    let mut in_token = false;
    let mut quote = Quote::None;
    let mut stop = None;

    let mut chars = line.char_indices();
    while let Some((i, c)) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some((_, escaped)) => current.push(escaped),
                    None => return Err(TokenizeError::TrailingEscape),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => {
                        current.push(escaped);
                        in_token = true;
                    }
                    None => return Err(TokenizeError::TrailingEscape),
                },
                '\'' => {
                    quote = Quote::Single;
                    in_token = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_token = true;
                }
                ' ' | '\t' => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ if c.is_ascii() && METACHARS.contains(&(c as u8)) => {
                    stop = Some(i);
                    break;
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err(TokenizeError::UnterminatedQuote);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(Prefix { tokens, stop })
}

/// Tokenize a full line, or `None` when it cannot be consumed entirely.
///
/// Used for keyword definitions and expanded command templates, where any
/// unquoted metacharacter disqualifies the line.
pub fn tokenize_full(line: &str) -> Option<Vec<String>> {
    match tokenize_prefix(line) {
        Ok(Prefix { tokens, stop: None }) => Some(tokens),
        _ => None,
    }
}
