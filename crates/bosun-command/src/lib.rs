//! The bosun command pipeline.
//!
//! A [`CommandInput`] (one normalized chat message) flows through:
//!
//! 1. [`parser`] -- splits the first line into argv sequences joined by
//!    `;` / `&&` / `||`.
//! 2. [`matcher`] -- finds the first configured definition whose keyword
//!    matches, expands the command template.
//! 3. [`executor`] -- N workers run the matched commands through a
//!    [`runner::CommandRunner`] backend with timeouts and stdin piping.
//! 4. [`output`] -- stdout/stderr bytes are time-batched and classified
//!    into text and sixel-image [`CommandOutput`]s for the chat writer.

pub mod executor;
pub mod matcher;
pub mod output;
pub mod parser;
pub mod queue;
pub mod runner;
pub mod runner_compose;
pub mod runner_http;
pub mod sixel;
pub mod tokenize;

pub use executor::{build_matchers, run_worker};
pub use matcher::Matcher;
pub use output::OutputWriter;
pub use queue::{CommandInput, CommandOutput};
pub use runner::{
    CommandRunner, ExecRunner, RunRequest, EXIT_NOT_FOUND, EXIT_PARSE_ERROR, EXIT_TERMINATED,
};
pub use runner_compose::ComposeRunner;
pub use runner_http::HttpRunner;
