//! TOML configuration model and fatal startup validation.
//!
//! The bridge loads a single `config.toml` (path overridable on the command
//! line), validates it, and compiles the `[[commands]]` table array into
//! [`CommandSpec`]s with per-command styling merged over the top-level
//! styling. Every validation failure here is fatal: a bot that silently
//! ignores a miswritten command definition is worse than one that refuses
//! to start.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::BridgeError;
use crate::reply::{ReplyStyle, ReplyStyleOverrides};

/// Maximum config file size in bytes. Larger files are rejected before
/// parsing.
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Which backend executes a matched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// Local subprocess in its own process group.
    Exec,
    /// `docker compose exec` into a running service container.
    Compose,
    /// Outbound webhook call.
    Http,
}

impl RunnerKind {
    /// Normalize the config-file spelling. Empty means `exec`.
    pub fn parse(raw: &str) -> Option<RunnerKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "exec" => Some(RunnerKind::Exec),
            "compose" => Some(RunnerKind::Compose),
            "http" => Some(RunnerKind::Http),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerKind::Exec => write!(f, "exec"),
            RunnerKind::Compose => write!(f, "compose"),
            RunnerKind::Http => write!(f, "http"),
        }
    }
}

/// One `[[commands]]` entry as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandDef {
    /// Trigger pattern; literal words plus at most one `*` wildcard.
    pub keyword: String,
    /// Command template; the first `*` receives the wildcard capture.
    pub command: String,
    /// One of "", "exec", "compose", "http".
    pub runner: String,
    /// Per-command timeout in seconds; 0 disables the deadline.
    pub timeout: u64,
    /// HTTP method (http runner only; defaults to POST at execution).
    pub method: String,
    /// Webhook URL (http runner only; required there).
    pub url: String,
    /// HTTP headers (http runner only); values may contain `*`.
    pub headers: BTreeMap<String, String>,
    /// HTTP request body (http runner only); may contain `*`.
    pub body: String,
    #[serde(flatten)]
    pub style: ReplyStyleOverrides,
}

/// A validated command definition with resolved runner and merged styling.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub keyword: String,
    pub command: String,
    pub runner: RunnerKind,
    pub timeout: u64,
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub style: Arc<ReplyStyle>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_workers: usize,
    pub slack_bot_token: String,
    pub slack_app_token: String,
    pub allow_unsafe_open_access: bool,
    pub accept_reminder: bool,
    pub accept_bot_message: bool,
    pub accept_thread_message: bool,
    pub allowed_user_ids: Vec<String>,
    pub allowed_channel_ids: Vec<String>,
    #[serde(flatten)]
    pub style: ReplyStyle,
    pub commands: Vec<CommandDef>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: 1,
            slack_bot_token: String::new(),
            slack_app_token: String::new(),
            allow_unsafe_open_access: false,
            accept_reminder: false,
            accept_bot_message: false,
            accept_thread_message: false,
            allowed_user_ids: Vec::new(),
            allowed_channel_ids: Vec::new(),
            style: ReplyStyle::default(),
            commands: Vec::new(),
        }
    }
}

impl Config {
    /// Validate the configuration and compile the command table.
    ///
    /// Returns the validated [`CommandSpec`]s in declaration order; the
    /// matcher evaluates them first-match-wins, so specific definitions
    /// must be declared before wildcard ones.
    pub fn validate(&self) -> Result<Vec<CommandSpec>, BridgeError> {
        if self.num_workers < 1 {
            return Err(BridgeError::Config(format!(
                "num_workers must be >= 1 (got {})",
                self.num_workers
            )));
        }
        if self.allowed_user_ids.is_empty()
            && self.allowed_channel_ids.is_empty()
            && !self.allow_unsafe_open_access
        {
            return Err(BridgeError::Config(
                "open access is disabled by default: set allowed_user_ids and/or \
                 allowed_channel_ids, or set allow_unsafe_open_access=true"
                    .into(),
            ));
        }

        let mut specs = Vec::with_capacity(self.commands.len());
        for def in &self.commands {
            specs.push(self.compile(def)?);
        }
        Ok(specs)
    }

    fn compile(&self, def: &CommandDef) -> Result<CommandSpec, BridgeError> {
        if def.keyword.trim().is_empty() {
            return Err(BridgeError::Config("keyword must not be empty".into()));
        }
        if def.keyword.matches('*').count() > 1 {
            return Err(BridgeError::Config(format!(
                "keyword must contain at most one '*': {}",
                def.keyword
            )));
        }
        if def.command.starts_with('*') {
            return Err(BridgeError::Config(format!(
                "command field must not start with '*': {}",
                def.command
            )));
        }
        if def.command.matches('*').count() > 1 {
            return Err(BridgeError::Config(format!(
                "command must contain at most one '*': {}",
                def.command
            )));
        }
        let runner = RunnerKind::parse(&def.runner).ok_or_else(|| {
            BridgeError::Config(format!(
                "unknown runner '{}' for keyword '{}'",
                def.runner, def.keyword
            ))
        })?;
        if runner == RunnerKind::Http && def.url.trim().is_empty() {
            return Err(BridgeError::Config(format!(
                "url is required for http runner (keyword '{}')",
                def.keyword
            )));
        }

        Ok(CommandSpec {
            keyword: def.keyword.clone(),
            command: def.command.clone(),
            runner,
            timeout: def.timeout,
            method: def.method.clone(),
            url: def.url.clone(),
            headers: def.headers.clone(),
            body: def.body.clone(),
            style: Arc::new(def.style.merge(&self.style)),
        })
    }
}

/// Read and parse the configuration file.
pub fn load_config(path: &Path) -> Result<Config, BridgeError> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > MAX_CONFIG_FILE_SIZE {
        return Err(BridgeError::Config(format!(
            "config file too large: {} bytes (max {})",
            meta.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))
}
