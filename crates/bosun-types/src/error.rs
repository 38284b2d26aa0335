//! Error type shared across the bosun crates.

/// Errors that can occur while bringing the bridge up.
///
/// Runtime command failures are not represented here: a failing command is
/// a *result* (an exit code plus stderr text relayed to chat), not an error.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration loading or validation failure. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem failure while reading the configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
