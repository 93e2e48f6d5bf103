use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Classification shared by every failure that can reach a dispatch boundary.
///
/// Retryable failures consume the retry budget; everything else goes
/// straight to the dead-letter sink.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Short machine-readable name recorded on dead letters.
    fn error_type(&self) -> &'static str;
}
