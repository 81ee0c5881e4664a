//! Error types for varex.

use std::io;

/// Errors produced when writing a variable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VarError {
    /// The text does not decode to the variable's type.
    #[error("parse error: {0}")]
    Parse(String),

    /// The variable cannot be written (read-only or get-only).
    #[error("write unsupported")]
    WriteUnsupported,
}

impl VarError {
    /// Wrap any decoder error as a [`VarError::Parse`].
    pub fn parse(err: impl std::fmt::Display) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Errors produced by the varex framework.
#[derive(Debug, thiserror::Error)]
pub enum VarexError {
    #[error(transparent)]
    Var(#[from] VarError),

    #[error("config error: {0}")]
    Config(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, VarexError>;
