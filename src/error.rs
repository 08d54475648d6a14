use std::io;

/// Reasons a webhook body cannot be classified at all.
///
/// Both point at the hosting pipeline (no JSON body parsing, or a payload
/// that is not a Bitbucket push) rather than at a routing mismatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("request body was not parsed as a JSON object")]
    NotAnObject,

    #[error("JSON payload has no repository object")]
    MissingRepository,
}

/// Custom error type for bitbucket_hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Script execution failed: {0}")]
    ScriptExecutionFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use HookError
pub type Result<T> = std::result::Result<T, HookError>;
