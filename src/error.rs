use std::io;

use thiserror::Error;

/// Failures raised by a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown event status `{0}`")]
    UnknownStatus(String),
    #[error("no stored event with id {0}")]
    NotFound(String),
    #[error("duplicate external id {0}")]
    DuplicateExternalId(String),
}

/// Reasons a raw adapter item is rejected before it can become an `Event`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("event has no name")]
    MissingName,
    #[error("event `{name}` has no parseable start date")]
    MissingStartDate { name: String },
    #[error("event `{name}` has no stable fields to derive an identity from")]
    NoStableIdentity { name: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to write config {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid source `{name}`: {reason}")]
    InvalidSource { name: String, reason: String },
    #[error("duplicate source name `{0}`")]
    DuplicateSource(String),
    #[error("invalid cleanup.{field}: {reason}")]
    InvalidCleanup { field: &'static str, reason: String },
}

