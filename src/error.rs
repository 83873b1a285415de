use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Error, Debug)]
pub enum MidiError {
    #[error("MIDI subsystem unavailable: {0}")]
    Init(String),

    #[error("could not connect to {port}: {message}")]
    Connect { port: String, message: String },
}

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("request to {endpoint} failed: {message}")]
    Http { endpoint: String, message: String },

    #[error("unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reference data has no {0}")]
    Missing(String),

    #[error("tracking worker is gone")]
    WorkerGone,
}

/// Errors raised while parsing note and chord names.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TheoryError {
    #[error("unknown note name `{0}`")]
    UnknownNote(String),

    #[error("unknown chord quality `{0}`")]
    UnknownQuality(String),
}
