//! Application-level errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("could not read {path}: {source}")]
    Io {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config {path}: {source}")]
    ConfigParse {
        path:   PathBuf,
        source: toml::de::Error,
    },

    #[error("config value out of range: {0}")]
    ConfigValue(String),

    #[error(transparent)]
    Scale(#[from] pitch_mapper::ConfigError),

    #[error("window error: {0}")]
    Window(#[from] minifb::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
