//! Error types for the asset pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::settings::OptionsError;

/// Errors raised by an asset's background or finalize phase
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode audio '{}': {source}", path.display())]
    Audio {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error("shader '{name}' failed: {log}")]
    Shader { name: String, log: String },

    #[error("asset job panicked: {0}")]
    Panicked(String),
}

impl AssetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssetError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Best-effort message from a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
