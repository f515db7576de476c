//! Roleplay test harness for text generation backends
mod card;
mod chat_log;
mod format;
pub mod logging;
mod prompt;
pub mod runner;
pub mod suite;

pub use card::CharacterCard;
pub use chat_log::{ChatLog, ChatMessage};
pub use format::{InstructFormat, RoleplayFormat};
pub use prompt::{InstructPrompt, RenderedPrompt, RoleplayPrompt};

use std::path::{Path, PathBuf};
use text_generation_harness_client::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("Invalid test suite {0}: {1}")]
    Suite(String, String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

pub(crate) fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = read_file(path)?;
    serde_json::from_str(&content).map_err(|source| HarnessError::Json {
        path: path.to_path_buf(),
        source,
    })
}
