use std::path::PathBuf;
use thiserror::Error;

/// Invalid run setup, detected before the optimizer is contacted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate program name `{0}` in improve input")]
    DuplicateName(String),
    #[error("no backend named `{0}` is registered")]
    UnknownBackend(String),
    #[error("path does not exist: {}", .0.display())]
    MissingPath(PathBuf),
}
