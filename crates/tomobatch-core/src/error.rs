use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TomoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing directory: {0}")]
    MissingDirectory(PathBuf),

    #[error("could not find any mdoc files")]
    NoMdocs,

    #[error("invalid mdoc {path}: {reason}")]
    InvalidMdoc { path: PathBuf, reason: String },

    #[error("invalid MRC file {path}: {reason}")]
    InvalidMrc { path: PathBuf, reason: String },

    #[error("invalid alignment file {path}: {reason}")]
    InvalidAln { path: PathBuf, reason: String },

    #[error("missing half average {0} (training needs every even/odd image)")]
    MissingHalf(PathBuf),

    #[error("`{0}` is not available on the system")]
    ToolNotFound(String),

    #[error("at least one GPU is required")]
    NoGpus,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TomoError>;
