use thiserror::Error;

use crate::edit::PatchError;

#[derive(Error, Debug)]
pub enum TrailerError {
    #[error("a JSON trailer marker already exists at offset {offset}")]
    AlreadyPresent { offset: usize },

    #[error("failed to serialize trailer document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Patch(#[from] PatchError),
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("trailer document must be a JSON object")]
    NotAnObject,

    #[error("'{key}' is present but is not an array")]
    NotAnArray { key: String },

    #[error("{kind} index {index} out of range (have {len})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    #[error("invalid JSON: {0}")]
    Syntax(#[from] serde_json::Error),
}
