use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Result code reported for a conversion that could not complete.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ErrorCode {
    DocumentOpen,
    DocumentParse,
    MissingRootNode,
    GeometryIndexOutOfRange,
    GeometryEmpty,
    WriteFailed,
}

/// Fatal conversion errors. Anything that can be worked around is reported
/// as an [`crate::convert::ImportIssue`] instead.
#[derive(Error, Debug)]
pub enum ColladaError {
    #[error("failed to open document {path}: {source}")]
    DocumentOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse document: {0}")]
    DocumentParse(String),

    #[error("document has no root scene node")]
    MissingRootNode,

    #[error("geometry '{geometry}': {semantic} index {index} is out of range ({len} elements)")]
    IndexOutOfRange {
        geometry: String,
        semantic: String,
        index: usize,
        len: usize,
    },

    #[error("geometry '{geometry}' declares a mesh without vertices or triangles")]
    EmptyGeometry { geometry: String },

    #[error("failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },
}

impl ColladaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ColladaError::DocumentOpen { .. } => ErrorCode::DocumentOpen,
            ColladaError::DocumentParse(_) => ErrorCode::DocumentParse,
            ColladaError::MissingRootNode => ErrorCode::MissingRootNode,
            ColladaError::IndexOutOfRange { .. } => ErrorCode::GeometryIndexOutOfRange,
            ColladaError::EmptyGeometry { .. } => ErrorCode::GeometryEmpty,
            ColladaError::Write { .. } => ErrorCode::WriteFailed,
        }
    }
}

/// Recover the error code from an `anyhow` chain, if a [`ColladaError`] is in it.
pub fn error_code_of(error: &anyhow::Error) -> Option<ErrorCode> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ColladaError>())
        .map(ColladaError::code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_wrapped_collada_error_when_reading_code_then_code_is_recovered() {
        let error = anyhow::Error::new(ColladaError::MissingRootNode).context("converting a.dae");
        assert_eq!(error_code_of(&error), Some(ErrorCode::MissingRootNode));
    }
}
