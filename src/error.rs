//! Error types for the dataflow code generator

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for graph construction and generation
pub type CodegenResult<T> = Result<T, CodegenError>;

/// Generation errors
///
/// Every variant aborts the run: the generator is a batch tool and never
/// returns partial results.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Topology error: {message}")]
    Topology { message: String },

    #[error("Constraint violation ({target}): {message}")]
    Constraint { target: String, message: String },

    #[error("Splice error in '{operator}': {message}")]
    Splice { operator: String, message: String },

    #[error("Template error ({template}): {message}")]
    Template { template: String, message: String },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CodegenError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        CodegenError::Configuration { message: msg.into() }
    }

    pub fn topology(msg: impl Into<String>) -> Self {
        CodegenError::Topology { message: msg.into() }
    }

    pub fn constraint(target: impl Into<String>, msg: impl Into<String>) -> Self {
        CodegenError::Constraint {
            target: target.into(),
            message: msg.into(),
        }
    }

    pub fn splice(operator: impl Into<String>, msg: impl Into<String>) -> Self {
        CodegenError::Splice {
            operator: operator.into(),
            message: msg.into(),
        }
    }

    pub fn template(template: impl Into<String>, msg: impl Into<String>) -> Self {
        CodegenError::Template {
            template: template.into(),
            message: msg.into(),
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CodegenError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
