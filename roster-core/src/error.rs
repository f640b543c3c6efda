//! Error types for roster-core.

use thiserror::Error;

/// All errors that can arise from document encoding, layout mapping and merging.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// YAML serialization error (encode path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on decode: includes the store path and serde_yaml's line context.
    #[error("failed to parse document at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// An entity id or metadata field name that cannot be mapped to a file name.
    #[error("invalid {what} '{value}': {reason}")]
    InvalidName {
        what: &'static str,
        value: String,
        reason: &'static str,
    },

    /// A store path that matches no known document shape.
    #[error("unrecognised store path {path}")]
    UnknownPath { path: String },

    /// A document whose kind does not fit the path or the merge counterpart.
    #[error("document kind mismatch at {path}: expected {expected}, found {found}")]
    KindMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A logical value written to a field of a different shape.
    #[error("value does not fit logical field {field}")]
    FieldMismatch { field: String },

    /// A transform changed a path that was not part of its declared targets.
    #[error("write to {path} is outside the declared target paths")]
    OutOfScope { path: String },
}
