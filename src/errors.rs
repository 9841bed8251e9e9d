//! Error and diagnostic types shared by the builder and the importer.
//!
//! Fatal failures are returned as `Err`. Per-item failures become [`Diagnostic`]s
//! that are logged as they happen and handed back to the host in a report; the
//! graph built alongside them is always consistent.

use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Import failures that abort the whole import. No graph is returned.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("cannot open asset {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("scene {index} of asset {path} has no data")]
    MissingScene { path: String, index: usize },
}

/// Recoverable failures while building from configuration.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("node {node} already has a {kind} feature")]
    DuplicateFeature { node: String, kind: &'static str },
    #[error("missing resource {key}: {reason}")]
    MissingResource { key: String, reason: String },
    #[error("cannot create shader {key}: {source}")]
    Shader {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot create mesh {key}: {source}")]
    Mesh {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("serialization error: {0}")]
    Serialize(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A problem reported to the host while building or importing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    /// Log a warning and return it as a diagnostic.
    pub fn warn(message: impl Into<String>) -> Self {
        let message = message.into();
        log::warn!("{}", message);
        Self {
            severity: Severity::Warning,
            message,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("{}", message);
        Self {
            severity: Severity::Error,
            message,
        }
    }
}

impl From<BuildError> for Diagnostic {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::MissingResource { .. } => Diagnostic::warn(err.to_string()),
            _ => Diagnostic::error(err.to_string()),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "warning: {}", self.message),
            Severity::Error => write!(f, "error: {}", self.message),
        }
    }
}
