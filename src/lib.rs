use std::path::PathBuf;
use std::time::Duration;

use kube::error::ErrorResponse;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid ConsoleQuickStart manifest {path:?}: {source}")]
    InvalidQuickStart {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to read ConsoleQuickStart manifests from {path:?}: {source}")]
    QuickStartDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Reconcile did not finish within {0:?}")]
    Cancelled(Duration),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::InvalidQuickStart { .. } => "InvalidQuickStart",
            Error::QuickStartDirectory { .. } => "QuickStartDirectory",
            Error::Cancelled(_) => "Cancelled",
        }
    }

    /// An optimistic-concurrency failure; the next reconcile starts from fresh state
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::KubeError(kube::Error::Api(ErrorResponse { code: 409, .. }))
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::KubeError(kube::Error::Api(ErrorResponse { code: 404, .. }))
        )
    }
}

pub mod controllers;

pub use controllers::{OperatorEnvironment, State};

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// Owned and external CRDs
pub mod resources;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::KubeError(kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "boom".into(),
            reason: "Whatever".into(),
            code,
        }))
    }

    #[test]
    fn classifies_api_errors() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(409).is_not_found());
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_conflict());
        assert_eq!(api_error(500).metric_label(), "KubeError");
    }
}
