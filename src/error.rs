//! Error taxonomy for schedule resolution, request building and dispatch.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Frequency value ({frequency}) unknown! Known frequencies: {}", .known.join(", "))]
    UnknownFrequency {
        frequency: String,
        known: Vec<String>,
    },

    #[error("Environment ({environment}) unknown! Known environments: {}", .known.join(", "))]
    UnknownEnvironment {
        environment: String,
        known: Vec<String>,
    },

    #[error("Environment ({environment}) has no deployments configured")]
    NoDeployments { environment: String },

    #[error("Refusing to build a request with an empty list of kinds")]
    EmptyKindsList,

    #[error("A backup timestamp is required")]
    MissingTimestamp,

    #[error("Failed to load configuration from {}: {source}", .path.display())]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{operation} failed for project {project_id} (bucket {bucket}): {message}")]
    ExternalOperation {
        operation: &'static str,
        project_id: String,
        bucket: String,
        message: String,
    },
}

impl BackupError {
    /// Validation failures that `--lenient` may downgrade to a warning.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BackupError::UnknownFrequency { .. }
                | BackupError::UnknownEnvironment { .. }
                | BackupError::NoDeployments { .. }
        )
    }

    pub(crate) fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        BackupError::ConfigLoad {
            path: path.into(),
            source: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
