//! Resolves frequencies to kinds and environments to deployments.

use crate::config::{BackupSchedule, Deployment, EnvironmentConfig};
use crate::error::{BackupError, Result};
use tracing::warn;

/// What to do when a frequency or environment cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Abort the invocation.
    #[default]
    Strict,
    /// Warn and carry on with nothing resolved.
    Lenient,
}

impl ValidationMode {
    /// Applies the policy to a resolution result. Only recoverable validation
    /// failures are downgraded; every other error passes through.
    pub fn apply<T: Default>(self, result: Result<T>) -> Result<T> {
        match result {
            Err(err) if self == ValidationMode::Lenient && err.is_recoverable() => {
                warn!("{}; continuing because --lenient is set", err);
                Ok(T::default())
            }
            other => other,
        }
    }
}

/// Where a command points: a configured environment, or a bare project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Environment(String),
    Project {
        project_id: String,
        bucket_prefix: Option<String>,
    },
}

impl Target {
    pub fn needs_environment_config(&self) -> bool {
        matches!(self, Target::Environment(_))
    }
}

pub fn resolve_kinds(schedule: &BackupSchedule, frequency: &str) -> Result<Vec<String>> {
    schedule
        .kinds(frequency)
        .map(<[String]>::to_vec)
        .ok_or_else(|| BackupError::UnknownFrequency {
            frequency: frequency.to_string(),
            known: schedule.frequencies(),
        })
}

pub fn resolve_deployments(config: &EnvironmentConfig, env: &str) -> Result<Vec<Deployment>> {
    let environment = config
        .environment(env)
        .ok_or_else(|| BackupError::UnknownEnvironment {
            environment: env.to_string(),
            known: config.environment_names(),
        })?;

    if environment.deployments.is_empty() {
        return Err(BackupError::NoDeployments {
            environment: env.to_string(),
        });
    }

    Ok(environment.deployments.clone())
}

/// Deployments for a target, in configuration order. A bare project yields
/// one synthetic deployment and never consults `config`.
pub fn resolve_target(config: Option<&EnvironmentConfig>, target: &Target) -> Result<Vec<Deployment>> {
    match target {
        Target::Project {
            project_id,
            bucket_prefix,
        } => Ok(vec![Deployment::new(project_id.clone(), bucket_prefix.clone())]),
        Target::Environment(env) => match config {
            Some(config) => resolve_deployments(config, env),
            None => Err(BackupError::UnknownEnvironment {
                environment: env.clone(),
                known: Vec::new(),
            }),
        },
    }
}
