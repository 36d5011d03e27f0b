//! Backup schedule and per-environment deployment configuration.
//!
//! Both files are JSON by default; a `.toml` extension switches the parser.
//! They are loaded once per invocation and never mutated afterwards.

use crate::error::{BackupError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_SCHEDULE_FILE: &str = "backup-schedule.json";

/// Frequency name (`daily`, `weekly`, ...) to the ordered kinds it backs up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupSchedule(BTreeMap<String, Vec<String>>);

impl BackupSchedule {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let schedule: Self = load_file(path)?;

        if schedule.0.keys().any(|frequency| frequency.trim().is_empty()) {
            return Err(BackupError::config(path, "frequency names must not be empty"));
        }
        for (frequency, kinds) in &schedule.0 {
            if kinds.iter().any(|kind| kind.trim().is_empty()) {
                return Err(BackupError::config(
                    path,
                    format!("frequency {} lists an empty kind name", frequency),
                ));
            }
        }

        debug!(
            "Loaded backup schedule {} ({} frequencies)",
            path.display(),
            schedule.0.len()
        );
        Ok(schedule)
    }

    pub fn kinds(&self, frequency: &str) -> Option<&[String]> {
        self.0.get(frequency).map(Vec::as_slice)
    }

    pub fn frequencies(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

impl<F, K> FromIterator<(F, Vec<K>)> for BackupSchedule
where
    F: Into<String>,
    K: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (F, Vec<K>)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(frequency, kinds)| {
                    let kinds: Vec<String> = kinds.into_iter().map(Into::into).collect();
                    (frequency.into(), kinds)
                })
                .collect(),
        )
    }
}

/// One target project and the bucket prefix its exports land under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(
        rename = "backupBucketPrefix",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub backup_bucket_prefix: Option<String>,
}

impl Deployment {
    pub fn new(project_id: impl Into<String>, backup_bucket_prefix: Option<String>) -> Self {
        Self {
            project_id: project_id.into(),
            backup_bucket_prefix,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

/// Environment name (`prod`, `staging`, ...) to its deployments, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentConfig(BTreeMap<String, Environment>);

impl EnvironmentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = load_file(path)?;

        for (name, environment) in &config.0 {
            for deployment in &environment.deployments {
                if deployment.project_id.trim().is_empty() {
                    return Err(BackupError::config(
                        path,
                        format!("environment {} has a deployment with an empty projectId", name),
                    ));
                }
                if let Some(prefix) = &deployment.backup_bucket_prefix {
                    if prefix.trim().is_empty() {
                        return Err(BackupError::config(
                            path,
                            format!(
                                "deployment {} in environment {} has an empty backupBucketPrefix",
                                deployment.project_id, name
                            ),
                        ));
                    }
                }
            }
        }

        debug!(
            "Loaded environment config {} ({} environments)",
            path.display(),
            config.0.len()
        );
        Ok(config)
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.0.get(name)
    }

    pub fn environment_names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

impl<E: Into<String>> FromIterator<(E, Vec<Deployment>)> for EnvironmentConfig {
    fn from_iter<I: IntoIterator<Item = (E, Vec<Deployment>)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, deployments)| (name.into(), Environment { deployments }))
                .collect(),
        )
    }
}

fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| BackupError::ConfigLoad {
        path: path.to_path_buf(),
        source: Box::new(e),
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    if is_toml {
        toml::from_str(&content).map_err(|e| BackupError::ConfigLoad {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
    } else {
        serde_json::from_str(&content).map_err(|e| BackupError::ConfigLoad {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
    }
}
