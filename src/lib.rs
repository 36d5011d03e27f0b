//! Trigger, monitor and verify Cloud Datastore exports to Cloud Storage.
//!
//! A schedule maps frequencies to entity kinds, an environment config maps
//! environments to deployments (project + bucket prefix). From those the crate
//! derives bucket names, builds export/import/status requests, and hands them
//! to a [`providers::DatastoreAdmin`] backend (gcloud CLI or REST API).

pub mod config;
pub mod error;
pub mod executor;
pub mod naming;
pub mod providers;
pub mod render;
pub mod request;
pub mod resolver;

pub use config::{BackupSchedule, Deployment, EnvironmentConfig};
pub use error::BackupError;
pub use naming::{bucket_name, BucketName};
pub use request::{
    build_export_request, build_import_request, build_status_query, BackupOptions,
};
pub use resolver::{resolve_deployments, resolve_kinds, Target, ValidationMode};
