//! Backup dispatch, restore rendering, test restores and bucket listings.
//!
//! Deployments are always processed sequentially in configuration order so
//! that output stays attributable. Nothing here waits for an operation to
//! finish; the operator follows up with the printed status command.

use crate::config::{BackupSchedule, Deployment, EnvironmentConfig};
use crate::error::{BackupError, Result};
use crate::naming::{BucketName, TIMESTAMP_PLACEHOLDER};
use crate::providers::{DatastoreAdmin, Operation};
use crate::render::CommandLine;
use crate::request::{
    build_export_request, build_import_request, build_list_query, build_status_query,
    BackupOptions, ExportRequest, ImportRequest, StatusQuery,
};
use crate::resolver::{resolve_kinds, resolve_target, Target, ValidationMode};
use tracing::{info, warn};

/// Kinds and deployments a command operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    pub kinds: Vec<String>,
    pub deployments: Vec<Deployment>,
}

pub fn resolve(
    schedule: &BackupSchedule,
    config: Option<&EnvironmentConfig>,
    target: &Target,
    frequency: &str,
    mode: ValidationMode,
) -> Result<Resolved> {
    let kinds = mode.apply(resolve_kinds(schedule, frequency))?;
    let deployments = mode.apply(resolve_target(config, target))?;
    Ok(Resolved { kinds, deployments })
}

fn external(
    operation: &'static str,
    project_id: &str,
    bucket: &BucketName,
    err: anyhow::Error,
) -> BackupError {
    BackupError::ExternalOperation {
        operation,
        project_id: project_id.to_string(),
        bucket: bucket.to_string(),
        message: format!("{:#}", err),
    }
}

#[derive(Debug)]
pub enum ExportOutcome {
    /// The export was started; the operation is still running remotely.
    Dispatched(Operation),
    /// `--debug`: the command that would have run.
    Rendered(CommandLine),
    Failed(BackupError),
}

#[derive(Debug)]
pub struct ExportResult {
    pub project_id: String,
    pub bucket: BucketName,
    pub outcome: ExportOutcome,
    pub status_command: CommandLine,
}

impl ExportResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ExportOutcome::Failed(_))
    }
}

/// Builds every export request up front, so a malformed request fails the
/// whole invocation before anything is dispatched.
pub fn plan_backup(
    kinds: &[String],
    deployments: &[Deployment],
    frequency: &str,
    options: &BackupOptions,
) -> Result<Vec<ExportRequest>> {
    if kinds.is_empty() {
        return Err(BackupError::EmptyKindsList);
    }

    deployments
        .iter()
        .map(|deployment| {
            build_export_request(
                kinds,
                &deployment.project_id,
                &deployment.bucket_name(frequency),
                options,
            )
        })
        .collect()
}

pub async fn dispatch_backup(
    admin: &dyn DatastoreAdmin,
    requests: Vec<ExportRequest>,
    options: &BackupOptions,
) -> Vec<ExportResult> {
    let mut results = Vec::with_capacity(requests.len());

    for request in requests {
        let status_command = build_status_query(&request.project_id, options).to_command_line();

        let outcome = if options.debug {
            ExportOutcome::Rendered(request.to_command_line())
        } else {
            match admin.export(&request).await {
                Ok(operation) => {
                    info!(
                        "Export started for {}: {}",
                        request.project_id, operation.name
                    );
                    ExportOutcome::Dispatched(operation)
                }
                Err(err) => {
                    let err = external("export", &request.project_id, &request.bucket, err);
                    warn!("{}", err);
                    ExportOutcome::Failed(err)
                }
            }
        };

        results.push(ExportResult {
            project_id: request.project_id,
            bucket: request.bucket,
            outcome,
            status_command,
        });
    }

    results
}

/// Resolve, plan and dispatch one export per deployment.
pub async fn run_backup(
    admin: &dyn DatastoreAdmin,
    schedule: &BackupSchedule,
    config: Option<&EnvironmentConfig>,
    target: &Target,
    frequency: &str,
    options: &BackupOptions,
    mode: ValidationMode,
) -> Result<Vec<ExportResult>> {
    let resolved = resolve(schedule, config, target, frequency, mode)?;
    let requests = plan_backup(&resolved.kinds, &resolved.deployments, frequency, options)?;
    info!(
        "Backing up {} kinds ({}) across {} deployments",
        resolved.kinds.len(),
        frequency,
        requests.len()
    );
    Ok(dispatch_backup(admin, requests, options).await)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePlan {
    pub project_id: String,
    pub request: ImportRequest,
    pub status: StatusQuery,
}

/// Import requests for review only; nothing is executed. Without a timestamp
/// the placeholder token stands in for it.
pub fn restore_plan(
    kinds: &[String],
    deployments: &[Deployment],
    frequency: &str,
    timestamp: Option<&str>,
    options: &BackupOptions,
) -> Result<Vec<RestorePlan>> {
    if kinds.is_empty() {
        return Err(BackupError::EmptyKindsList);
    }
    let timestamp = timestamp.unwrap_or(TIMESTAMP_PLACEHOLDER);

    deployments
        .iter()
        .map(|deployment| {
            let request = build_import_request(
                kinds,
                &deployment.project_id,
                &deployment.bucket_name(frequency),
                timestamp,
                options,
            )?;
            Ok(RestorePlan {
                project_id: deployment.project_id.clone(),
                request,
                status: build_status_query(&deployment.project_id, options),
            })
        })
        .collect()
}

/// Bucket of `project_id` within the resolved deployments, falling back to the
/// default `{project_id}_backup` prefix for projects not in the configuration.
pub fn bucket_for_project(
    deployments: &[Deployment],
    project_id: &str,
    frequency: &str,
) -> BucketName {
    match deployments.iter().find(|d| d.project_id == project_id) {
        Some(deployment) => deployment.bucket_name(frequency),
        None => {
            warn!(
                "Project {} is not a configured deployment; using the default bucket prefix",
                project_id
            );
            Deployment::new(project_id, None).bucket_name(frequency)
        }
    }
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Dispatched(Operation),
    Rendered(CommandLine),
}

#[derive(Debug)]
pub struct TestRestoreOutput {
    pub restore: RestoreOutcome,
    pub operations: Vec<Operation>,
    pub status_command: CommandLine,
}

/// Imports exactly one kind from a backup, then lists the project's
/// operations so the import can be watched.
pub async fn test_restore(
    admin: &dyn DatastoreAdmin,
    kind: &str,
    project_id: &str,
    bucket: &BucketName,
    timestamp: &str,
    options: &BackupOptions,
) -> Result<TestRestoreOutput> {
    let kinds = [kind.to_string()];
    let request = build_import_request(&kinds, project_id, bucket, timestamp, options)?;
    let status = build_status_query(project_id, options);
    let status_command = status.to_command_line();

    if options.debug {
        return Ok(TestRestoreOutput {
            restore: RestoreOutcome::Rendered(request.to_command_line()),
            operations: Vec::new(),
            status_command,
        });
    }

    let operation = admin
        .import(&request)
        .await
        .map_err(|err| external("import", project_id, bucket, err))?;
    info!("Test restore of {} started: {}", kind, operation.name);

    let operations = admin
        .list_operations(&status)
        .await
        .map_err(|err| external("list operations", project_id, bucket, err))?;

    Ok(TestRestoreOutput {
        restore: RestoreOutcome::Dispatched(operation),
        operations,
        status_command,
    })
}

#[derive(Debug)]
pub struct Listing {
    pub project_id: String,
    pub bucket: BucketName,
    /// Entries with the `gs://{bucket}/` prefix stripped.
    pub entries: Result<Vec<String>>,
}

pub async fn list_backups(
    admin: &dyn DatastoreAdmin,
    deployments: &[Deployment],
    frequency: &str,
    options: &BackupOptions,
) -> Vec<Listing> {
    let mut listings = Vec::with_capacity(deployments.len());

    for deployment in deployments {
        let bucket = deployment.bucket_name(frequency);
        let query = build_list_query(&deployment.project_id, &bucket, options);

        let entries = admin
            .list_objects(&query)
            .await
            .map(|names| {
                names
                    .iter()
                    .map(|name| bucket.strip_listing_prefix(name).to_string())
                    .collect::<Vec<_>>()
            })
            .map_err(|err| external("list", &deployment.project_id, &bucket, err));

        if let Err(err) = &entries {
            warn!("{}", err);
        }

        listings.push(Listing {
            project_id: deployment.project_id.clone(),
            bucket,
            entries,
        });
    }

    listings
}
