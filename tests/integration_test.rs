// Integration tests for datastore-backup

use async_trait::async_trait;
use datastore_backup::executor::{list_backups, restore_plan, run_backup, ExportOutcome};
use datastore_backup::providers::{DatastoreAdmin, Operation};
use datastore_backup::request::{ExportRequest, ImportRequest, ListObjectsQuery, StatusQuery};
use datastore_backup::{
    resolve_deployments, BackupError, BackupOptions, BackupSchedule, EnvironmentConfig, Target,
    ValidationMode,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

/// Test helper to write a schedule and an environment config to disk
fn create_config_files() -> Result<(TempDir, PathBuf, PathBuf), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;

    let schedule_path = temp_dir.path().join("backup-schedule.json");
    fs::write(
        &schedule_path,
        r#"{ "daily": ["Person", "Account"], "weekly": ["Person", "Account", "AuditLog"] }"#,
    )?;

    let config_path = temp_dir.path().join("config.json");
    fs::write(
        &config_path,
        r#"{
  "prod": {
    "deployments": [
      { "projectId": "acme-prod-us", "backupBucketPrefix": "acme-us-backups" },
      { "projectId": "acme-prod-eu", "backupBucketPrefix": "acme-eu-backups" },
      { "projectId": "acme-prod-asia", "backupBucketPrefix": "acme-asia-backups" }
    ]
  },
  "staging": {
    "deployments": [
      { "projectId": "acme-staging", "backupBucketPrefix": "acme-staging-backups" }
    ]
  }
}"#,
    )?;

    Ok((temp_dir, schedule_path, config_path))
}

#[derive(Default)]
struct FakeAdmin {
    exports: Mutex<Vec<String>>,
}

#[async_trait]
impl DatastoreAdmin for FakeAdmin {
    async fn export(&self, request: &ExportRequest) -> anyhow::Result<Operation> {
        self.exports
            .lock()
            .unwrap()
            .push(request.destination_uri());
        Ok(Operation {
            name: format!("projects/{}/operations/export-1", request.project_id),
            ..Default::default()
        })
    }

    async fn import(&self, _request: &ImportRequest) -> anyhow::Result<Operation> {
        anyhow::bail!("imports are not expected here")
    }

    async fn list_operations(&self, _query: &StatusQuery) -> anyhow::Result<Vec<Operation>> {
        Ok(Vec::new())
    }

    async fn list_objects(&self, query: &ListObjectsQuery) -> anyhow::Result<Vec<String>> {
        if query.project_id == "acme-prod-eu" {
            anyhow::bail!("AccessDeniedException: 403");
        }
        Ok(vec![
            format!("{}2019-08-20T19:18:29_11111/", query.bucket.listing_prefix()),
            format!("{}2019-08-21T19:18:29_50232/", query.bucket.listing_prefix()),
        ])
    }
}

/// Test configuration files load and resolve in file order
#[test]
fn test_config_files_load() {
    let (_temp_dir, schedule_path, config_path) = create_config_files().unwrap();

    let schedule = BackupSchedule::load(&schedule_path).unwrap();
    let config = EnvironmentConfig::load(&config_path).unwrap();

    assert_eq!(schedule.kinds("weekly").unwrap().len(), 3);
    let projects: Vec<String> = resolve_deployments(&config, "prod")
        .unwrap()
        .into_iter()
        .map(|d| d.project_id)
        .collect();
    assert_eq!(projects, vec!["acme-prod-us", "acme-prod-eu", "acme-prod-asia"]);
}

/// Test a backup of a three-deployment environment reports in configuration order
#[tokio::test]
async fn test_backup_environment() {
    let (_temp_dir, schedule_path, config_path) = create_config_files().unwrap();
    let schedule = BackupSchedule::load(&schedule_path).unwrap();
    let config = EnvironmentConfig::load(&config_path).unwrap();
    let admin = FakeAdmin::default();

    let results = run_backup(
        &admin,
        &schedule,
        Some(&config),
        &Target::Environment("prod".to_string()),
        "daily",
        &BackupOptions::with_account("ops@example.com"),
        ValidationMode::Strict,
    )
    .await
    .unwrap();

    assert_eq!(
        *admin.exports.lock().unwrap(),
        vec![
            "gs://acme-us-backups_daily",
            "gs://acme-eu-backups_daily",
            "gs://acme-asia-backups_daily",
        ]
    );

    let status_lines: Vec<String> = results
        .iter()
        .map(|r| r.status_command.to_string())
        .collect();
    assert_eq!(
        status_lines,
        vec![
            "gcloud datastore operations list --project acme-prod-us --account ops@example.com",
            "gcloud datastore operations list --project acme-prod-eu --account ops@example.com",
            "gcloud datastore operations list --project acme-prod-asia --account ops@example.com",
        ]
    );
    assert!(results
        .iter()
        .all(|r| matches!(r.outcome, ExportOutcome::Dispatched(_))));
}

/// Test an unknown environment aborts before any export in strict mode
#[tokio::test]
async fn test_unknown_environment_strict() {
    let (_temp_dir, schedule_path, config_path) = create_config_files().unwrap();
    let schedule = BackupSchedule::load(&schedule_path).unwrap();
    let config = EnvironmentConfig::load(&config_path).unwrap();
    let admin = FakeAdmin::default();

    let err = run_backup(
        &admin,
        &schedule,
        Some(&config),
        &Target::Environment("qa".to_string()),
        "daily",
        &BackupOptions::default(),
        ValidationMode::Strict,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BackupError::UnknownEnvironment { .. }));
    assert!(admin.exports.lock().unwrap().is_empty());
}

/// Test an unknown environment dispatches nothing in lenient mode
#[tokio::test]
async fn test_unknown_environment_lenient() {
    let (_temp_dir, schedule_path, config_path) = create_config_files().unwrap();
    let schedule = BackupSchedule::load(&schedule_path).unwrap();
    let config = EnvironmentConfig::load(&config_path).unwrap();
    let admin = FakeAdmin::default();

    let results = run_backup(
        &admin,
        &schedule,
        Some(&config),
        &Target::Environment("qa".to_string()),
        "daily",
        &BackupOptions::default(),
        ValidationMode::Lenient,
    )
    .await
    .unwrap();

    assert!(results.is_empty());
}

/// Test restore commands are generated for every deployment
#[test]
fn test_restore_commands() {
    let (_temp_dir, schedule_path, config_path) = create_config_files().unwrap();
    let schedule = BackupSchedule::load(&schedule_path).unwrap();
    let config = EnvironmentConfig::load(&config_path).unwrap();
    let deployments = resolve_deployments(&config, "staging").unwrap();

    let plans = restore_plan(
        schedule.kinds("daily").unwrap(),
        &deployments,
        "daily",
        Some("2019-08-21T19:18:29_50232"),
        &BackupOptions::default(),
    )
    .unwrap();

    assert_eq!(plans.len(), 1);
    assert_eq!(
        plans[0].request.to_command_line().to_string(),
        "gcloud datastore import --project acme-staging --kinds=\"Person,Account\" --async \
         gs://acme-staging-backups_daily/2019-08-21T19:18:29_50232/2019-08-21T19:18:29_50232.overall_export_metadata"
    );
}

/// Test listing keeps going past a failing deployment
#[tokio::test]
async fn test_list_backups_per_deployment() {
    let (_temp_dir, _schedule_path, config_path) = create_config_files().unwrap();
    let config = EnvironmentConfig::load(&config_path).unwrap();
    let deployments = resolve_deployments(&config, "prod").unwrap();
    let admin = FakeAdmin::default();

    let listings = list_backups(&admin, &deployments, "daily", &BackupOptions::default()).await;

    assert_eq!(listings.len(), 3);
    assert_eq!(
        listings[0].entries.as_ref().unwrap(),
        &vec![
            "2019-08-20T19:18:29_11111/".to_string(),
            "2019-08-21T19:18:29_50232/".to_string(),
        ]
    );
    let err = listings[1].entries.as_ref().unwrap_err();
    assert!(err.to_string().contains("acme-eu-backups_daily"));
    assert!(listings[2].entries.is_ok());
}

/// Test a TOML environment config is accepted
#[test]
fn test_toml_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[staging]
deployments = [{ projectId = "acme-staging" }]
"#,
    )
    .unwrap();

    let config = EnvironmentConfig::load(&config_path).unwrap();
    let deployments = resolve_deployments(&config, "staging").unwrap();
    assert_eq!(
        deployments[0].bucket_name("daily").as_str(),
        "acme-staging_backup_daily"
    );
}
