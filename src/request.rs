//! Structured export/import/status requests.
//!
//! Requests are plain data. Turning them into a gcloud command line or a REST
//! payload happens in [`crate::render`] and nowhere else.

use crate::error::{BackupError, Result};
use crate::naming::BucketName;

/// Per-invocation options taken from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupOptions {
    /// Identity to act as (`--account`).
    pub account: Option<String>,
    /// Render requests without executing them.
    pub debug: bool,
}

impl BackupOptions {
    pub fn with_account(account: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub project_id: String,
    pub kinds: Vec<String>,
    pub bucket: BucketName,
    pub account: Option<String>,
}

impl ExportRequest {
    /// Always asynchronous; the caller gets an operation handle back.
    pub const ASYNC: bool = true;

    pub fn destination_uri(&self) -> String {
        self.bucket.uri()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub project_id: String,
    pub kinds: Vec<String>,
    pub bucket: BucketName,
    pub timestamp: String,
    pub account: Option<String>,
}

impl ImportRequest {
    pub const ASYNC: bool = true;

    pub fn metadata_object(&self) -> String {
        self.bucket.metadata_object(&self.timestamp)
    }

    pub fn metadata_uri(&self) -> String {
        self.bucket.metadata_uri(&self.timestamp)
    }
}

/// Lists pending and completed long-running operations of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusQuery {
    pub project_id: String,
    pub account: Option<String>,
}

/// Lists the top-level entries (one per export timestamp) of a backup bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListObjectsQuery {
    pub project_id: String,
    pub bucket: BucketName,
    pub account: Option<String>,
}

fn checked_kinds(kinds: &[String]) -> Result<Vec<String>> {
    if kinds.is_empty() || kinds.iter().any(|kind| kind.trim().is_empty()) {
        return Err(BackupError::EmptyKindsList);
    }
    Ok(kinds.to_vec())
}

pub fn build_export_request(
    kinds: &[String],
    project_id: &str,
    bucket: &BucketName,
    options: &BackupOptions,
) -> Result<ExportRequest> {
    Ok(ExportRequest {
        kinds: checked_kinds(kinds)?,
        project_id: project_id.to_string(),
        bucket: bucket.clone(),
        account: options.account.clone(),
    })
}

pub fn build_import_request(
    kinds: &[String],
    project_id: &str,
    bucket: &BucketName,
    timestamp: &str,
    options: &BackupOptions,
) -> Result<ImportRequest> {
    let kinds = checked_kinds(kinds)?;
    if timestamp.trim().is_empty() {
        return Err(BackupError::MissingTimestamp);
    }
    Ok(ImportRequest {
        kinds,
        project_id: project_id.to_string(),
        bucket: bucket.clone(),
        timestamp: timestamp.to_string(),
        account: options.account.clone(),
    })
}

pub fn build_status_query(project_id: &str, options: &BackupOptions) -> StatusQuery {
    StatusQuery {
        project_id: project_id.to_string(),
        account: options.account.clone(),
    }
}

pub fn build_list_query(
    project_id: &str,
    bucket: &BucketName,
    options: &BackupOptions,
) -> ListObjectsQuery {
    ListObjectsQuery {
        project_id: project_id.to_string(),
        bucket: bucket.clone(),
        account: options.account.clone(),
    }
}
