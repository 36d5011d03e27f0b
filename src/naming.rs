//! Bucket and object naming shared by the export, import and listing paths.
//!
//! Every bucket name is `{prefix}_{frequency}`. The listing path used to join
//! with a hyphen; it now goes through [`bucket_name`] like everything else.

use crate::config::Deployment;
use std::fmt;

pub const BUCKET_SEPARATOR: char = '_';
pub const DEFAULT_PREFIX_SUFFIX: &str = "_backup";
pub const STORAGE_SCHEME: &str = "gs://";
pub const METADATA_SUFFIX: &str = ".overall_export_metadata";
pub const TIMESTAMP_PLACEHOLDER: &str = "{{timestamp_of_backup}}";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketName(String);

impl BucketName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `gs://{bucket}`, the export destination.
    pub fn uri(&self) -> String {
        format!("{}{}", STORAGE_SCHEME, self.0)
    }

    /// `gs://{bucket}/`, the prefix every listed object starts with.
    pub fn listing_prefix(&self) -> String {
        format!("{}{}/", STORAGE_SCHEME, self.0)
    }

    /// `{bucket}/{timestamp}/{timestamp}.overall_export_metadata`
    pub fn metadata_object(&self, timestamp: &str) -> String {
        format!("{}/{}/{}{}", self.0, timestamp, timestamp, METADATA_SUFFIX)
    }

    pub fn metadata_uri(&self, timestamp: &str) -> String {
        format!("{}{}", STORAGE_SCHEME, self.metadata_object(timestamp))
    }

    /// Drop the `gs://{bucket}/` prefix from a listing line for display.
    pub fn strip_listing_prefix<'a>(&self, line: &'a str) -> &'a str {
        let prefix = self.listing_prefix();
        line.strip_prefix(prefix.as_str()).unwrap_or(line)
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BucketName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for BucketName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

pub fn default_prefix(project_id: &str) -> String {
    format!("{}{}", project_id, DEFAULT_PREFIX_SUFFIX)
}

/// Explicit prefix if given, otherwise `{project_id}_backup`, joined with the frequency.
pub fn bucket_name(prefix: Option<&str>, project_id: &str, frequency: &str) -> BucketName {
    let prefix = match prefix {
        Some(prefix) => prefix.to_string(),
        None => default_prefix(project_id),
    };
    BucketName(format!("{}{}{}", prefix, BUCKET_SEPARATOR, frequency))
}

impl Deployment {
    pub fn bucket_name(&self, frequency: &str) -> BucketName {
        bucket_name(
            self.backup_bucket_prefix.as_deref(),
            &self.project_id,
            frequency,
        )
    }
}
