use crate::error::BackupError;
use crate::render::{default_project_command, CommandLine, GCLOUD};
use crate::request::{ExportRequest, ImportRequest, ListObjectsQuery, StatusQuery};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// What the backup core needs from Cloud Datastore and Cloud Storage.
#[async_trait]
pub trait DatastoreAdmin: Send + Sync {
    async fn export(&self, request: &ExportRequest) -> Result<Operation>;
    async fn import(&self, request: &ImportRequest) -> Result<Operation>;
    async fn list_operations(&self, query: &StatusQuery) -> Result<Vec<Operation>>;
    /// Full `gs://bucket/...` names of the top-level entries in the bucket.
    async fn list_objects(&self, query: &ListObjectsQuery) -> Result<Vec<String>>;
}

/// A Datastore Admin long-running operation, as returned by both the REST API
/// and `gcloud ... --format=json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub metadata: Option<OperationMetadata>,
    #[serde(default)]
    pub error: Option<OperationError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    #[serde(default)]
    pub common: Option<CommonMetadata>,
    #[serde(default)]
    pub output_url_prefix: Option<String>,
    #[serde(default)]
    pub input_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonMetadata {
    #[serde(default)]
    pub operation_type: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Operation {
    fn common(&self) -> Option<&CommonMetadata> {
        self.metadata.as_ref().and_then(|m| m.common.as_ref())
    }

    pub fn state(&self) -> &str {
        self.common()
            .and_then(|c| c.state.as_deref())
            .unwrap_or("UNKNOWN")
    }

    pub fn operation_type(&self) -> &str {
        self.common()
            .and_then(|c| c.operation_type.as_deref())
            .unwrap_or("UNKNOWN")
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.common().and_then(|c| c.start_time)
    }

    /// One line for the operator: name, type, state, and when it started.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} {} state: {}",
            self.name,
            self.operation_type(),
            self.state()
        );
        if let Some(start) = self.start_time() {
            line.push_str(&format!(" started: {}", start.to_rfc3339()));
        }
        if let Some(message) = self.error.as_ref().and_then(|e| e.message.as_deref()) {
            line.push_str(&format!(" error: {}", message));
        }
        line
    }
}

fn gcloud_path() -> String {
    match which::which(GCLOUD) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(_) => {
            warn!("gcloud not found in PATH. Install the Google Cloud SDK from https://cloud.google.com/sdk");
            GCLOUD.to_string()
        }
    }
}

// Shells out to the gcloud CLI
pub struct GcloudCli {
    gcloud_path: String,
}

impl GcloudCli {
    pub fn new() -> Self {
        Self {
            gcloud_path: gcloud_path(),
        }
    }

    async fn run(&self, line: &CommandLine) -> Result<String> {
        debug!("Executing: {}", line);
        let output = tokio::process::Command::new(&self.gcloud_path)
            .args(&line.args)
            .output()
            .await
            .with_context(|| format!("Failed to execute `{}`. Is gcloud installed?", line))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            bail!("`{}` exited with {}: {}", line, output.status, error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// The project gcloud is configured to act on, for when none was given.
    pub async fn default_project(&self) -> crate::error::Result<String> {
        let line = default_project_command();
        let failed = |message: String| BackupError::ExternalOperation {
            operation: "gcloud config get-value project",
            project_id: "(gcloud default)".to_string(),
            bucket: "-".to_string(),
            message,
        };

        let stdout = self
            .run(&line)
            .await
            .map_err(|err| failed(format!("{:#}", err)))?;
        let project_id = parse_default_project(&stdout).ok_or_else(|| {
            failed("no default project configured; pass a project id instead".to_string())
        })?;

        info!("Using gcloud default project {}", project_id);
        Ok(project_id)
    }

    async fn run_operation(&self, line: CommandLine) -> Result<Operation> {
        let line = line.arg("--format=json");
        let stdout = self.run(&line).await?;
        serde_json::from_str(&stdout)
            .with_context(|| format!("Unexpected output from `{}`: {}", line, stdout.trim()))
    }
}

/// Trimmed stdout of `gcloud config get-value project`; gcloud prints
/// nothing or `(unset)` when no project is configured.
pub fn parse_default_project(stdout: &str) -> Option<String> {
    let project_id = stdout.trim();
    if project_id.is_empty() || project_id == "(unset)" {
        None
    } else {
        Some(project_id.to_string())
    }
}

impl Default for GcloudCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatastoreAdmin for GcloudCli {
    async fn export(&self, request: &ExportRequest) -> Result<Operation> {
        info!(
            "Exporting {} kinds from {} to {}...",
            request.kinds.len(),
            request.project_id,
            request.destination_uri()
        );
        self.run_operation(request.to_command_line()).await
    }

    async fn import(&self, request: &ImportRequest) -> Result<Operation> {
        info!(
            "Importing {} from {}...",
            request.kinds.join(","),
            request.metadata_uri()
        );
        self.run_operation(request.to_command_line()).await
    }

    async fn list_operations(&self, query: &StatusQuery) -> Result<Vec<Operation>> {
        let line = query.to_command_line().arg("--format=json");
        let stdout = self.run(&line).await?;
        serde_json::from_str(&stdout)
            .with_context(|| format!("Unexpected output from `{}`", line))
    }

    async fn list_objects(&self, query: &ListObjectsQuery) -> Result<Vec<String>> {
        let stdout = self.run(&query.to_command_line()).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

pub const DATASTORE_API: &str = "https://datastore.googleapis.com/v1/";
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListOperationsResponse {
    #[serde(default)]
    operations: Vec<Operation>,
    #[serde(default)]
    next_page_token: Option<String>,
}

// Datastore Admin REST API, with bucket listing through object_store
// Documentation: https://cloud.google.com/datastore/docs/reference/admin/rest
pub struct AdminApi {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
}

impl AdminApi {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DATASTORE_API)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid Datastore Admin API URL: {}", base_url))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            access_token: None,
        })
    }

    /// Use a fixed bearer token instead of asking the environment or gcloud.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn project_url(&self, project_id: &str, method: &str) -> Result<Url> {
        self.base_url
            .join(&format!("projects/{}{}", project_id, method))
            .with_context(|| format!("Invalid project id: {}", project_id))
    }

    /// `GOOGLE_OAUTH_ACCESS_TOKEN` when acting as the ambient identity,
    /// otherwise `gcloud auth print-access-token [account]`.
    async fn access_token(&self, account: Option<&str>) -> Result<String> {
        if let Some(token) = &self.access_token {
            return Ok(token.clone());
        }
        if account.is_none() {
            if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
                if !token.trim().is_empty() {
                    return Ok(token.trim().to_string());
                }
            }
        }

        let mut command = tokio::process::Command::new(gcloud_path());
        command.arg("auth").arg("print-access-token");
        if let Some(account) = account {
            command.arg(account);
        }
        let output = command
            .output()
            .await
            .context("Failed to obtain an access token from gcloud")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            bail!("gcloud auth print-access-token failed: {}", error.trim());
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            bail!("gcloud auth print-access-token returned an empty token");
        }
        Ok(token)
    }

    async fn post_operation<T: Serialize + ?Sized>(
        &self,
        url: Url,
        account: Option<&str>,
        body: &T,
    ) -> Result<Operation> {
        let token = self.access_token(account).await?;
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", url))?;

        let response = check_status(response, &url).await?;
        response
            .json()
            .await
            .with_context(|| format!("Unexpected response from {}", url))
    }
}

async fn check_status(response: reqwest::Response, url: &Url) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} returned {}: {}", url, status, body.trim())
}

#[async_trait]
impl DatastoreAdmin for AdminApi {
    async fn export(&self, request: &ExportRequest) -> Result<Operation> {
        info!(
            "Exporting {} kinds from {} to {}...",
            request.kinds.len(),
            request.project_id,
            request.destination_uri()
        );
        let url = self.project_url(&request.project_id, ":export")?;
        self.post_operation(url, request.account.as_deref(), &request.to_api_payload())
            .await
    }

    async fn import(&self, request: &ImportRequest) -> Result<Operation> {
        info!(
            "Importing {} from {}...",
            request.kinds.join(","),
            request.metadata_uri()
        );
        let url = self.project_url(&request.project_id, ":import")?;
        self.post_operation(url, request.account.as_deref(), &request.to_api_payload())
            .await
    }

    async fn list_operations(&self, query: &StatusQuery) -> Result<Vec<Operation>> {
        let token = self.access_token(query.account.as_deref()).await?;
        let mut operations = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.project_url(&query.project_id, "/operations")?;
            if let Some(token) = page_token.take() {
                url.query_pairs_mut().append_pair("pageToken", &token);
            }

            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&token)
                .send()
                .await
                .with_context(|| format!("Failed to call {}", url))?;
            let page: ListOperationsResponse = check_status(response, &url)
                .await?
                .json()
                .await
                .with_context(|| format!("Unexpected response from {}", url))?;

            operations.extend(page.operations);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(operations)
    }

    async fn list_objects(&self, query: &ListObjectsQuery) -> Result<Vec<String>> {
        use object_store::gcp::{GcpCredential, GoogleCloudStorageBuilder};
        use object_store::{ObjectStore, StaticCredentialProvider};

        let token = self.access_token(query.account.as_deref()).await?;
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(query.bucket.as_str())
            .with_credentials(Arc::new(StaticCredentialProvider::new(GcpCredential {
                bearer: token,
            })))
            .build()
            .with_context(|| format!("Failed to build GCS client for {}", query.bucket))?;

        let listing = store
            .list_with_delimiter(None)
            .await
            .with_context(|| format!("Failed to list {}", query.bucket.listing_prefix()))?;

        let prefix = query.bucket.listing_prefix();
        let mut names: Vec<String> = listing
            .common_prefixes
            .iter()
            .map(|path| format!("{}{}/", prefix, path))
            .collect();
        names.extend(
            listing
                .objects
                .iter()
                .map(|meta| format!("{}{}", prefix, meta.location)),
        );
        names.sort();
        Ok(names)
    }
}

/// Which implementation of [`DatastoreAdmin`] to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    /// Shell out to the gcloud CLI
    #[default]
    Gcloud,
    /// Call the Datastore Admin REST API directly
    Api,
}

pub enum Admin {
    Gcloud(GcloudCli),
    Api(AdminApi),
}

impl Admin {
    pub fn from_backend(backend: Backend) -> Result<Self> {
        match backend {
            Backend::Gcloud => Ok(Admin::Gcloud(GcloudCli::new())),
            Backend::Api => Ok(Admin::Api(AdminApi::new()?)),
        }
    }
}

#[async_trait]
impl DatastoreAdmin for Admin {
    async fn export(&self, request: &ExportRequest) -> Result<Operation> {
        match self {
            Admin::Gcloud(a) => a.export(request).await,
            Admin::Api(a) => a.export(request).await,
        }
    }

    async fn import(&self, request: &ImportRequest) -> Result<Operation> {
        match self {
            Admin::Gcloud(a) => a.import(request).await,
            Admin::Api(a) => a.import(request).await,
        }
    }

    async fn list_operations(&self, query: &StatusQuery) -> Result<Vec<Operation>> {
        match self {
            Admin::Gcloud(a) => a.list_operations(query).await,
            Admin::Api(a) => a.list_operations(query).await,
        }
    }

    async fn list_objects(&self, query: &ListObjectsQuery) -> Result<Vec<String>> {
        match self {
            Admin::Gcloud(a) => a.list_objects(query).await,
            Admin::Api(a) => a.list_objects(query).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_from_rest_json() {
        let json = r#"{
            "name": "projects/acme-prod/operations/ASA1MTAwNDQxNAgadGx1YWZlZAcSeWx0aGdpbWVkEmVyb3MtYmFja3VwLXY",
            "metadata": {
                "@type": "type.googleapis.com/google.datastore.admin.v1.ExportEntitiesMetadata",
                "common": {
                    "startTime": "2019-08-21T19:18:29.502320Z",
                    "operationType": "EXPORT_ENTITIES",
                    "state": "PROCESSING"
                },
                "entityFilter": { "kinds": ["Person"] },
                "outputUrlPrefix": "gs://acme-prod_backup_daily/2019-08-21T19:18:29_50232"
            }
        }"#;
        let operation: Operation = serde_json::from_str(json).unwrap();

        assert_eq!(operation.state(), "PROCESSING");
        assert_eq!(operation.operation_type(), "EXPORT_ENTITIES");
        assert!(!operation.done);
        assert_eq!(
            operation.metadata.unwrap().output_url_prefix.as_deref(),
            Some("gs://acme-prod_backup_daily/2019-08-21T19:18:29_50232")
        );
    }

    #[test]
    fn test_operation_summary_includes_error() {
        let operation = Operation {
            name: "projects/p/operations/1".to_string(),
            done: true,
            metadata: None,
            error: Some(OperationError {
                code: Some(7),
                message: Some("permission denied".to_string()),
            }),
        };
        assert_eq!(
            operation.summary(),
            "projects/p/operations/1 UNKNOWN state: UNKNOWN error: permission denied"
        );
    }

    #[test]
    fn test_parse_default_project() {
        assert_eq!(
            parse_default_project("acme-prod\n").as_deref(),
            Some("acme-prod")
        );
        assert_eq!(parse_default_project("  \n"), None);
        assert_eq!(parse_default_project("(unset)\n"), None);
    }

    #[test]
    fn test_project_url() {
        let api = AdminApi::new().unwrap();
        assert_eq!(
            api.project_url("acme-prod", ":export").unwrap().as_str(),
            "https://datastore.googleapis.com/v1/projects/acme-prod:export"
        );
        assert_eq!(
            api.project_url("acme-prod", "/operations").unwrap().as_str(),
            "https://datastore.googleapis.com/v1/projects/acme-prod/operations"
        );
    }

    #[test]
    fn test_list_operations_page_parsing() {
        let json = r#"{ "operations": [ { "name": "a", "done": true } ], "nextPageToken": "t1" }"#;
        let page: ListOperationsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(page.operations.len(), 1);
        assert_eq!(page.next_page_token.as_deref(), Some("t1"));
    }

    // Admin API tests against a local HTTP server

    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn serve(router: Router) -> AdminApi {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        AdminApi::with_base_url(&format!("http://{}/v1/", addr))
            .unwrap()
            .with_access_token("test-token")
    }

    async fn operations_page(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-token")
        {
            return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({})));
        }
        let page = match params.get("pageToken").map(String::as_str) {
            None => serde_json::json!({
                "operations": [ { "name": "projects/acme-prod/operations/1", "done": true } ],
                "nextPageToken": "page-2"
            }),
            Some("page-2") => serde_json::json!({
                "operations": [ { "name": "projects/acme-prod/operations/2" } ],
                "nextPageToken": ""
            }),
            Some(_) => return (StatusCode::BAD_REQUEST, Json(serde_json::json!({}))),
        };
        (StatusCode::OK, Json(page))
    }

    #[tokio::test]
    async fn test_list_operations_follows_page_tokens() {
        let api = serve(Router::new().route(
            "/v1/projects/acme-prod/operations",
            get(operations_page),
        ))
        .await;
        let query = crate::request::build_status_query("acme-prod", &Default::default());

        let operations = api.list_operations(&query).await.unwrap();

        let names: Vec<&str> = operations.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "projects/acme-prod/operations/1",
                "projects/acme-prod/operations/2"
            ]
        );
        assert!(operations[0].done);
    }

    #[tokio::test]
    async fn test_export_error_carries_status_and_body() {
        let api = serve(Router::new().route(
            "/v1/projects/acme-prod:export",
            post(|| async {
                (
                    StatusCode::FORBIDDEN,
                    "The caller does not have permission",
                )
            }),
        ))
        .await;
        let request = crate::request::build_export_request(
            &["Person".to_string()],
            "acme-prod",
            &crate::naming::BucketName::from("acme-prod_backup_daily"),
            &Default::default(),
        )
        .unwrap();

        let err = api.export(&request).await.unwrap_err();

        let message = format!("{:#}", err);
        assert!(message.contains("403"), "{}", message);
        assert!(
            message.contains("The caller does not have permission"),
            "{}",
            message
        );
        assert!(message.contains("projects/acme-prod:export"), "{}", message);
    }
}
