//! BigQuery REST v2 implementation of [`Warehouse`].
//!
//! Credentials come from an injected [`TokenSource`]; the client itself never
//! reads the environment.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

use crate::upload::{
    JobHandle, JobOutcome, LoadJobConfig, TableId, TableInfo, UploadError, Warehouse,
    WriteDisposition,
};

pub const DEFAULT_API_ROOT: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_UPLOAD_ROOT: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
pub const ENV_ACCESS_TOKEN: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SOURCE_FORMAT: &str = "PARQUET";

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self, http: &reqwest::Client) -> Result<String, UploadError>;
}

/// A bearer token minted outside this process.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self, _http: &reqwest::Client) -> Result<String, UploadError> {
        Ok(self.0.clone())
    }
}

/// Application Default Credentials: a service-account key named by
/// `GOOGLE_APPLICATION_CREDENTIALS`, gcloud user credentials, or the
/// GCE / Cloud Run metadata server. The provider is resolved on first use.
#[derive(Default)]
pub struct ApplicationDefaultToken {
    provider: OnceCell<Arc<dyn gcp_auth::TokenProvider>>,
}

impl std::fmt::Debug for ApplicationDefaultToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationDefaultToken")
            .field("resolved", &self.provider.initialized())
            .finish()
    }
}

#[async_trait]
impl TokenSource for ApplicationDefaultToken {
    async fn access_token(&self, _http: &reqwest::Client) -> Result<String, UploadError> {
        let provider = self
            .provider
            .get_or_try_init(gcp_auth::provider)
            .await
            .map_err(|err| UploadError::Auth(err.to_string()))?;

        let token = provider
            .token(&[BIGQUERY_SCOPE])
            .await
            .map_err(|err| UploadError::Auth(err.to_string()))?;
        Ok(token.as_str().to_string())
    }
}

/// Static token when `GOOGLE_OAUTH_ACCESS_TOKEN` is set, Application Default
/// Credentials otherwise.
pub fn token_source_from_lookup<F>(lookup: F) -> Arc<dyn TokenSource>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(ENV_ACCESS_TOKEN).filter(|token| !token.trim().is_empty()) {
        Some(token) => Arc::new(StaticToken::new(token.trim())),
        None => Arc::new(ApplicationDefaultToken::default()),
    }
}

pub struct BigQueryClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    api_root: String,
    upload_root: String,
    poll_interval: Duration,
}

impl BigQueryClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            api_root: DEFAULT_API_ROOT.to_string(),
            upload_root: DEFAULT_UPLOAD_ROOT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_endpoints(
        mut self,
        api_root: impl Into<String>,
        upload_root: impl Into<String>,
    ) -> Self {
        self.api_root = api_root.into();
        self.upload_root = upload_root.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn bearer(&self) -> Result<String, UploadError> {
        self.tokens.access_token(&self.http).await
    }

    fn table_url(&self, table: &TableId) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.api_root, table.project, table.dataset, table.table
        )
    }

    fn job_url(&self, job: &JobHandle) -> String {
        format!("{}/projects/{}/jobs/{}", self.api_root, job.project, job.job_id)
    }

    fn upload_url(&self, project: &str) -> String {
        format!("{}/projects/{}/jobs?uploadType=multipart", self.upload_root, project)
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn get_table(&self, table: &TableId) -> Result<TableInfo, UploadError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.table_url(table))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(UploadError::TableNotFound(table.clone()));
        }
        let response = ensure_success(response).await?;
        let resource: TableResource = response.json().await?;

        Ok(TableInfo {
            id: table.clone(),
            num_rows: resource.num_rows.and_then(|rows| rows.parse().ok()),
        })
    }

    async fn submit_load(
        &self,
        table: &TableId,
        config: &LoadJobConfig,
        payload: Bytes,
    ) -> Result<JobHandle, UploadError> {
        let job_id = format!("wms_snapshot_{}", Uuid::new_v4().simple());
        let metadata = serde_json::to_vec(&load_job_request(table, config, &job_id))?;
        let boundary = format!("wms_snapshot_boundary_{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, &payload);

        let token = self.bearer().await?;
        let response = self
            .http
            .post(self.upload_url(&table.project))
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let resource: JobResource = response.json().await?;

        Ok(JobHandle {
            project: table.project.clone(),
            job_id: resource.job_reference.job_id,
            location: resource.job_reference.location,
        })
    }

    async fn wait_for_job(&self, job: &JobHandle) -> Result<JobOutcome, UploadError> {
        loop {
            let token = self.bearer().await?;
            let mut request = self.http.get(self.job_url(job)).bearer_auth(token);
            if let Some(location) = &job.location {
                request = request.query(&[("location", location.as_str())]);
            }
            let response = ensure_success(request.send().await?).await?;
            let resource: JobResource = response.json().await?;

            if let Some(outcome) = job_outcome(&resource) {
                return outcome;
            }

            debug!(
                job_id = %job.job_id,
                state = ?resource.status.as_ref().map(|status| status.state.as_str()),
                "load job still running"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobRequest<'a> {
    job_reference: JobReferenceRequest<'a>,
    configuration: JobConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobReferenceRequest<'a> {
    project_id: &'a str,
    job_id: &'a str,
}

#[derive(Debug, Serialize)]
struct JobConfiguration<'a> {
    load: LoadConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration<'a> {
    destination_table: TableReference<'a>,
    source_format: &'static str,
    write_disposition: WriteDisposition,
    autodetect: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    #[serde(default)]
    num_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReferenceResponse,
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReferenceResponse {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    // int64 fields arrive as JSON strings
    #[serde(default)]
    output_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn load_job_request<'a>(
    table: &'a TableId,
    config: &LoadJobConfig,
    job_id: &'a str,
) -> JobRequest<'a> {
    JobRequest {
        job_reference: JobReferenceRequest {
            project_id: &table.project,
            job_id,
        },
        configuration: JobConfiguration {
            load: LoadConfiguration {
                destination_table: TableReference {
                    project_id: &table.project,
                    dataset_id: &table.dataset,
                    table_id: &table.table,
                },
                source_format: SOURCE_FORMAT,
                write_disposition: config.write_disposition,
                autodetect: config.autodetect,
            },
        },
    }
}

/// Body for BigQuery's `uploadType=multipart`: job metadata, then the data.
fn multipart_related(boundary: &str, metadata: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + payload.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// `None` while the job is pending or running.
fn job_outcome(resource: &JobResource) -> Option<Result<JobOutcome, UploadError>> {
    let status = resource.status.as_ref()?;
    if status.state != "DONE" {
        return None;
    }

    let job_id = resource.job_reference.job_id.clone();
    if let Some(error) = &status.error_result {
        return Some(Err(UploadError::JobFailed {
            job_id,
            reason: error.reason.clone().unwrap_or_else(|| "unknown".to_string()),
            message: error.message.clone().unwrap_or_default(),
        }));
    }

    let output_rows = resource
        .statistics
        .as_ref()
        .and_then(|stats| stats.load.as_ref())
        .and_then(|load| load.output_rows.as_deref())
        .and_then(|rows| rows.parse().ok());

    Some(Ok(JobOutcome {
        job_id,
        output_rows,
    }))
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UploadError::Api {
        status: status.as_u16(),
        message: api_error_message(&body),
    })
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn load_request_targets_table_with_autodetect() {
        let table = TableId::new("proj", "data_espol", "stock_wms_historico");
        let request = load_job_request(&table, &LoadJobConfig::default(), "job_1");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value,
            json!({
                "jobReference": { "projectId": "proj", "jobId": "job_1" },
                "configuration": {
                    "load": {
                        "destinationTable": {
                            "projectId": "proj",
                            "datasetId": "data_espol",
                            "tableId": "stock_wms_historico"
                        },
                        "sourceFormat": "PARQUET",
                        "writeDisposition": "WRITE_APPEND",
                        "autodetect": true
                    }
                }
            })
        );
    }

    #[test]
    fn multipart_body_wraps_metadata_then_payload() {
        let body = multipart_related("b", br#"{"a":1}"#, b"PAR1");
        let text = String::from_utf8(body).unwrap();

        assert_eq!(
            text,
            "--b\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"a\":1}\r\n\
             --b\r\nContent-Type: application/octet-stream\r\n\r\nPAR1\r\n--b--\r\n"
        );
    }

    fn job(value: Value) -> JobResource {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn running_job_has_no_outcome() {
        let resource = job(json!({
            "jobReference": { "jobId": "j", "location": "US" },
            "status": { "state": "RUNNING" }
        }));
        assert!(job_outcome(&resource).is_none());
    }

    #[test]
    fn finished_job_reports_output_rows() {
        let resource = job(json!({
            "jobReference": { "jobId": "j" },
            "status": { "state": "DONE" },
            "statistics": { "load": { "outputRows": "42" } }
        }));
        let outcome = job_outcome(&resource).unwrap().unwrap();
        assert_eq!(outcome.job_id, "j");
        assert_eq!(outcome.output_rows, Some(42));
    }

    #[test]
    fn failed_job_surfaces_error_result() {
        let resource = job(json!({
            "jobReference": { "jobId": "j" },
            "status": {
                "state": "DONE",
                "errorResult": { "reason": "invalid", "message": "schema mismatch" }
            }
        }));
        let err = job_outcome(&resource).unwrap().unwrap_err();
        match err {
            UploadError::JobFailed {
                job_id,
                reason,
                message,
            } => {
                assert_eq!(job_id, "j");
                assert_eq!(reason, "invalid");
                assert_eq!(message, "schema mismatch");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn api_error_message_prefers_structured_body() {
        let body = r#"{"error":{"code":403,"message":"Access Denied","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(api_error_message(body), "Access Denied");
        assert_eq!(api_error_message("  plain text  "), "plain text");
    }

    #[test]
    fn token_source_prefers_explicit_token() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let source = token_source_from_lookup(|key| {
            (key == ENV_ACCESS_TOKEN).then(|| " ya29.token ".to_string())
        });
        let token = runtime
            .block_on(source.access_token(&reqwest::Client::new()))
            .unwrap();
        assert_eq!(token, "ya29.token");
    }

    #[test]
    fn application_default_credentials_resolve_lazily() {
        let source = ApplicationDefaultToken::default();
        assert!(!source.provider.initialized());
        assert!(format!("{source:?}").contains("resolved: false"));
    }
}
