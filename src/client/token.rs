//! Client for the processes API (personal access tokens)
//!
//! Jobs are created under `/retrieve/v1/processes/{name}/execution` and
//! tracked under `/retrieve/v1/jobs/{id}`. Their status documents are mapped
//! onto the same [`Reply`] the poll loop uses for the legacy protocol:
//!
//! | processes API | reply state |
//! |---------------|-------------|
//! | `accepted`    | `queued`    |
//! | `running`     | `running`   |
//! | `successful`  | `completed` |
//! | `failed`      | `failed`    |
//!
//! Anything else is kept verbatim and ends the poll loop as an unknown state.

use super::{ApiKind, DataStore, complete, remote_result};
use crate::config::{Config, Credentials};
use crate::download::Target;
use crate::error::{Error, Result};
use crate::job::{Retrieved, TaskEndpoint, submit};
use crate::report::{Reporter, TracingReporter};
use crate::result::JobResult;
use crate::session::{Auth, Session, ensure_success, read_json};
use crate::types::{ErrorContext, JobState, Reply, ReplyError};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Status document of a job
#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "jobID")]
    job_id: String,
    status: String,
}

/// Body of `/jobs/{id}/results` for a successful job
#[derive(Debug, Deserialize)]
struct Results {
    asset: Asset,
}

#[derive(Debug, Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Debug, Deserialize)]
struct AssetValue {
    href: String,
    #[serde(rename = "file:size")]
    size: Option<u64>,
    #[serde(rename = "type")]
    media_type: Option<String>,
}

/// Problem document returned for a failed job
#[derive(Debug, Default, Deserialize)]
struct Problem {
    title: Option<String>,
    detail: Option<String>,
    traceback: Option<String>,
}

impl From<Problem> for ReplyError {
    fn from(problem: Problem) -> Self {
        ReplyError {
            message: problem.title,
            reason: problem.detail,
            context: ErrorContext {
                traceback: problem
                    .traceback
                    .map(|t| t.split('\n').map(str::to_string).collect())
                    .unwrap_or_default(),
                required_terms: Vec::new(),
            },
        }
    }
}

fn job_state(status: &str) -> JobState {
    match status {
        "accepted" => JobState::Queued,
        "running" => JobState::Running,
        "successful" => JobState::Completed,
        "failed" => JobState::Failed,
        other => JobState::Unknown(other.to_string()),
    }
}

/// Jobs live at `{base}/retrieve/v1/jobs/{id}`
struct ProcessJobs {
    base_url: String,
}

impl ProcessJobs {
    /// Build the reply for a status document, fetching results once terminal
    async fn reply(&self, session: &Session, status: JobStatus) -> Result<Reply> {
        let mut reply = Reply {
            state: job_state(&status.status),
            request_id: Some(status.job_id),
            ..Default::default()
        };
        let Some(job_id) = reply.request_id.clone() else {
            return Ok(reply);
        };

        match reply.state {
            JobState::Completed => {
                let asset = self.asset(session, &job_id).await?;
                reply.location = Some(asset.href);
                reply.content_length = asset.size;
                reply.content_type = asset.media_type;
            }
            JobState::Failed => {
                reply.error = Some(self.failure(session, &job_id).await);
            }
            _ => {}
        }
        Ok(reply)
    }

    fn results_url(&self, job_id: &str) -> String {
        format!("{}/results", self.task_url(job_id))
    }

    async fn asset(&self, session: &Session, job_id: &str) -> Result<AssetValue> {
        let url = self.results_url(job_id);
        session.reporter.debug(&format!("GET {url}"));
        let response = session.robust(|| session.api(Method::GET, &url)).await?;
        let results: Results = read_json(ensure_success(response).await?).await?;
        Ok(results.asset.value)
    }

    /// Error details of a failed job; never fails itself
    async fn failure(&self, session: &Session, job_id: &str) -> ReplyError {
        let url = self.results_url(job_id);
        session.reporter.debug(&format!("GET {url}"));
        let problem = match session.robust(|| session.api(Method::GET, &url)).await {
            Ok(response) => {
                let text = response.text().await.unwrap_or_default();
                serde_json::from_str::<Problem>(&text).unwrap_or_default()
            }
            Err(e) => {
                session
                    .reporter
                    .debug(&format!("cannot read error details: {e}"));
                Problem::default()
            }
        };
        problem.into()
    }
}

#[async_trait]
impl TaskEndpoint for ProcessJobs {
    fn task_url(&self, request_id: &str) -> String {
        format!("{}/retrieve/v1/jobs/{}", self.base_url, request_id)
    }

    async fn fetch(&self, session: &Session, request_id: &str) -> Result<Reply> {
        let url = self.task_url(request_id);
        session.reporter.debug(&format!("GET {url}"));
        let response = session.robust(|| session.api(Method::GET, &url)).await?;
        let status: JobStatus = read_json(ensure_success(response).await?).await?;
        self.reply(session, status).await
    }
}

/// Client for services authenticated with a personal access token
pub struct TokenClient {
    session: Arc<Session>,
    jobs: Arc<ProcessJobs>,
}

impl TokenClient {
    /// Resolve credentials from `config` and build a client
    pub fn new(config: Config) -> Result<Self> {
        Self::with_reporter(config, Arc::new(TracingReporter))
    }

    /// Like [`TokenClient::new`] with a custom reporter
    pub fn with_reporter(config: Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let credentials = config.credentials()?;
        Self::from_credentials(&credentials, config, reporter)
    }

    pub(crate) fn from_credentials(
        credentials: &Credentials,
        config: Config,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        let auth = Auth::Token(credentials.key.clone());
        let session = Arc::new(Session::new(credentials, auth, config, reporter)?);
        let jobs = Arc::new(ProcessJobs {
            base_url: session.base_url.clone(),
        });
        Ok(Self { session, jobs })
    }
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("url", &self.session.base_url)
            .finish()
    }
}

#[async_trait]
impl DataStore for TokenClient {
    fn api_kind(&self) -> ApiKind {
        ApiKind::Token
    }

    async fn retrieve(
        &self,
        name: &str,
        request: &Value,
        target: Option<Target<'_>>,
    ) -> Result<Retrieved> {
        let url = format!(
            "{}/retrieve/v1/processes/{}/execution",
            self.session.base_url, name
        );
        let body = json!({ "inputs": request });
        let status: JobStatus = submit(&self.session, Method::POST, &url, &body).await?;
        let reply = self.jobs.reply(&self.session, status).await?;
        let cleanup = self.session.config.delete;
        complete(&self.session, self.jobs.clone(), reply, cleanup, target).await
    }

    async fn service(&self, name: &str, _args: &[Value], _kwargs: &Value) -> Result<Retrieved> {
        Err(Error::NotSupported(format!(
            "service {name} is only available with UID:APIKEY credentials"
        )))
    }

    async fn workflow(
        &self,
        _code: &str,
        _args: &[Value],
        _kwargs: &Value,
        _workflow_name: Option<&str>,
    ) -> Result<Retrieved> {
        Err(Error::NotSupported(
            "workflows are only available with UID:APIKEY credentials".to_string(),
        ))
    }

    async fn status(&self) -> Result<Value> {
        self.session.status().await
    }

    async fn remote(&self, url: &str) -> Result<JobResult> {
        remote_result(&self.session, url).await
    }

    async fn close(&self) {
        self.session.close().await;
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(job_state("accepted"), JobState::Queued);
        assert_eq!(job_state("running"), JobState::Running);
        assert_eq!(job_state("successful"), JobState::Completed);
        assert_eq!(job_state("failed"), JobState::Failed);
        assert_eq!(
            job_state("dismissed"),
            JobState::Unknown("dismissed".to_string())
        );
    }

    #[test]
    fn test_results_document() {
        let results: Results = serde_json::from_value(json!({
            "asset": {"value": {
                "type": "application/x-grib",
                "href": "https://download.example.com/x.grib",
                "file:size": 2076600
            }}
        }))
        .unwrap();
        assert_eq!(results.asset.value.size, Some(2076600));
        assert_eq!(results.asset.value.href, "https://download.example.com/x.grib");
    }

    #[test]
    fn test_problem_becomes_reply_error() {
        let problem: Problem = serde_json::from_value(json!({
            "type": "job failed",
            "title": "The job has failed",
            "detail": "no data for the requested date",
            "traceback": "Traceback:\n  line\n\nnoise"
        }))
        .unwrap();
        let error: ReplyError = problem.into();
        assert_eq!(error.message(), "The job has failed");
        assert_eq!(error.reason(), "no data for the requested date");
        assert_eq!(error.context.traceback.len(), 4);
    }
}
