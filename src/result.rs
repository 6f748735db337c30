//! Handle on the output of a completed job

use crate::download::{Target, fetch_resumable};
use crate::error::{Error, Result};
use crate::session::{Session, ensure_success};
use crate::types::{Reply, ResultDescriptor};
use crate::utils::{filename_from_url, resolve_location};
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

/// A completed job whose output can be downloaded
///
/// When cleanup is enabled the server-side task is deleted once, either by an
/// explicit [`JobResult::delete`] or when the handle is dropped inside a Tokio
/// runtime. A drop only starts the deletion in the background; await
/// [`DataStore::close`](crate::DataStore::close) before the runtime shuts down,
/// or call [`JobResult::delete`], to be sure it reached the server.
pub struct JobResult {
    session: Arc<Session>,
    reply: Reply,
    location: Url,
    content_length: u64,
    content_type: Option<String>,
    task_url: Option<String>,
    cleanup: bool,
    deleted: AtomicBool,
}

impl JobResult {
    /// Build a handle from a completed reply
    pub(crate) fn from_reply(
        session: Arc<Session>,
        reply: Reply,
        task_url: Option<String>,
        cleanup: bool,
    ) -> Result<Self> {
        let location = reply
            .location
            .as_deref()
            .ok_or_else(|| Error::Protocol("completed reply carries no location".into()))?;
        let location = resolve_location(&session.base_url, location)?;
        let content_length = reply
            .content_length
            .ok_or_else(|| Error::Protocol("completed reply carries no content_length".into()))?;
        let content_type = reply.content_type.clone();

        Ok(Self {
            session,
            reply,
            location,
            content_length,
            content_type,
            task_url,
            cleanup,
            deleted: AtomicBool::new(false),
        })
    }

    /// Handle on an arbitrary URL; never deleted
    pub(crate) fn remote(
        session: Arc<Session>,
        location: Url,
        content_length: u64,
        content_type: Option<String>,
    ) -> Self {
        let reply = Reply {
            state: crate::types::JobState::Completed,
            location: Some(location.to_string()),
            content_length: Some(content_length),
            content_type: content_type.clone(),
            ..Default::default()
        };
        Self {
            session,
            reply,
            location,
            content_length,
            content_type,
            task_url: None,
            cleanup: false,
            deleted: AtomicBool::new(false),
        }
    }

    /// Exact size of the output in bytes
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// MIME type of the output, when the server gave one
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Absolute download URL
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// The reply the handle was built from
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    /// Whether the task will be deleted on drop
    pub fn cleanup(&self) -> bool {
        self.cleanup
    }

    /// Enable or disable deletion on drop
    pub fn set_cleanup(&mut self, cleanup: bool) {
        self.cleanup = cleanup;
    }

    /// Description of the result as a typed value
    pub fn descriptor(&self) -> ResultDescriptor {
        ResultDescriptor {
            result_type: "url".to_string(),
            content_type: self.content_type.clone(),
            content_length: self.content_length,
            location: self.location.to_string(),
        }
    }

    /// Description of the result as JSON (`resultType`, `contentType`, ...)
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.descriptor())?)
    }

    /// Download the output into `target`; returns the number of bytes written
    pub async fn download<'a>(&self, target: impl Into<Target<'a>>) -> Result<u64> {
        fetch_resumable(&self.session, &self.location, self.content_length, target.into()).await
    }

    /// Download into the working directory, naming the file after the URL
    pub async fn download_to_default(&self) -> Result<PathBuf> {
        let path = filename_from_url(&self.location);
        self.download(Target::Path(path.clone())).await?;
        Ok(path)
    }

    /// HEAD the download location and return its headers
    pub async fn check(&self) -> Result<HeaderMap> {
        let session = &self.session;
        let url = self.location.as_str();
        session.reporter.debug(&format!("HEAD {url}"));
        let response = session.robust(|| session.api(Method::HEAD, url)).await?;
        let response = ensure_success(response).await?;
        Ok(response.headers().clone())
    }

    /// Delete the server-side task; only the first call does anything
    ///
    /// Failures are reported as warnings.
    pub async fn delete(&self) {
        if self.deleted.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task_url) = &self.task_url {
            delete_task(&self.session, task_url).await;
        }
    }
}

async fn delete_task(session: &Session, task_url: &str) {
    session.reporter.debug(&format!("DELETE {task_url}"));
    match session.api(Method::DELETE, task_url).send().await {
        Ok(response) => {
            let status = response.status();
            session
                .reporter
                .debug(&format!("DELETE returns {status}"));
            if !status.is_success() {
                session
                    .reporter
                    .warning(&format!("DELETE {task_url} returns {status}"));
            }
        }
        Err(e) => session
            .reporter
            .warning(&format!("DELETE {task_url} failed: {e}")),
    }
}

impl Drop for JobResult {
    fn drop(&mut self) {
        if !self.cleanup || self.deleted.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(task_url) = self.task_url.take() else {
            return;
        };
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                session.reporter.debug(&format!(
                    "Deleting {task_url} in the background; close the client to wait for it"
                ));
                let tracked = session.clone();
                let cleanup = handle.spawn(async move {
                    delete_task(&session, &task_url).await;
                });
                tracked.track_cleanup(cleanup);
            }
            Err(_) => session
                .reporter
                .warning(&format!("No runtime to delete {task_url}; task left on the server")),
        }
    }
}

impl std::fmt::Debug for JobResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Result(content_length={},content_type={},location={})",
            self.content_length,
            self.content_type.as_deref().unwrap_or("None"),
            self.location
        )
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Credentials};
    use crate::report::tests::RecordingReporter;
    use crate::session::Auth;
    use crate::types::JobState;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(base: &str, reporter: Arc<RecordingReporter>) -> Arc<Session> {
        let credentials = Credentials {
            url: base.to_string(),
            key: "1:abc".to_string(),
            verify: true,
        };
        let auth = Auth::Basic {
            user: "1".into(),
            password: "abc".into(),
        };
        Arc::new(Session::new(&credentials, auth, Config::default(), reporter).unwrap())
    }

    fn completed(location: &str) -> Reply {
        Reply {
            state: JobState::Completed,
            request_id: Some("r1".into()),
            location: Some(location.into()),
            content_length: Some(42),
            content_type: Some("application/x-grib".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_relative_location_is_resolved() {
        let reporter = Arc::new(RecordingReporter::default());
        let s = session("https://cds.example.com/api/v2", reporter);
        let result = JobResult::from_reply(s, completed("/cache/x.grib"), None, false).unwrap();
        assert_eq!(
            result.location().as_str(),
            "https://cds.example.com/cache/x.grib"
        );
        assert_eq!(
            format!("{result:?}"),
            "Result(content_length=42,content_type=application/x-grib,location=https://cds.example.com/cache/x.grib)"
        );
    }

    #[tokio::test]
    async fn test_missing_location_is_protocol_error() {
        let reporter = Arc::new(RecordingReporter::default());
        let s = session("https://cds.example.com/api/v2", reporter);
        let mut reply = completed("x");
        reply.location = None;
        let err = JobResult::from_reply(s, reply, None, false).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_to_json_descriptor() {
        let reporter = Arc::new(RecordingReporter::default());
        let s = session("https://cds.example.com/api/v2", reporter);
        let result =
            JobResult::from_reply(s, completed("https://dl.example.com/x.grib"), None, false).unwrap();
        let json = result.to_json().unwrap();
        assert_eq!(json["resultType"], "url");
        assert_eq!(json["contentLength"], 42);
        assert_eq!(json["location"], "https://dl.example.com/x.grib");
    }

    #[tokio::test]
    async fn test_delete_runs_at_most_once() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/tasks/r1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = Arc::new(RecordingReporter::default());
        let s = session(&server.uri(), reporter);
        let task_url = format!("{}/tasks/r1", server.uri());
        let result = JobResult::from_reply(s, completed("/x.grib"), Some(task_url), true).unwrap();

        result.delete().await;
        result.delete().await;
        drop(result);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_dropped_handle_deletion_is_awaited_by_close() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/tasks/r1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = Arc::new(RecordingReporter::default());
        let s = session(&server.uri(), reporter.clone());
        let task_url = format!("{}/tasks/r1", server.uri());
        let result =
            JobResult::from_reply(s.clone(), completed("/x.grib"), Some(task_url), true).unwrap();
        drop(result);
        s.close().await;

        server.verify().await;
        let debug = reporter.at("debug");
        assert!(debug.iter().any(|m| m.contains("in the background")));
        assert!(debug.contains(&"DELETE returns 204 No Content".to_string()));
    }

    #[tokio::test]
    async fn test_delete_failure_is_a_warning() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let reporter = Arc::new(RecordingReporter::default());
        let s = session(&server.uri(), reporter.clone());
        let task_url = format!("{}/tasks/r1", server.uri());
        let result = JobResult::from_reply(s, completed("/x.grib"), Some(task_url), true).unwrap();
        result.delete().await;

        let warnings = reporter.at("warning");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("/tasks/r1 returns 500"));
    }

    #[tokio::test]
    async fn test_check_returns_headers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/x.grib"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-checked", "yes"))
            .mount(&server)
            .await;

        let reporter = Arc::new(RecordingReporter::default());
        let s = session(&server.uri(), reporter);
        let result = JobResult::from_reply(s, completed("/x.grib"), None, false).unwrap();
        let headers = result.check().await.unwrap();
        assert_eq!(headers["x-checked"], "yes");
    }
}
