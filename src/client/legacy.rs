//! Client for the `/resources` + `/tasks` protocol (`UID:APIKEY` keys)

use super::{ApiKind, DataStore, complete, remote_result};
use crate::config::{Config, Credentials};
use crate::download::Target;
use crate::error::{Error, Result};
use crate::job::{Retrieved, TaskEndpoint, fetch_reply, submit};
use crate::report::{Reporter, TracingReporter};
use crate::result::JobResult;
use crate::session::{Auth, Session};
use crate::types::Reply;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Service that runs workflows
const WORKFLOW_SERVICE: &str = "tool.toolbox.orchestrator.run_workflow";

/// Workflow name used when none is given
const DEFAULT_WORKFLOW_NAME: &str = "application";

/// Task resources live at `{base}/tasks/{request_id}`
struct LegacyTasks {
    base_url: String,
}

#[async_trait]
impl TaskEndpoint for LegacyTasks {
    fn task_url(&self, request_id: &str) -> String {
        format!("{}/tasks/{}", self.base_url, request_id)
    }

    async fn fetch(&self, session: &Session, request_id: &str) -> Result<Reply> {
        fetch_reply(session, &self.task_url(request_id)).await
    }
}

/// Client for services authenticated with a `UID:APIKEY` key
pub struct LegacyClient {
    session: Arc<Session>,
    tasks: Arc<LegacyTasks>,
}

impl LegacyClient {
    /// Resolve credentials from `config` and build a client
    pub fn new(config: Config) -> Result<Self> {
        Self::with_reporter(config, Arc::new(TracingReporter))
    }

    /// Like [`LegacyClient::new`] with a custom reporter
    pub fn with_reporter(config: Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let credentials = config.credentials()?;
        Self::from_credentials(&credentials, config, reporter)
    }

    pub(crate) fn from_credentials(
        credentials: &Credentials,
        config: Config,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        let (user, password) = credentials.key.split_once(':').ok_or_else(|| {
            Error::config("key must be of the form UID:APIKEY", "key")
        })?;
        let auth = Auth::Basic {
            user: user.to_string(),
            password: password.to_string(),
        };
        let session = Arc::new(Session::new(credentials, auth, config, reporter)?);
        let tasks = Arc::new(LegacyTasks {
            base_url: session.base_url.clone(),
        });
        Ok(Self { session, tasks })
    }

    async fn send_job(
        &self,
        method: Method,
        url: String,
        body: &Value,
        cleanup: bool,
        target: Option<Target<'_>>,
    ) -> Result<Retrieved> {
        self.session.announce_status().await;
        let reply: Reply = submit(&self.session, method, &url, body).await?;
        complete(&self.session, self.tasks.clone(), reply, cleanup, target).await
    }
}

impl std::fmt::Debug for LegacyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyClient")
            .field("url", &self.session.base_url)
            .finish()
    }
}

/// Body of a service call
fn service_request(args: &[Value], kwargs: &Value, metadata: Option<&Value>) -> Value {
    let mut request = json!({ "args": args, "kwargs": kwargs });
    if let (Some(metadata), Some(map)) = (metadata, request.as_object_mut()) {
        map.insert("_cds_metadata".to_string(), metadata.clone());
    }
    request
}

/// Service path: dots in the name become path separators
fn service_url(base_url: &str, name: &str) -> String {
    format!(
        "{}/tasks/services/{}/clientid-{}",
        base_url,
        name.replace('.', "/"),
        Uuid::new_v4().simple()
    )
}

#[async_trait]
impl DataStore for LegacyClient {
    fn api_kind(&self) -> ApiKind {
        ApiKind::Legacy
    }

    async fn retrieve(
        &self,
        name: &str,
        request: &Value,
        target: Option<Target<'_>>,
    ) -> Result<Retrieved> {
        let url = format!("{}/resources/{}", self.session.base_url, name);
        let cleanup = self.session.config.delete;
        self.send_job(Method::POST, url, request, cleanup, target)
            .await
    }

    async fn service(&self, name: &str, args: &[Value], kwargs: &Value) -> Result<Retrieved> {
        let url = service_url(&self.session.base_url, name);
        let body = service_request(args, kwargs, self.session.config.metadata.as_ref());
        self.send_job(Method::PUT, url, &body, false, None).await
    }

    async fn workflow(
        &self,
        code: &str,
        args: &[Value],
        kwargs: &Value,
        workflow_name: Option<&str>,
    ) -> Result<Retrieved> {
        let params = json!({
            "code": code,
            "args": args,
            "kwargs": kwargs,
            "workflow_name": workflow_name.unwrap_or(DEFAULT_WORKFLOW_NAME),
        });
        self.service(WORKFLOW_SERVICE, &[params], &json!({})).await
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
    fn test_service_url_replaces_dots() {
        let url = service_url("https://cds.example.com/api/v2", "tool.toolbox.orchestrator.run_workflow");
        let prefix = "https://cds.example.com/api/v2/tasks/services/tool/toolbox/orchestrator/run_workflow/clientid-";
        assert!(url.starts_with(prefix), "{url}");
        let id = &url[prefix.len()..];
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_service_urls_are_unique() {
        let a = service_url("https://x", "a.b");
        let b = service_url("https://x", "a.b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_service_request_metadata() {
        let plain = service_request(&[json!(1)], &json!({"k": "v"}), None);
        assert_eq!(plain, json!({"args": [1], "kwargs": {"k": "v"}}));

        let tagged = service_request(&[], &json!({}), Some(&json!({"app": "demo"})));
        assert_eq!(tagged["_cds_metadata"], json!({"app": "demo"}));
    }

    #[test]
    fn test_key_without_colon_is_rejected() {
        let credentials = Credentials {
            url: "https://cds.example.com/api/v2".into(),
            key: "token-only".into(),
            verify: true,
        };
        let err = LegacyClient::from_credentials(
            &credentials,
            Config::default(),
            Arc::new(TracingReporter),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
