//! Data-store clients
//!
//! Two protocols share the poll loop, the downloader and the result handle:
//! - [`legacy`] - `/resources` and `/tasks` endpoints with `UID:KEY` basic auth
//! - [`token`] - the processes API authenticated by a personal access token
//!
//! [`connect`] resolves the credentials and picks the protocol from the shape
//! of the key.

pub mod legacy;
pub mod token;

pub use legacy::LegacyClient;
pub use token::TokenClient;

use crate::config::Config;
use crate::download::Target;
use crate::error::{Error, Result};
use crate::job::{PendingJob, Retrieved, TaskEndpoint};
use crate::report::{Reporter, TracingReporter};
use crate::result::JobResult;
use crate::session::{Session, ensure_success};
use crate::types::Reply;
use crate::utils::filename_from_url;
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Protocol spoken by a client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiKind {
    /// `/resources` + `/tasks`, basic auth
    Legacy,
    /// `/retrieve/v1` processes API, token auth
    Token,
}

/// Operations offered by a data-store client
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Protocol this client speaks
    fn api_kind(&self) -> ApiKind;

    /// Submit a retrieval for dataset `name` and wait for it
    ///
    /// When `target` is given and the job completes with a downloadable
    /// output, the output is downloaded into it before returning.
    async fn retrieve(
        &self,
        name: &str,
        request: &Value,
        target: Option<Target<'_>>,
    ) -> Result<Retrieved>;

    /// Invoke a named server-side service; its results are never deleted
    async fn service(&self, name: &str, args: &[Value], kwargs: &Value) -> Result<Retrieved>;

    /// Run workflow `code` through the orchestrator service
    ///
    /// `workflow_name` defaults to `"application"`.
    async fn workflow(
        &self,
        code: &str,
        args: &[Value],
        kwargs: &Value,
        workflow_name: Option<&str>,
    ) -> Result<Retrieved>;

    /// Service status banner
    async fn status(&self) -> Result<Value>;

    /// Wrap an arbitrary URL as a result handle, sized with a HEAD request
    async fn remote(&self, url: &str) -> Result<JobResult>;

    /// Wait for the deletions started by dropped result handles
    ///
    /// Call it before the runtime shuts down; a deletion still in flight at
    /// that point never reaches the server.
    async fn close(&self);

    /// Download several results
    ///
    /// `targets`, when given, must have one path per result; otherwise each
    /// file is named after its URL. Returns the paths written.
    async fn download(
        &self,
        results: &[JobResult],
        targets: Option<&[PathBuf]>,
    ) -> Result<Vec<PathBuf>> {
        if let Some(targets) = targets
            && targets.len() != results.len()
        {
            return Err(Error::InvalidArgument(format!(
                "got {} target(s) for {} result(s)",
                targets.len(),
                results.len()
            )));
        }

        let mut paths = Vec::with_capacity(results.len());
        for (i, result) in results.iter().enumerate() {
            let path = match targets {
                Some(targets) => targets[i].clone(),
                None => filename_from_url(result.location()),
            };
            result.download(Target::Path(path.clone())).await?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Connect with the default tracing reporter
///
/// # Example
///
/// ```no_run
/// use cdsapi::{Config, connect};
/// use serde_json::json;
///
/// # async fn example() -> cdsapi::Result<()> {
/// let client = connect(Config::default())?;
/// let request = json!({"variable": "2t", "product_type": "reanalysis", "date": "2012-12-01", "time": "12:00"});
/// client
///     .retrieve("reanalysis-era5-single-levels", &request, Some("download.grib".into()))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub fn connect(config: Config) -> Result<Box<dyn DataStore>> {
    connect_with_reporter(config, Arc::new(TracingReporter))
}

/// Connect, reporting progress through `reporter`
///
/// A key of the form `UID:APIKEY` selects [`LegacyClient`]; any other key is
/// a personal access token and selects [`TokenClient`].
pub fn connect_with_reporter(
    config: Config,
    reporter: Arc<dyn Reporter>,
) -> Result<Box<dyn DataStore>> {
    let credentials = config.credentials()?;
    if credentials.is_basic_auth() {
        Ok(Box::new(LegacyClient::from_credentials(
            &credentials,
            config,
            reporter,
        )?))
    } else {
        Ok(Box::new(TokenClient::from_credentials(
            &credentials,
            config,
            reporter,
        )?))
    }
}

/// Turn an accepted submission into a [`Retrieved`] outcome
///
/// Waits for completion unless the client is detached, then downloads into
/// `target` when there is one.
pub(crate) async fn complete(
    session: &Arc<Session>,
    endpoint: Arc<dyn TaskEndpoint>,
    reply: Reply,
    cleanup: bool,
    target: Option<Target<'_>>,
) -> Result<Retrieved> {
    let job = PendingJob::new(session.clone(), endpoint, reply, cleanup);
    if !session.config.wait_until_complete {
        return Ok(Retrieved::Pending(job));
    }

    let outcome = job.wait().await?;
    if let (Retrieved::Ready(result), Some(target)) = (&outcome, target) {
        result.download(target).await?;
    }
    Ok(outcome)
}

/// HEAD `url` and wrap it as a result handle without cleanup
pub(crate) async fn remote_result(session: &Arc<Session>, url: &str) -> Result<JobResult> {
    let location = Url::parse(url)?;
    session.reporter.debug(&format!("HEAD {url}"));
    let response = session.robust(|| session.api(Method::HEAD, url)).await?;
    let response = ensure_success(response).await?;

    let headers = response.headers();
    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| Error::Protocol(format!("{url} did not report a content-length")))?;
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Ok(JobResult::remote(
        session.clone(),
        location,
        content_length,
        content_type,
    ))
}
