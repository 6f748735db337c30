//! Job submission and the polling state machine
//!
//! A job is submitted once, then its task resource is polled until the state
//! leaves `queued`/`running`:
//!
//! ```text
//! SUBMITTING -> {QUEUED, RUNNING}* -> COMPLETED | FAILED
//! ```
//!
//! The sleep between polls starts at `poll_interval` and grows by 1.5x up to
//! `sleep_max`. The wait timeout is only checked between polls.

use crate::error::{Error, Result};
use crate::result::JobResult;
use crate::retry::Backoff;
use crate::session::{Session, ensure_success, read_json};
use crate::types::{JobState, Reply, ReplyError};
use async_trait::async_trait;
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Where a protocol keeps its task resources
#[async_trait]
pub(crate) trait TaskEndpoint: Send + Sync {
    /// URL of the task resource (polled and deleted)
    fn task_url(&self, request_id: &str) -> String;

    /// Re-fetch the reply of a job
    async fn fetch(&self, session: &Session, request_id: &str) -> Result<Reply>;
}

/// Outcome of a submission
#[derive(Debug)]
pub enum Retrieved {
    /// The job completed and its output can be downloaded
    Ready(JobResult),
    /// The job completed and returned its output inline
    Inline(Value),
    /// The job was submitted but not waited for
    Pending(PendingJob),
}

impl Retrieved {
    /// The result handle, if the job completed with a downloadable output
    pub fn into_result(self) -> Option<JobResult> {
        match self {
            Retrieved::Ready(result) => Some(result),
            _ => None,
        }
    }

    /// The inline payload, if the job returned one
    pub fn into_inline(self) -> Option<Value> {
        match self {
            Retrieved::Inline(value) => Some(value),
            _ => None,
        }
    }

    /// The pending job, if the client did not wait for completion
    pub fn into_pending(self) -> Option<PendingJob> {
        match self {
            Retrieved::Pending(job) => Some(job),
            _ => None,
        }
    }
}

/// Submit a request and decode the accepted reply
///
/// A refusal carrying a JSON error body becomes [`Error::Rejected`]; any other
/// non-2xx answer becomes [`Error::Http`].
pub(crate) async fn submit<T: DeserializeOwned>(
    session: &Session,
    method: Method,
    url: &str,
    body: &Value,
) -> Result<T> {
    session.reporter.info(&format!("Sending request to {url}"));
    session.reporter.debug(&format!("{method} {url} {body}"));

    let response = session
        .robust(|| session.api(method.clone(), url).json(body))
        .await?;

    if !response.status().is_success() {
        return Err(rejection(session, response).await);
    }
    read_json(response).await
}

async fn rejection(session: &Session, response: Response) -> Error {
    let status = response.status();
    let url = response.url().to_string();
    let text = response.text().await.unwrap_or_default();
    session.reporter.debug(&text);

    match serde_json::from_str::<ReplyError>(&text) {
        Ok(body) if body.message.is_some() => Error::Rejected(rejection_message(&body)),
        _ => Error::Http {
            status: status.as_u16(),
            url,
            message: if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("Unknown error").to_string()
            } else {
                text
            },
        },
    }
}

/// Human-readable refusal, with one sentence per licence still to accept
pub(crate) fn rejection_message(body: &ReplyError) -> String {
    let mut parts = vec![body.message().to_string()];
    parts.extend(body.context.required_terms.iter().map(|term| {
        format!(
            "To access this resource, you first need to accept the terms of '{}' at {}",
            term.title, term.url
        )
    }));
    parts.join(". ")
}

/// Remembers the last reported state so each change is announced once
#[derive(Debug, Default)]
pub(crate) struct StateTracker {
    last: Option<JobState>,
}

impl StateTracker {
    /// Record `state`; true when it differs from the previous one
    pub(crate) fn changed(&mut self, state: &JobState) -> bool {
        if self.last.as_ref() == Some(state) {
            return false;
        }
        self.last = Some(state.clone());
        true
    }
}

/// Traceback lines worth reporting: up to the first blank line, or all of them
///
/// The blank-line cut relies on how the server formats tracebacks and is a
/// heuristic, not a contract.
pub(crate) fn traceback_lines(lines: &[String], full_stack: bool) -> &[String] {
    if full_stack {
        return lines;
    }
    let end = lines
        .iter()
        .position(|line| line.trim().is_empty())
        .unwrap_or(lines.len());
    &lines[..end]
}

fn job_failure(session: &Session, reply: &Reply) -> Error {
    let error = reply.error.clone().unwrap_or_default();
    let reporter = &session.reporter;
    reporter.error(&format!("Message: {}", error.message()));
    reporter.error(&format!("Reason:  {}", error.reason()));
    for line in traceback_lines(&error.context.traceback, session.config.full_stack) {
        reporter.error(&format!("  {line}"));
    }
    Error::JobFailed {
        message: error.message().to_string(),
        reason: error.reason().to_string(),
    }
}

/// A submitted job and its last known reply
///
/// Returned directly when the client does not wait for completion; call
/// [`PendingJob::update`] to poll by hand or [`PendingJob::wait`] to block until
/// the job finishes.
pub struct PendingJob {
    session: Arc<Session>,
    endpoint: Arc<dyn TaskEndpoint>,
    reply: Reply,
    cleanup: bool,
    submitted_at: Instant,
}

impl std::fmt::Debug for PendingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingJob")
            .field("reply", &self.reply)
            .field("cleanup", &self.cleanup)
            .finish()
    }
}

impl PendingJob {
    pub(crate) fn new(
        session: Arc<Session>,
        endpoint: Arc<dyn TaskEndpoint>,
        reply: Reply,
        cleanup: bool,
    ) -> Self {
        Self {
            session,
            endpoint,
            reply,
            cleanup,
            submitted_at: Instant::now(),
        }
    }

    /// Last reply received from the server
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    /// Last known state
    pub fn state(&self) -> &JobState {
        &self.reply.state
    }

    /// Server-side id of the job
    pub fn request_id(&self) -> Option<&str> {
        self.reply.request_id.as_deref()
    }

    fn require_request_id(&self) -> Result<String> {
        self.reply.request_id.clone().ok_or_else(|| {
            Error::Protocol(format!(
                "reply in state {} carries no request_id",
                self.reply.state
            ))
        })
    }

    /// Re-fetch the reply once
    pub async fn update(&mut self) -> Result<&Reply> {
        let request_id = self.require_request_id()?;
        self.reply = self.endpoint.fetch(&self.session, &request_id).await?;
        Ok(&self.reply)
    }

    /// Poll until the job completes or fails
    ///
    /// # Errors
    ///
    /// - [`Error::JobFailed`] when the server reports `failed`
    /// - [`Error::UnknownState`] for any unrecognised state
    /// - [`Error::Timeout`] when `wait_timeout` elapses since submission
    /// - transport errors left over after the retry budget
    pub async fn wait(mut self) -> Result<Retrieved> {
        let session = self.session.clone();
        let config = &session.config;
        let mut backoff = Backoff::new(
            config.poll_interval,
            Backoff::DEFAULT_FACTOR,
            config.sleep_max,
        );
        let mut tracker = StateTracker::default();

        loop {
            session.reporter.debug(&format!(
                "REPLY {}",
                serde_json::to_string(&self.reply).unwrap_or_default()
            ));

            let state = self.reply.state.clone();
            if tracker.changed(&state) {
                session.reporter.info(&format!("Request is {state}"));
            }

            match state {
                JobState::Completed => {
                    session.reporter.debug("Done");
                    return self.into_retrieved();
                }
                JobState::Queued | JobState::Running => {
                    let request_id = self.require_request_id()?;

                    if let Some(limit) = config.wait_timeout
                        && self.submitted_at.elapsed() > limit
                    {
                        return Err(Error::Timeout(limit));
                    }

                    let delay = backoff.next_delay();
                    session.reporter.debug(&format!(
                        "Request ID is {request_id}, sleep {}",
                        delay.as_secs_f64()
                    ));
                    tokio::time::sleep(delay).await;

                    self.reply = self.endpoint.fetch(&session, &request_id).await?;
                }
                JobState::Failed => return Err(job_failure(&session, &self.reply)),
                JobState::Unknown(other) => return Err(Error::UnknownState(other)),
            }
        }
    }

    fn into_retrieved(mut self) -> Result<Retrieved> {
        if let Some(payload) = self.reply.result.take() {
            return Ok(Retrieved::Inline(payload));
        }
        let task_url = self
            .reply
            .request_id
            .as_deref()
            .map(|id| self.endpoint.task_url(id));
        let result = JobResult::from_reply(self.session, self.reply, task_url, self.cleanup)?;
        Ok(Retrieved::Ready(result))
    }
}

/// Fetch a task resource and decode it as a [`Reply`]
pub(crate) async fn fetch_reply(session: &Session, task_url: &str) -> Result<Reply> {
    session.reporter.debug(&format!("GET {task_url}"));
    let response = session
        .robust(|| session.api(Method::GET, task_url))
        .await?;
    read_json(ensure_success(response).await?).await
}
