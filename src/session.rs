//! Authenticated HTTP session shared by every operation of a client

use crate::config::{Config, Credentials};
use crate::error::{Error, Result};
use crate::report::Reporter;
use crate::retry::with_retry;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// How requests are authenticated
#[derive(Clone)]
pub(crate) enum Auth {
    /// `uid:secret` sent as HTTP basic auth
    Basic { user: String, password: String },
    /// Personal access token sent in the `PRIVATE-TOKEN` header
    Token(String),
}

/// Connection pool, settings and reporter of one client
///
/// Created once per client and shared read-only (behind an `Arc`) with every
/// job, result handle and download issued through it.
pub(crate) struct Session {
    http: reqwest::Client,
    auth: Auth,
    /// Service base URL, without trailing slash
    pub(crate) base_url: String,
    pub(crate) config: Config,
    pub(crate) reporter: Arc<dyn Reporter>,
    /// Background deletions started when result handles were dropped
    cleanups: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn new(
        credentials: &Credentials,
        auth: Auth,
        config: Config,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cdsapi-rs/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.timeout)
            .danger_accept_invalid_certs(!credentials.verify)
            .build()?;

        reporter.debug(&format!(
            "CDSAPI url={} verify={} timeout={:?} wait_timeout={:?} sleep_max={:?} retry_max={} full_stack={} delete={} progress={} wait_until_complete={}",
            credentials.url,
            credentials.verify,
            config.timeout,
            config.wait_timeout,
            config.sleep_max,
            config.retry_max,
            config.full_stack,
            config.delete,
            config.progress,
            config.wait_until_complete,
        ));

        Ok(Self {
            http,
            auth,
            base_url: credentials.url.clone(),
            config,
            reporter,
            cleanups: Mutex::new(Vec::new()),
        })
    }

    /// Authenticated request without a total timeout (downloads)
    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth {
            Auth::Basic { user, password } => builder.basic_auth(user, Some(password)),
            Auth::Token(token) => builder.header("PRIVATE-TOKEN", token),
        }
    }

    /// Authenticated API request bounded by the configured timeout
    pub(crate) fn api(&self, method: Method, url: &str) -> RequestBuilder {
        self.request(method, url).timeout(self.config.timeout)
    }

    /// Send a request through the retry wrapper
    ///
    /// `build` is invoked once per attempt. The returned response may still
    /// carry an error status; pass it to [`ensure_success`] when that matters.
    pub(crate) async fn robust<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let policy = self.config.retry_policy();
        let response = with_retry(&policy, self.reporter.as_ref(), || build().send()).await?;
        Ok(response)
    }

    /// Service status banner (`{base}/status.json`)
    pub(crate) async fn status(&self) -> Result<Value> {
        let url = format!("{}/status.json", self.base_url);
        self.reporter.debug(&format!("GET {url}"));
        let response = self.robust(|| self.api(Method::GET, &url)).await?;
        let response = ensure_success(response).await?;
        read_json(response).await
    }

    /// Keep a background deletion so [`Session::close`] can wait for it
    pub(crate) fn track_cleanup(&self, handle: JoinHandle<()>) {
        let mut cleanups = self.cleanups.lock().unwrap_or_else(|e| e.into_inner());
        cleanups.retain(|h| !h.is_finished());
        cleanups.push(handle);
    }

    /// Wait for every background deletion started so far
    pub(crate) async fn close(&self) {
        let pending = {
            let mut cleanups = self.cleanups.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *cleanups)
        };
        if !pending.is_empty() {
            self.reporter
                .debug(&format!("Waiting for {} pending deletion(s)", pending.len()));
        }
        for handle in pending {
            if let Err(e) = handle.await {
                self.reporter.warning(&format!("Deletion task failed: {e}"));
            }
        }
    }

    /// Report the banner's info, warning and error messages; failures are only logged
    pub(crate) async fn announce_status(&self) {
        let status = match self.status().await {
            Ok(status) => status,
            Err(e) => {
                self.reporter.debug(&format!("status.json unavailable: {e}"));
                return;
            }
        };

        for level in ["info", "warning", "error"] {
            for message in banner_messages(&status, level) {
                match level {
                    "info" => self.reporter.info(&message),
                    "warning" => self.reporter.warning(&message),
                    _ => self.reporter.error(&message),
                }
            }
        }
    }
}

/// Turn a non-2xx response into [`Error::Http`]
pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let text = response.text().await.unwrap_or_default();
    let message = if text.trim().is_empty() {
        status.canonical_reason().unwrap_or("Unknown error").to_string()
    } else {
        text
    };
    Err(Error::Http {
        status: status.as_u16(),
        url,
        message,
    })
}

/// Deserialize a JSON body
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Messages of one level in a status banner; a level may be a string or a list of strings
fn banner_messages(status: &Value, level: &str) -> Vec<String> {
    match status.get(level) {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
