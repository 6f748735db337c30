//! Reporting collaborator injected into every client
//!
//! Core code never logs directly: it reports progress and problems through a
//! [`Reporter`] handed to the client at construction. [`TracingReporter`] is the
//! default and forwards to `tracing`; [`CallbackReporter`] routes each level to a
//! caller-supplied closure.

use std::sync::Arc;

/// Sink for user-facing messages emitted while a job is processed
pub trait Reporter: Send + Sync {
    /// Request/response details useful when debugging
    fn debug(&self, message: &str);
    /// Lifecycle progress (state changes, download rate)
    fn info(&self, message: &str);
    /// Recoverable problems (retries, failed cleanup)
    fn warning(&self, message: &str);
    /// Job failures and their tracebacks
    fn error(&self, message: &str);
}

/// Reporter forwarding every message to `tracing` under the `cdsapi` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "cdsapi", "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "cdsapi", "{message}");
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "cdsapi", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "cdsapi", "{message}");
    }
}

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

/// Reporter calling user closures, falling back to [`TracingReporter`] for
/// levels without a callback
///
/// # Example
///
/// ```
/// use cdsapi::report::{CallbackReporter, Reporter};
///
/// let reporter = CallbackReporter::new().on_info(|msg| println!("[cds] {msg}"));
/// reporter.info("Request is queued");
/// ```
#[derive(Clone, Default)]
pub struct CallbackReporter {
    debug: Option<Callback>,
    info: Option<Callback>,
    warning: Option<Callback>,
    error: Option<Callback>,
}

impl CallbackReporter {
    /// Create a reporter with no callbacks
    pub fn new() -> Self {
        Self::default()
    }

    /// Route debug messages to `f`
    pub fn on_debug(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.debug = Some(Arc::new(f));
        self
    }

    /// Route info messages to `f`
    pub fn on_info(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.info = Some(Arc::new(f));
        self
    }

    /// Route warnings to `f`
    pub fn on_warning(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.warning = Some(Arc::new(f));
        self
    }

    /// Route errors to `f`
    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for CallbackReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackReporter")
            .field("debug", &self.debug.is_some())
            .field("info", &self.info.is_some())
            .field("warning", &self.warning.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl Reporter for CallbackReporter {
    fn debug(&self, message: &str) {
        match &self.debug {
            Some(f) => f(message),
            None => TracingReporter.debug(message),
        }
    }

    fn info(&self, message: &str) {
        match &self.info {
            Some(f) => f(message),
            None => TracingReporter.info(message),
        }
    }

    fn warning(&self, message: &str) {
        match &self.warning {
            Some(f) => f(message),
            None => TracingReporter.warning(message),
        }
    }

    fn error(&self, message: &str) {
        match &self.error {
            Some(f) => f(message),
            None => TracingReporter.error(message),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Reporter keeping every message for assertions
    #[derive(Default)]
    pub(crate) struct RecordingReporter {
        pub(crate) messages: Mutex<Vec<(&'static str, String)>>,
    }

    impl RecordingReporter {
        pub(crate) fn at(&self, level: &str) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl Reporter for RecordingReporter {
        fn debug(&self, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push(("debug", message.to_string()));
        }

        fn info(&self, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push(("info", message.to_string()));
        }

        fn warning(&self, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push(("warning", message.to_string()));
        }

        fn error(&self, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push(("error", message.to_string()));
        }
    }

    #[test]
    fn callback_reporter_routes_levels() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let info_seen = seen.clone();
        let warn_seen = seen.clone();
        let reporter = CallbackReporter::new()
            .on_info(move |m| info_seen.lock().unwrap().push(format!("info:{m}")))
            .on_warning(move |m| warn_seen.lock().unwrap().push(format!("warn:{m}")));

        reporter.info("a");
        reporter.warning("b");
        // no callback: goes to tracing, not to our vector
        reporter.error("c");

        assert_eq!(*seen.lock().unwrap(), vec!["info:a", "warn:b"]);
    }
}
