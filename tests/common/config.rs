//! Test configuration helpers and a reporter that records every message

use cdsapi::{Config, Reporter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Config pointing at a mock server, with delays short enough for tests
///
/// Every credential field is explicit so neither the environment nor a
/// `~/.cdsapirc` on the test machine is consulted.
pub fn test_config(url: &str, key: &str) -> Config {
    Config {
        url: Some(url.to_string()),
        key: Some(key.to_string()),
        verify: Some(true),
        timeout: Duration::from_secs(10),
        retry_max: 5,
        retry_delay: Some(Duration::from_millis(10)),
        sleep_max: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
        resume_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Reporter keeping `(level, message)` pairs in order
#[derive(Default)]
pub struct Recorder {
    messages: Mutex<Vec<(String, String)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Messages reported at `level`, in order
    pub fn at(&self, level: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn push(&self, level: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((level.to_string(), message.to_string()));
    }
}

impl Reporter for Recorder {
    fn debug(&self, message: &str) {
        self.push("debug", message);
    }

    fn info(&self, message: &str) {
        self.push("info", message);
    }

    fn warning(&self, message: &str) {
        self.push("warning", message);
    }

    fn error(&self, message: &str) {
        self.push("error", message);
    }
}
