//! Configuration types for cdsapi
//!
//! [`Config`] holds every tunable of a client. Connection settings (`url`,
//! `key`, `verify`) may be left empty and are then resolved per field, in order:
//! the explicit `Config` value, the `CDSAPI_URL` / `CDSAPI_KEY` /
//! `CDSAPI_VERIFY` environment variables, the rc file (`CDSAPI_RC`, or
//! `~/.cdsapirc`), and finally the built-in default (TLS verification on).

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the service base URL
pub const URL_ENV: &str = "CDSAPI_URL";
/// Environment variable holding the credential
pub const KEY_ENV: &str = "CDSAPI_KEY";
/// Environment variable toggling TLS peer verification
pub const VERIFY_ENV: &str = "CDSAPI_VERIFY";
/// Environment variable pointing at an alternative rc file
pub const RC_ENV: &str = "CDSAPI_RC";
/// Default rc file name, looked up in the home directory
pub const RC_FILE_NAME: &str = ".cdsapirc";

/// Main configuration for a data store client
///
/// # Example
///
/// ```
/// use cdsapi::Config;
/// use std::time::Duration;
///
/// let config = Config {
///     url: Some("https://cds.climate.copernicus.eu/api/v2".to_string()),
///     key: Some("12345:abcdef".to_string()),
///     wait_timeout: Some(Duration::from_secs(3600)),
///     ..Default::default()
/// };
/// assert!(!config.delete);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Service base URL (resolved from env/rc file when `None`)
    #[serde(default)]
    pub url: Option<String>,

    /// Credential: `uid:secret` for basic auth, anything else is a personal access token
    #[serde(default)]
    pub key: Option<String>,

    /// Verify the server's TLS certificate (default: true)
    #[serde(default)]
    pub verify: Option<bool>,

    /// Alternative rc file (default: `$CDSAPI_RC`, then `~/.cdsapirc`)
    #[serde(default)]
    pub rc_path: Option<PathBuf>,

    /// Per-request timeout for API calls; downloads use it to connect and as the
    /// longest wait for the next body chunk (default: 60 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Give up waiting for a job after this long (default: wait forever)
    #[serde(default, with = "optional_duration_serde")]
    pub wait_timeout: Option<Duration>,

    /// Maximum attempts per HTTP call and per download (default: 500)
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,

    /// Ceiling for poll and resume backoff (default: 120 seconds)
    #[serde(default = "default_sleep_max", with = "duration_serde")]
    pub sleep_max: Duration,

    /// Fixed delay between retries of one HTTP call (default: `sleep_max`)
    #[serde(default, with = "optional_duration_serde")]
    pub retry_delay: Option<Duration>,

    /// First sleep between two polls (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// First sleep before resuming an interrupted download (default: 10 seconds)
    #[serde(default = "default_resume_delay", with = "duration_serde")]
    pub resume_delay: Duration,

    /// Report the complete server traceback of failed jobs (default: false)
    #[serde(default)]
    pub full_stack: bool,

    /// Delete the server-side task once its result handle is dropped (default: false)
    #[serde(default)]
    pub delete: bool,

    /// Draw a progress bar on stderr while downloading (default: false)
    #[serde(default)]
    pub progress: bool,

    /// Poll submitted jobs until they finish; when false the job is returned pending (default: true)
    #[serde(default = "default_true")]
    pub wait_until_complete: bool,

    /// Extra metadata attached to service requests as `_cds_metadata`
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            verify: None,
            rc_path: None,
            timeout: default_timeout(),
            wait_timeout: None,
            retry_max: default_retry_max(),
            sleep_max: default_sleep_max(),
            retry_delay: None,
            poll_interval: default_poll_interval(),
            resume_delay: default_resume_delay(),
            full_stack: false,
            delete: false,
            progress: false,
            wait_until_complete: true,
            metadata: None,
        }
    }
}

/// Connection settings after resolution
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Service base URL, without trailing slash
    pub url: String,
    /// Credential as configured
    pub key: String,
    /// Verify the server's TLS certificate
    pub verify: bool,
}

impl Credentials {
    /// Whether the key has the `uid:secret` shape used for basic auth
    pub fn is_basic_auth(&self) -> bool {
        self.key.contains(':')
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .field("verify", &self.verify)
            .finish()
    }
}

impl Config {
    /// Resolve connection settings from this config, the process environment and the rc file
    pub fn credentials(&self) -> Result<Credentials> {
        self.credentials_from(|name| std::env::var(name).ok())
    }

    /// Resolve connection settings using `env` to read environment variables
    pub fn credentials_from(&self, env: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let rc_path = self
            .rc_path
            .clone()
            .or_else(|| env(RC_ENV).map(PathBuf::from))
            .or_else(|| home::home_dir().map(|home| home.join(RC_FILE_NAME)));

        let url = self.url.clone().or_else(|| env(URL_ENV));
        let key = self.key.clone().or_else(|| env(KEY_ENV));
        let verify = match self.verify {
            Some(v) => Some(v),
            None => env(VERIFY_ENV)
                .map(|v| parse_flag(&v, VERIFY_ENV))
                .transpose()?,
        };

        let rc = match &rc_path {
            Some(path) if (url.is_none() || key.is_none() || verify.is_none()) && path.exists() => {
                RcFile::load(path)?
            }
            _ => RcFile::default(),
        };

        let missing = || {
            let location = rc_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| RC_FILE_NAME.to_string());
            format!("Missing/incomplete configuration file: {location}")
        };

        let url = url
            .or(rc.url)
            .ok_or_else(|| Error::config(missing(), "url"))?;
        let key = key
            .or(rc.key)
            .ok_or_else(|| Error::config(missing(), "key"))?;
        let verify = match verify {
            Some(v) => v,
            None => rc
                .verify
                .map(|v| parse_flag(&v, "verify"))
                .transpose()?
                .unwrap_or(true),
        };

        Ok(Credentials {
            url: url.trim_end_matches('/').to_string(),
            key,
            verify,
        })
    }

    /// Retry policy applied to every HTTP call
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max,
            delay: self.retry_delay.unwrap_or(self.sleep_max),
        }
    }
}

/// Values read from an rc file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct RcFile {
    pub(crate) url: Option<String>,
    pub(crate) key: Option<String>,
    pub(crate) verify: Option<String>,
}

impl RcFile {
    /// Read and parse an rc file
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse `key: value` lines; unknown keys and lines without `:` are ignored
    pub(crate) fn parse(text: &str) -> Self {
        let mut rc = Self::default();
        for line in text.lines() {
            let Some((name, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = Some(value.trim().to_string());
            match name.trim() {
                "url" => rc.url = value,
                "key" => rc.key = value,
                "verify" => rc.verify = value,
                _ => {}
            }
        }
        rc
    }
}

fn parse_flag(value: &str, key: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Ok(true),
        "false" | "no" | "off" => Ok(false),
        other => other
            .parse::<i64>()
            .map(|n| n != 0)
            .map_err(|_| Error::config(format!("invalid boolean for {key}: {value:?}"), key)),
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_max() -> u32 {
    500
}

fn default_sleep_max() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_resume_delay() -> Duration {
    Duration::from_secs(10)
}

// Duration serialization helper (fractional seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
