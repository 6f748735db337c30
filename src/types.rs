//! Core types for cdsapi

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// State of a server-side job as reported in a [`Reply`]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    /// Accepted and waiting for resources
    Queued,
    /// Being processed
    Running,
    /// Finished; the output is available
    Completed,
    /// Finished with an error
    Failed,
    /// A state this client does not know; always fatal
    Unknown(String),
}

impl JobState {
    /// Whether polling must stop at this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether the job is still in progress
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }

    /// Wire representation of the state
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Unknown(s) => s,
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Unknown(String::new())
    }
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => JobState::Queued,
            "running" => JobState::Running,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            _ => JobState::Unknown(s),
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_string()
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status document returned by submit and poll calls
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Current job state
    #[serde(default)]
    pub state: JobState,

    /// Opaque job id, present once the job is queued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Download location (absolute or relative to the service URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Exact size of the output in bytes
    #[serde(
        default,
        deserialize_with = "lenient_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub content_length: Option<u64>,

    /// MIME type of the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Output returned inline instead of through a download location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure details, present in the `failed` state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

/// Error object attached to a failed reply or a rejected submission
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    /// Short description of the failure
    #[serde(default, alias = "title")]
    pub message: Option<String>,

    /// Reason given by the server
    #[serde(default, alias = "detail")]
    pub reason: Option<String>,

    /// Extra diagnostics
    #[serde(default)]
    pub context: ErrorContext,
}

impl ReplyError {
    /// Message, or an empty string
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// Reason, or an empty string
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

/// Diagnostics attached to a [`ReplyError`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Server-side traceback, one entry per line
    #[serde(default, deserialize_with = "lines")]
    pub traceback: Vec<String>,

    /// Licences the user must accept before the resource can be retrieved
    #[serde(default)]
    pub required_terms: Vec<RequiredTerm>,
}

/// A licence the user has not accepted yet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredTerm {
    /// Licence title
    pub title: String,
    /// Page where the licence can be accepted
    pub url: String,
}

/// JSON description of a downloadable result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDescriptor {
    /// Always "url"
    pub result_type: String,
    /// MIME type of the output
    pub content_type: Option<String>,
    /// Size of the output in bytes
    pub content_length: u64,
    /// Absolute download URL
    pub location: String,
}

/// Accepts `123`, `"123"` or `null`
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Accepts a newline-separated string or a list of lines
fn lines<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrLines {
        Text(String),
        Lines(Vec<String>),
    }

    Ok(match Option::<TextOrLines>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(TextOrLines::Text(s)) => s.split('\n').map(str::to_string).collect(),
        Some(TextOrLines::Lines(v)) => v,
    })
}
