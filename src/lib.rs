//! # cdsapi
//!
//! Async client for climate data store services that work in three steps:
//! submit a request, poll the job until it finishes, download the output.
//!
//! ## Design Philosophy
//!
//! - **Resilient** - transient HTTP failures are retried, interrupted
//!   downloads resume where they stopped
//! - **Configurable** - explicit settings, `CDSAPI_*` environment variables
//!   or a `~/.cdsapirc` file
//! - **Library-first** - progress goes through a [`Reporter`], by default
//!   `tracing` events with target `cdsapi`
//!
//! ## Quick Start
//!
//! ```no_run
//! use cdsapi::{Config, Retrieved, connect};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // url and key come from the environment or ~/.cdsapirc
//!     let client = connect(Config::default())?;
//!
//!     let request = json!({
//!         "variable": "2t",
//!         "product_type": "reanalysis",
//!         "date": "2012-12-01",
//!         "time": "12:00",
//!         "format": "grib"
//!     });
//!
//!     match client.retrieve("reanalysis-era5-single-levels", &request, None).await? {
//!         Retrieved::Ready(result) => {
//!             println!("{} bytes at {}", result.content_length(), result.location());
//!             result.download("download.grib").await?;
//!         }
//!         other => println!("{other:?}"),
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Data-store clients for both protocols
pub mod client;
/// Configuration and credential resolution
pub mod config;
/// Resumable downloads
pub mod download;
/// Error types
pub mod error;
/// Job submission and polling
pub mod job;
/// Progress reporting
pub mod report;
/// Handle on a completed job's output
pub mod result;
/// Retry logic and capped backoff
pub mod retry;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

mod session;

// Re-export commonly used types
pub use client::{ApiKind, DataStore, LegacyClient, TokenClient, connect, connect_with_reporter};
pub use config::{Config, Credentials};
pub use download::Target;
pub use error::{Error, Result};
pub use job::{PendingJob, Retrieved};
pub use report::{CallbackReporter, Reporter, TracingReporter};
pub use result::JobResult;
pub use retry::{Backoff, IsRetryable, RetryPolicy, with_retry};
pub use types::{ErrorContext, JobState, Reply, ReplyError, RequiredTerm, ResultDescriptor};
