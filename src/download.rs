//! Resumable downloads
//!
//! The body is streamed into the destination in fixed slices. When the
//! connection drops or the body ends early, the transfer sleeps on its own
//! backoff and resumes with a `Range` request from the bytes already stored.
//! A body that sends nothing for the configured `timeout` counts as dropped.

use crate::error::{Error, Result};
use crate::retry::Backoff;
use crate::session::{Session, ensure_success};
use crate::utils::bytes_to_human_string;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::RANGE;
use reqwest::{Method, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

/// Size of the slices written to the destination
pub const CHUNK_SIZE: usize = 1024;

/// Where downloaded bytes go
pub enum Target<'a> {
    /// A file created (or truncated) by the downloader and closed when done
    Path(PathBuf),
    /// A caller-owned writer; it is flushed but never closed
    Writer(&'a mut (dyn AsyncWrite + Unpin + Send)),
}

impl<'a> Target<'a> {
    /// Wrap any async writer
    pub fn writer<W>(writer: &'a mut W) -> Self
    where
        W: AsyncWrite + Unpin + Send,
    {
        Target::Writer(writer)
    }

    fn describe(&self) -> String {
        match self {
            Target::Path(path) => path.display().to_string(),
            Target::Writer(_) => "<stream>".to_string(),
        }
    }
}

impl std::fmt::Debug for Target<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Target::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl From<PathBuf> for Target<'_> {
    fn from(path: PathBuf) -> Self {
        Target::Path(path)
    }
}

impl From<&Path> for Target<'_> {
    fn from(path: &Path) -> Self {
        Target::Path(path.to_path_buf())
    }
}

impl From<&str> for Target<'_> {
    fn from(path: &str) -> Self {
        Target::Path(PathBuf::from(path))
    }
}

/// The destination while a download is in progress
enum Sink<'a> {
    File(tokio::fs::File),
    Writer(&'a mut (dyn AsyncWrite + Unpin + Send)),
}

impl Sink<'_> {
    fn writer(&mut self) -> &mut (dyn AsyncWrite + Unpin + Send) {
        match self {
            Sink::File(file) => file,
            Sink::Writer(writer) => &mut **writer,
        }
    }

    /// Bytes stored so far: the file size, or the count written to the stream
    async fn offset(&mut self, written: u64) -> Result<u64> {
        self.writer().flush().await?;
        match self {
            Sink::File(file) => Ok(file.metadata().await?.len()),
            Sink::Writer(_) => Ok(written),
        }
    }
}

const BAR_STYLE: &str = "{spinner:.blue} {prefix:>12.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

const BAR_TICKS: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const BAR_CHARS: &str = "█▓▒░  ";

/// Byte progress of one download, drawn on stderr when enabled
struct Progress {
    bar: ProgressBar,
}

impl Progress {
    fn new(enabled: bool, expected: u64, prefix: &str) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new(expected);
        let bar = match ProgressStyle::with_template(BAR_STYLE) {
            Ok(style) => bar.with_style(style.tick_chars(BAR_TICKS).progress_chars(BAR_CHARS)),
            Err(_) => bar,
        };
        bar.set_prefix(prefix.to_string());
        Self { bar }
    }

    fn step(&self, len: u64) {
        self.bar.inc(len);
    }

    /// Realign with the bytes actually stored before the next attempt
    fn resume(&self, stored: u64) {
        self.bar.set_position(stored);
    }

    fn finish(&self, complete: bool) {
        if complete {
            self.bar.finish();
        } else {
            self.bar.abandon();
        }
    }
}

/// How one attempt at reading the body ended
enum Transfer {
    Finished,
    Interrupted(String),
}

/// Download `url` into `target`, resuming until `expected` bytes are stored
///
/// Returns the number of bytes stored.
///
/// # Errors
///
/// - [`Error::Incomplete`] when the byte count still differs from `expected`
///   after `retry_max` attempts
/// - [`Error::Http`] for a non-2xx answer left after the retry wrapper
/// - [`Error::Io`] when the destination cannot be written
pub(crate) async fn fetch_resumable(
    session: &Session,
    url: &Url,
    expected: u64,
    target: Target<'_>,
) -> Result<u64> {
    let config = &session.config;
    session.reporter.info(&format!(
        "Downloading {url} to {} ({})",
        target.describe(),
        bytes_to_human_string(expected as f64)
    ));

    let mut sink = match target {
        Target::Path(path) => Sink::File(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .await?,
        ),
        Target::Writer(writer) => Sink::Writer(writer),
    };

    let start = Instant::now();
    let mut backoff = Backoff::new(
        config.resume_delay,
        Backoff::DEFAULT_FACTOR,
        config.sleep_max,
    );
    let max_tries = config.retry_max.max(1);
    let progress = Progress::new(config.progress, expected, "Downloading");
    let mut tries = 0;
    let mut stored: u64 = 0;

    loop {
        let offset = stored;
        let response = session
            .robust(move || {
                let request = session.request(Method::GET, url.as_str());
                if offset > 0 {
                    request.header(RANGE, format!("bytes={offset}-"))
                } else {
                    request
                }
            })
            .await?;
        let response = ensure_success(response).await?;
        tries += 1;

        // A server ignoring the range replays the body from the start
        let skip = if offset > 0 && response.status() == StatusCode::OK {
            offset
        } else {
            0
        };

        let (written, transfer) =
            copy_body(response, sink.writer(), skip, config.timeout, &progress).await?;
        stored = sink.offset(offset + written).await?;
        progress.resume(stored);

        if stored >= expected {
            break;
        }

        if let Transfer::Interrupted(e) = transfer {
            session
                .reporter
                .error(&format!("Download interrupted: {e}"));
        }
        session.reporter.error(&format!(
            "Download incomplete, downloaded {stored} byte(s) out of {expected}"
        ));

        if tries >= max_tries {
            break;
        }

        let delay = backoff.next_delay();
        session
            .reporter
            .warning(&format!("Sleeping {} seconds", delay.as_secs_f64()));
        tokio::time::sleep(delay).await;
        session
            .reporter
            .warning(&format!("Resuming download at byte {stored}"));
    }

    progress.finish(stored == expected);
    if stored != expected {
        return Err(Error::Incomplete {
            received: stored,
            expected,
        });
    }

    let elapsed = start.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        session.reporter.info(&format!(
            "Download rate {}/s",
            bytes_to_human_string(stored as f64 / elapsed)
        ));
    }

    Ok(stored)
}

/// Stream a response body into `writer`, dropping its first `skip` bytes
///
/// Write failures are fatal; a failing body stream, or one that stays silent
/// for `idle`, only ends the attempt.
async fn copy_body(
    mut response: Response,
    writer: &mut (dyn AsyncWrite + Unpin + Send),
    mut skip: u64,
    idle: Duration,
    progress: &Progress,
) -> Result<(u64, Transfer)> {
    let mut written: u64 = 0;
    loop {
        let chunk = match tokio::time::timeout(idle, response.chunk()).await {
            Ok(Ok(Some(chunk))) => chunk,
            Ok(Ok(None)) => return Ok((written, Transfer::Finished)),
            Ok(Err(e)) => return Ok((written, Transfer::Interrupted(e.to_string()))),
            Err(_) => {
                let stalled = format!("no data received for {} seconds", idle.as_secs_f64());
                return Ok((written, Transfer::Interrupted(stalled)));
            }
        };

        let mut data = &chunk[..];
        if skip > 0 {
            let dropped = usize::try_from(skip).unwrap_or(usize::MAX).min(data.len());
            data = &data[dropped..];
            skip -= dropped as u64;
        }

        for slice in data.chunks(CHUNK_SIZE) {
            writer.write_all(slice).await?;
            written += slice.len() as u64;
            progress.step(slice.len() as u64);
        }
    }
}
