//! Utility functions for sizes, URLs and file names

use crate::error::Result;
use std::path::PathBuf;
use url::Url;

const UNITS: [&str; 6] = ["", "K", "M", "G", "T", "P"];

/// Format a byte count with binary-magnitude units
///
/// The value is divided by 1024 until it drops below 1024 (or the largest
/// unit is reached), rounded to one decimal, and printed without a trailing
/// `.0`.
///
/// # Examples
///
/// ```
/// use cdsapi::utils::bytes_to_human_string;
///
/// assert_eq!(bytes_to_human_string(1.0), "1");
/// assert_eq!(bytes_to_human_string(1536.0), "1.5K");
/// assert_eq!(bytes_to_human_string((1u64 << 30) as f64), "1G");
/// ```
#[must_use]
pub fn bytes_to_human_string(bytes: f64) -> String {
    let mut n = bytes;
    let mut unit = 0;
    while n >= 1024.0 && unit < UNITS.len() - 1 {
        n /= 1024.0;
        unit += 1;
    }

    let rounded = (n * 10.0 + 0.5).floor() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{}{}", rounded as u64, UNITS[unit])
    } else {
        format!("{:.1}{}", rounded, UNITS[unit])
    }
}

/// Resolve a reply `location` against the service base URL
///
/// Absolute locations are returned unchanged; relative ones follow URL-join
/// rules (a leading `/` replaces the whole path of the base).
pub fn resolve_location(base: &str, location: &str) -> Result<Url> {
    let base = Url::parse(base)?;
    Ok(base.join(location)?)
}

/// Local file name for a download URL: its last non-empty path segment
///
/// Falls back to `"download"` when the URL has no usable segment.
#[must_use]
pub fn filename_from_url(url: &Url) -> PathBuf {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("download"))
}
