//! Upload request header parsing.
//!
//! Turns the `x-zipline-*` option headers into an [`UploadOptions`] and the
//! chunk headers into a [`PartialChunk`]. Both parsers are pure: they never
//! touch storage and never panic on malformed input.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use http::HeaderMap;
use percent_encoding::percent_decode_str;
use rand::seq::SliceRandom;
use uuid::Uuid;

use zipline_core::config::FilesConfig;
use zipline_core::error::AppError;
use zipline_entity::upload::UploadOptions;

/// Option header names.
pub mod names {
    pub const DELETES_AT: &str = "x-zipline-deletes-at";
    pub const FORMAT: &str = "x-zipline-format";
    pub const PASSWORD: &str = "x-zipline-password";
    pub const MAX_VIEWS: &str = "x-zipline-max-views";
    pub const ORIGINAL_NAME: &str = "x-zipline-original-name";
    pub const FOLDER: &str = "x-zipline-folder";
    pub const FILENAME: &str = "x-zipline-filename";
    pub const FILE_EXTENSION: &str = "x-zipline-file-extension";
    pub const DOMAIN: &str = "x-zipline-domain";
    pub const FILE_OVERWRITE: &str = "x-zipline-file-overwrite";

    pub const CONTENT_RANGE: &str = "content-range";
    pub const PARTIAL_FILENAME: &str = "x-zipline-p-filename";
    pub const PARTIAL_CONTENT_TYPE: &str = "x-zipline-p-content-type";
    pub const PARTIAL_IDENTIFIER: &str = "x-zipline-p-identifier";
    pub const PARTIAL_LASTCHUNK: &str = "x-zipline-p-lastchunk";
    pub const PARTIAL_CONTENT_LENGTH: &str = "x-zipline-p-content-length";
}

/// A malformed or missing upload header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HeaderError {
    /// Offending header name.
    pub header: &'static str,
    /// Human-readable reason.
    pub message: String,
}

impl HeaderError {
    /// Create an error for `header`.
    pub fn new(header: &'static str, message: impl Into<String>) -> Self {
        Self {
            header,
            message: message.into(),
        }
    }
}

impl From<HeaderError> for AppError {
    fn from(err: HeaderError) -> Self {
        AppError::validation(format!("{} ({})", err.message, err.header))
    }
}

/// One chunk of a partial upload as described by its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialChunk {
    /// Client file name, percent-decoded.
    pub filename: String,
    /// Client content type.
    pub content_type: String,
    /// Session identifier. `None` on the first chunk.
    pub identifier: Option<String>,
    /// Whether this is the final chunk.
    pub last_chunk: bool,
    /// Inclusive start offset.
    pub start: u64,
    /// Exclusive end offset.
    pub end: u64,
    /// Declared total size.
    pub total: u64,
}

impl PartialChunk {
    /// Whether this chunk opens a new session.
    pub fn is_first(&self) -> bool {
        self.start == 0
    }

    /// Body length this chunk must carry.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the chunk carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, HeaderError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| HeaderError::new(name, format!("Invalid {name} header encoding"))),
    }
}

fn decode(name: &'static str, value: &str) -> Result<String, HeaderError> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .map_err(|_| HeaderError::new(name, "Invalid URL encoding"))
}

/// Parse the option headers of the first chunk.
pub fn parse_upload_headers(
    headers: &HeaderMap,
    config: &FilesConfig,
) -> Result<UploadOptions, HeaderError> {
    parse_upload_headers_at(headers, config, Utc::now())
}

/// [`parse_upload_headers`] with an explicit clock.
pub fn parse_upload_headers_at(
    headers: &HeaderMap,
    config: &FilesConfig,
    now: DateTime<Utc>,
) -> Result<UploadOptions, HeaderError> {
    let mut options = UploadOptions {
        format: config.default_format,
        ..Default::default()
    };

    match header(headers, names::DELETES_AT)? {
        Some(value) => {
            options.deletes_at = Some(
                parse_expiry(value, now)
                    .ok_or_else(|| HeaderError::new(names::DELETES_AT, "Invalid expiry date"))?,
            );
        }
        None => {
            if let Some(default) = &config.default_expiration {
                options.deletes_at = Some(
                    parse_expiry(default, now)
                        .ok_or_else(|| HeaderError::new(names::DELETES_AT, "Invalid expiry date"))?,
                );
            }
        }
    }

    if let Some(value) = header(headers, names::FORMAT)? {
        options.format = value
            .to_lowercase()
            .parse()
            .map_err(|_| HeaderError::new(names::FORMAT, "Invalid format"))?;
    }

    if let Some(value) = header(headers, names::PASSWORD)? {
        if !value.is_empty() {
            options.password = Some(value.to_string());
        }
    }

    if let Some(value) = header(headers, names::MAX_VIEWS)? {
        let views: i32 = value
            .parse()
            .map_err(|_| HeaderError::new(names::MAX_VIEWS, "Invalid max views (NaN)"))?;
        if views < 0 {
            return Err(HeaderError::new(names::MAX_VIEWS, "Invalid max views (max views < 0)"));
        }
        options.max_views = Some(views);
    }

    if let Some(value) = header(headers, names::ORIGINAL_NAME)? {
        options.add_original_name = value == "true";
    }

    if let Some(value) = header(headers, names::FOLDER)? {
        options.folder = Some(
            Uuid::parse_str(value)
                .map_err(|_| HeaderError::new(names::FOLDER, "Invalid folder id"))?,
        );
    }

    if let Some(value) = header(headers, names::FILENAME)? {
        let name = decode(names::FILENAME, value)?;
        if !name.is_empty() {
            options.override_filename = Some(name);
        }
    }

    if let Some(value) = header(headers, names::FILE_EXTENSION)? {
        if !value.is_empty() {
            options.override_extension = Some(if value.starts_with('.') {
                value.to_string()
            } else {
                format!(".{value}")
            });
        }
    }

    if let Some(value) = header(headers, names::DOMAIN)? {
        let domains: Vec<&str> = value.split(',').map(str::trim).filter(|d| !d.is_empty()).collect();
        options.override_domain = domains
            .choose(&mut rand::thread_rng())
            .map(|d| (*d).to_string());
    }

    if let Some(value) = header(headers, names::FILE_OVERWRITE)? {
        options.overwrite = match value {
            "true" => true,
            "false" => false,
            _ => {
                return Err(HeaderError::new(
                    names::FILE_OVERWRITE,
                    "Invalid file overwrite (must be true or false)",
                ));
            }
        };
    }

    Ok(options)
}

/// Parse the chunk headers. Returns `None` when the request is not partial.
pub fn parse_partial(headers: &HeaderMap) -> Result<Option<PartialChunk>, HeaderError> {
    let Some(range) = header(headers, names::CONTENT_RANGE)? else {
        return Ok(None);
    };
    let (start, end, total) = parse_content_range(range)
        .ok_or_else(|| HeaderError::new(names::CONTENT_RANGE, "Invalid content-range"))?;

    let filename = header(headers, names::PARTIAL_FILENAME)?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HeaderError::new(names::PARTIAL_FILENAME, "Missing partial file name"))?;
    let filename = decode(names::PARTIAL_FILENAME, filename)?;

    let content_type = header(headers, names::PARTIAL_CONTENT_TYPE)?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            HeaderError::new(names::PARTIAL_CONTENT_TYPE, "Missing partial content type")
        })?
        .to_string();

    let last_chunk = match header(headers, names::PARTIAL_LASTCHUNK)? {
        Some("true") => true,
        Some("false") => false,
        _ => {
            return Err(HeaderError::new(
                names::PARTIAL_LASTCHUNK,
                "Invalid last chunk (must be true or false)",
            ));
        }
    };

    let content_length: u64 = header(headers, names::PARTIAL_CONTENT_LENGTH)?
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            HeaderError::new(names::PARTIAL_CONTENT_LENGTH, "Invalid partial content length")
        })?;
    if content_length != total {
        return Err(HeaderError::new(
            names::PARTIAL_CONTENT_LENGTH,
            "Partial content length does not match content-range total",
        ));
    }

    // A supplied identifier on the first chunk is ignored.
    let identifier = if start == 0 {
        None
    } else {
        let id = header(headers, names::PARTIAL_IDENTIFIER)?
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                HeaderError::new(names::PARTIAL_IDENTIFIER, "Missing partial identifier")
            })?;
        Some(id.to_string())
    };

    Ok(Some(PartialChunk {
        filename,
        content_type,
        identifier,
        last_chunk,
        start,
        end,
        total,
    }))
}

/// Parse `bytes <start>-<end>/<total>` with `start <= end <= total`.
pub fn parse_content_range(value: &str) -> Option<(u64, u64, u64)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;

    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    let total: u64 = total.trim().parse().ok()?;

    if total == 0 || start > end || end > total {
        return None;
    }
    Some((start, end, total))
}

/// Parse an expiry header: `date=<timestamp>` or a human duration from `now`.
///
/// Returns `None` for unparseable values and for instants not in the future.
pub fn parse_expiry(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let dated = value
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("date="));
    let at = if dated {
        parse_date(&value[5..])?
    } else {
        now + parse_duration(value)?
    };
    (at > now).then_some(at)
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}

/// Parse a human duration such as `1d`, `30min`, `2 hours` or `1.5h`.
///
/// A bare number is milliseconds. Zero and negative durations are rejected.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: f64 = amount.parse().ok()?;

    let unit_ms: f64 = match unit.trim().to_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "d" | "day" | "days" => 86_400_000.0,
        "w" | "week" | "weeks" => 604_800_000.0,
        "y" | "yr" | "yrs" | "year" | "years" => 31_557_600_000.0,
        _ => return None,
    };

    let ms = amount * unit_ms;
    if !ms.is_finite() || ms < 1.0 || ms > i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(ms as i64)
}
