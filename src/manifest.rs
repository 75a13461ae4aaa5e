//! Live playlist parsing.
//!
//! [`ManifestParser`] walks a media playlist once, line by line, and yields
//! a [`ManifestReference`] for every subtitle segment stamped later than the
//! caller's high-water mark. Tags are dispatched through a prefix table, so
//! supporting another directive means adding one handler. Lines that match
//! nothing are skipped.

use std::io::{self, BufRead};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Absolute wall-clock time of the next segment.
pub const PROGRAM_DATE_TIME_TAG: &str = "#EXT-X-PROGRAM-DATE-TIME:";
/// Duration (and optional title) of the next segment.
pub const DURATION_TAG: &str = "#EXTINF:";

/// Default duration for segments without a preceding `#EXTINF`.
pub const DEFAULT_FALLBACK_DURATION: f64 = 6.0;

/// Longest `#EXTINF` duration accepted, in seconds.
pub const MAX_SEGMENT_DURATION: f64 = 86_400.0;

/// Errors that end a manifest pass early.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("invalid program date-time: {0}")]
    InvalidTimestamp(String),

    #[error("invalid segment duration: {0}")]
    InvalidDuration(String),

    #[error("manifest read error: {0}")]
    Read(#[from] io::Error),
}

/// One subtitle segment discovered in a manifest pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestReference {
    pub timestamp: DateTime<Utc>,
    /// Seconds.
    pub duration: f64,
    pub url: String,
}

/// What to do with segment lines that are not absolute URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeUrlPolicy {
    /// Resolve against the manifest URL.
    #[default]
    Resolve,
    /// Skip the line.
    Ignore,
}

/// Segment detection and duration rules for a manifest pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestPolicy {
    pub fallback_duration: f64,
    /// Extensions (without the dot) that mark a line as a subtitle segment.
    pub subtitle_extensions: Vec<String>,
    /// Treat any absolute `http(s)` line as a segment, whatever its extension.
    pub accept_absolute_urls: bool,
    pub relative_urls: RelativeUrlPolicy,
}

impl Default for ManifestPolicy {
    fn default() -> Self {
        Self {
            fallback_duration: DEFAULT_FALLBACK_DURATION,
            subtitle_extensions: vec!["vtt".to_string(), "webvtt".to_string()],
            accept_absolute_urls: true,
            relative_urls: RelativeUrlPolicy::Resolve,
        }
    }
}

/// Outcome of a pass once the parser is exhausted.
#[derive(Debug)]
pub struct ManifestPass {
    /// Latest program date-time seen, never earlier than the baseline.
    pub high_water: DateTime<Utc>,
    /// Set when the pass stopped before the end of the manifest.
    pub error: Option<ManifestError>,
}

/// Per-pass parse position.
#[derive(Debug)]
struct Cursor {
    candidate: DateTime<Utc>,
    time_known: bool,
    duration: f64,
    fallback: f64,
}

impl Cursor {
    fn emit(&mut self, url: String) -> ManifestReference {
        let duration = std::mem::replace(&mut self.duration, self.fallback);
        ManifestReference {
            timestamp: self.candidate,
            duration,
            url,
        }
    }
}

type TagHandler = fn(&mut Cursor, &str) -> Result<(), ManifestError>;

const TAG_HANDLERS: &[(&str, TagHandler)] = &[
    (PROGRAM_DATE_TIME_TAG, on_program_date_time),
    (DURATION_TAG, on_duration),
];

fn on_program_date_time(cursor: &mut Cursor, value: &str) -> Result<(), ManifestError> {
    let value = value.trim();
    let timestamp = parse_program_date_time(value)
        .ok_or_else(|| ManifestError::InvalidTimestamp(value.to_string()))?;

    if timestamp > cursor.candidate {
        cursor.candidate = timestamp;
        cursor.time_known = true;
    }
    Ok(())
}

fn on_duration(cursor: &mut Cursor, value: &str) -> Result<(), ManifestError> {
    if !cursor.time_known {
        return Ok(());
    }
    cursor.duration = parse_duration(value)
        .ok_or_else(|| ManifestError::InvalidDuration(value.trim().to_string()))?;
    Ok(())
}

/// Parse an `#EXT-X-PROGRAM-DATE-TIME` value.
///
/// Accepts RFC 3339, `+hhmm` offsets, and offset-less values (read as UTC).
pub fn parse_program_date_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse an `#EXTINF` value into seconds.
///
/// A comma between two digits is a thousands separator and is dropped; any
/// other comma starts the title and ends the number. Negative values and
/// values above [`MAX_SEGMENT_DURATION`] are rejected.
pub fn parse_duration(value: &str) -> Option<f64> {
    let mut number = String::with_capacity(value.len());
    let mut chars = value.trim().chars().peekable();

    while let Some(c) = chars.next() {
        if c == ',' {
            let between_digits = number.ends_with(|d: char| d.is_ascii_digit())
                && chars.peek().is_some_and(char::is_ascii_digit);
            if between_digits {
                continue;
            }
            break;
        }
        number.push(c);
    }

    number
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| (0.0..=MAX_SEGMENT_DURATION).contains(d))
}

/// Single-pass, lazy manifest reader.
///
/// Iterate to get the references, then call [`finish`](Self::finish) for
/// the high-water mark and any error that cut the pass short.
pub struct ManifestParser<'p, R> {
    lines: io::Lines<R>,
    policy: &'p ManifestPolicy,
    base: Option<Url>,
    cursor: Cursor,
    error: Option<ManifestError>,
    done: bool,
}

impl<'p, R: BufRead> ManifestParser<'p, R> {
    /// `baseline` is the current high-water mark; only program date-times
    /// strictly after it enable segment emission.
    pub fn new(
        reader: R,
        baseline: DateTime<Utc>,
        policy: &'p ManifestPolicy,
        manifest_url: &str,
    ) -> Self {
        Self {
            lines: reader.lines(),
            policy,
            base: Url::parse(manifest_url).ok(),
            cursor: Cursor {
                candidate: baseline,
                time_known: false,
                duration: policy.fallback_duration,
                fallback: policy.fallback_duration,
            },
            error: None,
            done: false,
        }
    }

    /// High-water mark so far.
    pub fn high_water(&self) -> DateTime<Utc> {
        self.cursor.candidate
    }

    pub fn finish(self) -> ManifestPass {
        ManifestPass {
            high_water: self.cursor.candidate,
            error: self.error,
        }
    }

    fn fail(&mut self, error: ManifestError) {
        self.error = Some(error);
        self.done = true;
    }

    fn segment_url(&self, line: &str) -> Option<String> {
        let absolute = line.starts_with("http://") || line.starts_with("https://");
        let path = line.split(['?', '#']).next().unwrap_or(line);
        let file = path.rsplit('/').next().unwrap_or(path);
        let has_extension = file.rsplit_once('.').is_some_and(|(_, ext)| {
            self.policy
                .subtitle_extensions
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        });

        if !has_extension && !(absolute && self.policy.accept_absolute_urls) {
            return None;
        }
        if absolute {
            return Some(line.to_string());
        }

        match self.policy.relative_urls {
            RelativeUrlPolicy::Ignore => None,
            RelativeUrlPolicy::Resolve => self
                .base
                .as_ref()
                .and_then(|base| base.join(line).ok())
                .map(String::from),
        }
    }
}

impl<R: BufRead> Iterator for ManifestParser<'_, R> {
    type Item = ManifestReference;

    fn next(&mut self) -> Option<ManifestReference> {
        if self.done {
            return None;
        }

        loop {
            let raw = match self.lines.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.fail(e.into());
                    return None;
                }
                Some(Ok(raw)) => raw,
            };
            let line = raw.trim();

            if line.starts_with('#') {
                let tag = TAG_HANDLERS
                    .iter()
                    .find_map(|(tag, handler)| line.strip_prefix(tag).map(|v| (v, handler)));
                if let Some((value, handler)) = tag {
                    if let Err(e) = handler(&mut self.cursor, value) {
                        self.fail(e);
                        return None;
                    }
                }
                continue;
            }

            if line.is_empty() || !self.cursor.time_known {
                continue;
            }
            if let Some(url) = self.segment_url(line) {
                return Some(self.cursor.emit(url));
            }
        }
    }
}

/// Parse a whole manifest body eagerly.
pub fn parse_manifest(
    body: &[u8],
    baseline: DateTime<Utc>,
    policy: &ManifestPolicy,
    manifest_url: &str,
) -> (Vec<ManifestReference>, ManifestPass) {
    let mut parser = ManifestParser::new(body, baseline, policy, manifest_url);
    let references = parser.by_ref().collect();
    (references, parser.finish())
}
