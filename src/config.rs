//! Reader configuration, loadable from `~/.config/substream/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::manifest::{
    ManifestPolicy, RelativeUrlPolicy, DEFAULT_FALLBACK_DURATION, MAX_SEGMENT_DURATION,
};
use crate::reader::ReaderError;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2000;
/// Extra wait added after `2 × poll_interval` when pacing polls.
pub const DEFAULT_POLL_SLACK_MS: u64 = 1000;
/// Shortest sleep between successful polls.
pub const DEFAULT_MIN_POLL_SLEEP_MS: u64 = 10;

/// How a stop request interacts with work already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    /// Checked between polls and during sleeps; a fetch in flight finishes.
    #[default]
    Cooperative,
    /// Also abandons the manifest pass in flight, including its fetches.
    Immediate,
}

/// Everything needed to follow one subtitle playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Media playlist URL.
    pub url: String,
    /// How far before "now" the initial high-water mark sits.
    #[serde(default)]
    pub initial_offset_ms: u64,
    pub poll_interval_secs: u64,
    /// Lag added to every segment timestamp before delivery.
    #[serde(default)]
    pub delay_to_raise_event_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Segment duration used when no `#EXTINF` precedes a segment.
    #[serde(default = "default_fallback_duration")]
    pub fallback_duration_secs: f64,
    #[serde(default = "default_subtitle_extensions")]
    pub subtitle_extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub accept_absolute_urls: bool,
    #[serde(default)]
    pub relative_urls: RelativeUrlPolicy,
    #[serde(default = "default_poll_slack_ms")]
    pub poll_slack_ms: u64,
    #[serde(default = "default_min_poll_sleep_ms")]
    pub min_poll_sleep_ms: u64,
    #[serde(default)]
    pub stop_mode: StopMode,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_fallback_duration() -> f64 {
    DEFAULT_FALLBACK_DURATION
}

fn default_subtitle_extensions() -> Vec<String> {
    ManifestPolicy::default().subtitle_extensions
}

fn default_true() -> bool {
    true
}

fn default_poll_slack_ms() -> u64 {
    DEFAULT_POLL_SLACK_MS
}

fn default_min_poll_sleep_ms() -> u64 {
    DEFAULT_MIN_POLL_SLEEP_MS
}

impl ReaderConfig {
    pub fn new(url: impl Into<String>, initial_offset: Duration, poll_interval: Duration) -> Self {
        Self {
            url: url.into(),
            initial_offset_ms: millis(initial_offset),
            poll_interval_secs: poll_interval.as_secs(),
            delay_to_raise_event_ms: 0,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            fallback_duration_secs: DEFAULT_FALLBACK_DURATION,
            subtitle_extensions: default_subtitle_extensions(),
            accept_absolute_urls: true,
            relative_urls: RelativeUrlPolicy::default(),
            poll_slack_ms: DEFAULT_POLL_SLACK_MS,
            min_poll_sleep_ms: DEFAULT_MIN_POLL_SLEEP_MS,
            stop_mode: StopMode::default(),
        }
    }

    #[must_use]
    pub fn with_delay_to_raise_event(mut self, delay: Duration) -> Self {
        self.delay_to_raise_event_ms = millis(delay);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = millis(timeout);
        self
    }

    #[must_use]
    pub fn with_stop_mode(mut self, mode: StopMode) -> Self {
        self.stop_mode = mode;
        self
    }

    pub fn initial_offset(&self) -> Duration {
        Duration::from_millis(self.initial_offset_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn delay_to_raise_event(&self) -> Duration {
        Duration::from_millis(self.delay_to_raise_event_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_slack(&self) -> Duration {
        Duration::from_millis(self.poll_slack_ms)
    }

    pub fn min_poll_sleep(&self) -> Duration {
        Duration::from_millis(self.min_poll_sleep_ms)
    }

    pub fn manifest_policy(&self) -> ManifestPolicy {
        ManifestPolicy {
            fallback_duration: self.fallback_duration_secs,
            subtitle_extensions: self.subtitle_extensions.clone(),
            accept_absolute_urls: self.accept_absolute_urls,
            relative_urls: self.relative_urls,
        }
    }

    pub fn validate(&self) -> Result<(), ReaderError> {
        let invalid = |msg: &str| Err(ReaderError::InvalidConfig(msg.to_string()));

        match url::Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(_) => return invalid("url must be http or https"),
            Err(_) => return invalid("url is not a valid absolute URL"),
        }
        if self.poll_interval_secs == 0 {
            return invalid("poll_interval_secs must be at least 1");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be greater than 0");
        }
        if !(0.0..=MAX_SEGMENT_DURATION).contains(&self.fallback_duration_secs) {
            return invalid("fallback_duration_secs must be between 0 and 86400");
        }
        Ok(())
    }

    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config in {}", path.display()))?;
        Ok(config)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Return the path to the default config file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("substream")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://live.example.com/subs/index.m3u8";

    #[test]
    fn parse_minimal_config() {
        let toml_str = r#"
url = "https://live.example.com/subs/index.m3u8"
poll_interval_secs = 4
"#;
        let config: ReaderConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config, ReaderConfig::new(URL, Duration::ZERO, Duration::from_secs(4)));
        assert_eq!(config.request_timeout(), Duration::from_millis(2000));
        assert_eq!(config.delay_to_raise_event(), Duration::ZERO);
        assert_eq!(config.stop_mode, StopMode::Cooperative);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
url = "https://live.example.com/subs/index.m3u8"
initial_offset_ms = 30000
poll_interval_secs = 6
delay_to_raise_event_ms = 12000
request_timeout_ms = 1500
fallback_duration_secs = 4.0
subtitle_extensions = ["vtt"]
accept_absolute_urls = false
relative_urls = "ignore"
poll_slack_ms = 500
min_poll_sleep_ms = 50
stop_mode = "immediate"
"#;
        let config: ReaderConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.initial_offset(), Duration::from_secs(30));
        assert_eq!(config.delay_to_raise_event(), Duration::from_secs(12));
        assert_eq!(config.poll_slack(), Duration::from_millis(500));
        assert_eq!(config.min_poll_sleep(), Duration::from_millis(50));
        assert_eq!(config.stop_mode, StopMode::Immediate);

        let policy = config.manifest_policy();
        assert_eq!(policy.fallback_duration, 4.0);
        assert_eq!(policy.subtitle_extensions, vec!["vtt"]);
        assert!(!policy.accept_absolute_urls);
        assert_eq!(policy.relative_urls, RelativeUrlPolicy::Ignore);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_url_is_rejected() {
        let result: Result<ReaderConfig, _> = toml::from_str("poll_interval_secs = 4");
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = ReaderConfig::new(URL, Duration::ZERO, Duration::from_secs(4));
        assert!(base.validate().is_ok());

        let cases = [
            ReaderConfig { url: "index.m3u8".into(), ..base.clone() },
            ReaderConfig { url: "ftp://example.com/index.m3u8".into(), ..base.clone() },
            ReaderConfig { poll_interval_secs: 0, ..base.clone() },
            ReaderConfig { request_timeout_ms: 0, ..base.clone() },
            ReaderConfig { fallback_duration_secs: f64::NAN, ..base.clone() },
            ReaderConfig { fallback_duration_secs: -1.0, ..base.clone() },
            ReaderConfig { fallback_duration_secs: 1e15, ..base.clone() },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(ReaderError::InvalidConfig(_))),
                "{config:?} should be invalid"
            );
        }
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
        let config = ReaderConfig::new(URL, Duration::MAX, Duration::from_secs(4))
            .with_delay_to_raise_event(Duration::MAX);
        assert_eq!(config.initial_offset_ms, u64::MAX);
        assert_eq!(config.delay_to_raise_event_ms, u64::MAX);
    }

    #[test]
    fn builder_methods_set_durations() {
        let config = ReaderConfig::new(URL, Duration::from_secs(10), Duration::from_secs(2))
            .with_delay_to_raise_event(Duration::from_millis(2500))
            .with_request_timeout(Duration::from_millis(800))
            .with_stop_mode(StopMode::Immediate);
        assert_eq!(config.initial_offset_ms, 10_000);
        assert_eq!(config.delay_to_raise_event_ms, 2500);
        assert_eq!(config.request_timeout_ms, 800);
        assert_eq!(config.stop_mode, StopMode::Immediate);
    }

    #[test]
    fn from_file_reports_path_on_error() {
        let err = ReaderConfig::from_file(Path::new("/nonexistent/substream.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/substream.toml"));
    }

    #[test]
    fn default_path_ends_with_config_toml() {
        let path = default_config_path();
        assert!(path.ends_with("substream/config.toml"));
    }
}
