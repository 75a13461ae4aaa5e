//! Live subtitle polling engine.
//!
//! [`SubStreamReader`] owns the `Stopped → Running → Stopping → Stopped`
//! lifecycle. While running, one spawned task repeatedly:
//!
//! 1. fetches the playlist,
//! 2. walks it with [`ManifestParser`] from the current high-water mark,
//! 3. fetches and parses each new subtitle segment in manifest order,
//! 4. deduplicates and dispatches the cue text,
//! 5. sleeps until the stream's own clock says the next segments are due.
//!
//! A failed playlist fetch is retried after `poll_interval`, forever. A
//! failed segment fetch skips that segment only. Nothing but an explicit
//! [`stop`](SubStreamReader::stop) ends the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{millis, ReaderConfig, StopMode};
use crate::cue::parse_cue_bytes;
use crate::fetch::{FetchError, Fetcher, HttpFetcher};
use crate::manifest::{ManifestParser, ManifestPolicy, ManifestReference};
use crate::schedule::{Deduplicator, Delivery, Dispatcher, SubtitleCallback, SubtitleEvent};

/// Lifecycle and configuration errors. Polling itself never fails.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("reader is already running")]
    AlreadyRunning,

    #[error("no Tokio runtime available to spawn the polling task")]
    NoRuntime,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] FetchError),
}

/// Where the reader is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Stopped,
    Running,
    /// Stop requested; the polling task has not exited yet.
    Stopping,
}

/// Settings that may change while the loop runs.
#[derive(Debug)]
struct Tunables {
    request_timeout_ms: AtomicU64,
    delay_ms: AtomicU64,
}

impl Tunables {
    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.load(Ordering::Relaxed))
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Relaxed))
    }
}

/// Follows a live subtitle playlist and delivers cue text in broadcast time.
pub struct SubStreamReader<F = HttpFetcher> {
    config: ReaderConfig,
    fetcher: Arc<F>,
    tunables: Arc<Tunables>,
    observers: Vec<SubtitleCallback>,
    state: Arc<watch::Sender<ReaderState>>,
    high_water: Arc<watch::Sender<DateTime<Utc>>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubStreamReader<HttpFetcher> {
    /// Reader using the default HTTP client.
    pub fn new(config: ReaderConfig) -> Result<Self, ReaderError> {
        let fetcher = HttpFetcher::new()?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }
}

impl<F: Fetcher + 'static> SubStreamReader<F> {
    pub fn with_fetcher(config: ReaderConfig, fetcher: Arc<F>) -> Result<Self, ReaderError> {
        config.validate()?;

        let offset = TimeDelta::from_std(config.initial_offset())
            .map_err(|_| ReaderError::InvalidConfig("initial_offset_ms is too large".into()))?;
        let start = Utc::now()
            .checked_sub_signed(offset)
            .ok_or_else(|| ReaderError::InvalidConfig("initial_offset_ms is too large".into()))?;
        let (high_water, _) = watch::channel(start);
        let (state, _) = watch::channel(ReaderState::Stopped);

        let tunables = Tunables {
            request_timeout_ms: AtomicU64::new(config.request_timeout_ms),
            delay_ms: AtomicU64::new(config.delay_to_raise_event_ms),
        };

        Ok(Self {
            config,
            fetcher,
            tunables: Arc::new(tunables),
            observers: Vec::new(),
            state: Arc::new(state),
            high_water: Arc::new(high_water),
            cancel: CancellationToken::new(),
            task: None,
        })
    }

    /// Register an observer. Takes effect from the next [`start`](Self::start).
    pub fn on_subtitle<C>(&mut self, callback: C)
    where
        C: Fn(&SubtitleEvent) + Send + Sync + 'static,
    {
        if self.is_running() {
            warn!("observer registered while running; it will be used after a restart");
        }
        self.observers.push(Arc::new(callback));
    }

    /// Channel-based observer. Takes effect from the next [`start`](Self::start).
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SubtitleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_subtitle(move |event| {
            // Receiver dropped: the consumer is gone, nothing to do
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Spawn the polling task and return immediately.
    pub fn start(&mut self) -> Result<(), ReaderError> {
        if self.state() != ReaderState::Stopped {
            return Err(ReaderError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ReaderError::NoRuntime)?;

        let poller = Poller {
            url: self.config.url.clone(),
            fetcher: Arc::clone(&self.fetcher),
            policy: Arc::new(self.config.manifest_policy()),
            poll_interval: self.config.poll_interval(),
            poll_slack: self.config.poll_slack(),
            min_poll_sleep: self.config.min_poll_sleep(),
            stop_mode: self.config.stop_mode,
            tunables: Arc::clone(&self.tunables),
            last_seen: self.last_seen(),
            dedup: Deduplicator::new(),
            dispatcher: Dispatcher::new(self.observers.clone()),
            high_water: Arc::clone(&self.high_water),
        };

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let exit_guard = StoppedOnExit(Arc::clone(&self.state));

        self.state.send_replace(ReaderState::Running);
        self.task = Some(runtime.spawn(async move {
            let _exit_guard = exit_guard;
            poller.run(cancel).await;
        }));

        info!(
            url = %self.config.url,
            poll_interval_secs = self.config.poll_interval_secs,
            since = %self.last_seen(),
            "subtitle reader started"
        );
        Ok(())
    }

    /// Request a stop. With `wait_for_completion`, also wait for the polling
    /// task to exit. Delayed deliveries already scheduled still fire.
    pub async fn stop(&mut self, wait_for_completion: bool) {
        if self.state() == ReaderState::Running {
            self.state.send_replace(ReaderState::Stopping);
        }
        self.cancel.cancel();

        if wait_for_completion {
            if let Some(task) = self.task.take() {
                if let Err(e) = task.await {
                    warn!(error = %e, "polling task ended abnormally");
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ReaderState::Running
    }

    pub fn state(&self) -> ReaderState {
        *self.state.borrow()
    }

    /// Lifecycle updates, for consumers that want to await a transition.
    pub fn watch_state(&self) -> watch::Receiver<ReaderState> {
        self.state.subscribe()
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Latest high-water mark published by the polling task.
    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.high_water.borrow()
    }

    pub fn request_timeout(&self) -> Duration {
        self.tunables.request_timeout()
    }

    /// Applies from the next fetch.
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.tunables
            .request_timeout_ms
            .store(millis(timeout), Ordering::Relaxed);
    }

    pub fn delay_to_raise_event(&self) -> Duration {
        self.tunables.delay()
    }

    /// Applies from the next segment scheduled.
    pub fn set_delay_to_raise_event(&self, delay: Duration) {
        self.tunables
            .delay_ms
            .store(millis(delay), Ordering::Relaxed);
    }
}

impl<F> Drop for SubStreamReader<F> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Marks the reader stopped when the polling task ends, even by panic.
struct StoppedOnExit(Arc<watch::Sender<ReaderState>>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.send_replace(ReaderState::Stopped);
    }
}

/// Counts for one manifest pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PassSummary {
    references: usize,
    delivered: usize,
}

/// State owned by the polling task.
struct Poller<F> {
    url: String,
    fetcher: Arc<F>,
    policy: Arc<ManifestPolicy>,
    poll_interval: Duration,
    poll_slack: Duration,
    min_poll_sleep: Duration,
    stop_mode: StopMode,
    tunables: Arc<Tunables>,
    last_seen: DateTime<Utc>,
    dedup: Deduplicator,
    dispatcher: Dispatcher,
    high_water: Arc<watch::Sender<DateTime<Utc>>>,
}

impl<F: Fetcher> Poller<F> {
    async fn run(mut self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let outcome = match self.stop_mode {
                StopMode::Cooperative => self.poll_once().await,
                StopMode::Immediate => tokio::select! {
                    outcome = self.poll_once() => outcome,
                    () = cancel.cancelled() => break,
                },
            };

            let wait = match outcome {
                Ok(summary) => {
                    debug!(
                        references = summary.references,
                        delivered = summary.delivered,
                        high_water = %self.last_seen,
                        "manifest pass complete"
                    );
                    self.pacing_delay(Utc::now())
                }
                Err(e) => {
                    warn!(error = %e, retry_in_secs = self.poll_interval.as_secs(), "playlist fetch failed");
                    self.poll_interval
                }
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }
        }
        info!(url = %self.url, "subtitle reader stopped");
    }

    /// One manifest fetch and pass. Only a failed playlist fetch is an error.
    async fn poll_once(&mut self) -> Result<PassSummary, FetchError> {
        let body = self
            .fetcher
            .fetch(&self.url, self.tunables.request_timeout())
            .await?;

        let policy = Arc::clone(&self.policy);
        let mut parser = ManifestParser::new(body.as_ref(), self.last_seen, &policy, &self.url);
        let mut summary = PassSummary::default();

        for reference in parser.by_ref() {
            summary.references += 1;
            if self.process_segment(&reference).await {
                summary.delivered += 1;
            }
            // Recorded per segment so an abandoned pass never replays it
            self.advance(reference.timestamp);
        }

        let pass = parser.finish();
        if let Some(e) = pass.error {
            warn!(error = %e, "manifest pass cut short");
        }
        self.advance(pass.high_water);

        Ok(summary)
    }

    /// Move the high-water mark forward and publish it.
    fn advance(&mut self, seen: DateTime<Utc>) {
        if seen > self.last_seen {
            self.last_seen = seen;
            self.high_water.send_replace(seen);
        }
    }

    /// Fetch, parse, dedup and dispatch one segment. Returns whether an
    /// event was handed to the observers.
    async fn process_segment(&mut self, reference: &ManifestReference) -> bool {
        let body = match self
            .fetcher
            .fetch(&reference.url, self.tunables.request_timeout())
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "skipping subtitle segment");
                return false;
            }
        };

        let blocks = match parse_cue_bytes(&body) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(url = %reference.url, error = %e, "unreadable subtitle segment");
                return false;
            }
        };

        let blocks = self.dedup.apply(blocks);
        match self
            .dispatcher
            .dispatch(reference, blocks, self.tunables.delay())
        {
            Delivery::Skipped => {
                debug!(url = %reference.url, "no new cue text");
                false
            }
            Delivery::Immediate | Delivery::Scheduled(_) => true,
        }
    }

    /// Time to sleep after a successful pass: until
    /// `last_seen + 2 × poll_interval + poll_slack`, never below the floor.
    fn pacing_delay(&self, now: DateTime<Utc>) -> Duration {
        let span = TimeDelta::from_std(self.poll_interval * 2 + self.poll_slack)
            .unwrap_or(TimeDelta::zero());
        let next_poll_at = self
            .last_seen
            .checked_add_signed(span)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        (next_poll_at - now)
            .to_std()
            .unwrap_or_default()
            .max(self.min_poll_sleep)
    }
}
