//! Overlap suppression and timed delivery of subtitle events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::millis;
use crate::manifest::ManifestReference;

/// Observer invoked once per delivered event.
pub type SubtitleCallback = Arc<dyn Fn(&SubtitleEvent) + Send + Sync>;

/// Subtitle text for one segment, stamped with its (delayed) broadcast window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleEvent {
    pub blocks: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl SubtitleEvent {
    /// Returns `None` when the delayed window falls outside the representable
    /// date range.
    #[must_use]
    pub fn new(reference: &ManifestReference, blocks: Vec<String>, delay: Duration) -> Option<Self> {
        let delay = TimeDelta::from_std(delay).ok()?;
        let length = segment_length(reference.duration)?;
        let start_time = reference.timestamp.checked_add_signed(delay)?;
        let end_time = start_time.checked_add_signed(length)?;
        Some(Self {
            blocks,
            start_time,
            end_time,
        })
    }
}

/// Segment duration in seconds, rounded to whole milliseconds.
fn segment_length(seconds: f64) -> Option<TimeDelta> {
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis < 0.0 || millis >= i64::MAX as f64 {
        return None;
    }
    TimeDelta::try_milliseconds(millis as i64)
}

/// Drops the leading block of a segment when it repeats the last block
/// delivered from the previous one.
#[derive(Debug, Default)]
pub struct Deduplicator {
    last_delivered: String,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, mut blocks: Vec<String>) -> Vec<String> {
        if blocks.first().is_some_and(|first| *first == self.last_delivered) {
            blocks.remove(0);
        }
        if let Some(last) = blocks.last() {
            self.last_delivered.clone_from(last);
        }
        blocks
    }

    pub fn last_delivered(&self) -> &str {
        &self.last_delivered
    }
}

/// How a segment's blocks were handed off.
#[derive(Debug)]
pub enum Delivery {
    /// Nothing delivered: no blocks left after deduplication, or a window
    /// that cannot be represented.
    Skipped,
    /// Observers already ran on the caller's task.
    Immediate,
    /// Observers will run on this task at the event's start time.
    Scheduled(JoinHandle<()>),
}

/// Fans events out to the registered observers.
#[derive(Clone)]
pub struct Dispatcher {
    observers: Arc<[SubtitleCallback]>,
}

impl Dispatcher {
    pub fn new(observers: Vec<SubtitleCallback>) -> Self {
        Self {
            observers: observers.into(),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Deliver `blocks` for `reference`.
    ///
    /// A zero `delay` runs observers before returning. Otherwise a task is
    /// spawned that waits until `timestamp + delay` (measured against the
    /// wall clock now) and then runs them; a start time already in the past
    /// fires at once. Must be called inside a Tokio runtime when `delay` is
    /// non-zero.
    pub fn dispatch(
        &self,
        reference: &ManifestReference,
        blocks: Vec<String>,
        delay: Duration,
    ) -> Delivery {
        if blocks.is_empty() {
            return Delivery::Skipped;
        }

        let Some(event) = SubtitleEvent::new(reference, blocks, delay) else {
            warn!(
                url = %reference.url,
                timestamp = %reference.timestamp,
                duration = reference.duration,
                "subtitle window out of range, dropping segment"
            );
            return Delivery::Skipped;
        };
        if delay.is_zero() {
            deliver(&self.observers, &event);
            return Delivery::Immediate;
        }

        let wait = (event.start_time - Utc::now()).to_std().unwrap_or_default();
        debug!(wait_ms = millis(wait), url = %reference.url, "scheduling delivery");

        let observers = Arc::clone(&self.observers);
        Delivery::Scheduled(tokio::spawn(async move {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            deliver(&observers, &event);
        }))
    }
}

fn deliver(observers: &[SubtitleCallback], event: &SubtitleEvent) {
    for observer in observers {
        observer(event);
    }
}
