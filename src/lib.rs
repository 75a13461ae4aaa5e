//! `substream` - live WebVTT subtitles from HLS playlists
//!
//! # Features
//!
//! - **Live polling**: follows `#EXT-X-PROGRAM-DATE-TIME` stamped playlists
//! - **Cue extraction**: turns each WebVTT segment into caption blocks
//! - **Overlap suppression**: drops the cue a segment repeats from the last one
//! - **Broadcast-time delivery**: fires events at `timestamp + delay`
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use substream::{ReaderConfig, SubStreamReader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ReaderConfig::new(
//!         "https://example.com/live/subs.m3u8",
//!         Duration::from_secs(30),
//!         Duration::from_secs(6),
//!     );
//!     let mut reader = SubStreamReader::new(config)?;
//!     reader.on_subtitle(|event| println!("{}", event.blocks.join(" ")));
//!     reader.start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     reader.stop(true).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cue;
pub mod fetch;
pub mod manifest;
pub mod reader;
pub mod schedule;

pub use config::{ReaderConfig, StopMode};
pub use cue::{parse_cue_bytes, parse_cues};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use manifest::{
    parse_manifest, ManifestError, ManifestParser, ManifestPass, ManifestPolicy,
    ManifestReference, RelativeUrlPolicy,
};
pub use reader::{ReaderError, ReaderState, SubStreamReader};
pub use schedule::{Deduplicator, Delivery, Dispatcher, SubtitleCallback, SubtitleEvent};

/// Version of substream
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
