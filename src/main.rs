//! `substream` CLI - print live subtitles as they come due

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use substream::config::default_config_path;
use substream::{ReaderConfig, SubStreamReader, SubtitleEvent};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 6;

#[derive(Parser)]
#[command(name = "substream")]
#[command(about = "Follow a live HLS subtitle playlist and print cues in broadcast time")]
#[command(version)]
struct Cli {
    /// Subtitle media playlist URL (overrides the config file)
    url: Option<String>,

    /// Start this many milliseconds before now [default: 0]
    #[arg(long)]
    offset_ms: Option<u64>,

    /// Playlist poll interval in seconds [default: 6]
    #[arg(short, long)]
    poll_interval: Option<u64>,

    /// Delay every subtitle by this many milliseconds
    #[arg(short, long)]
    delay_ms: Option<u64>,

    /// Per-request timeout in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Duration assumed for segments without #EXTINF, in seconds
    #[arg(long)]
    fallback_duration: Option<f64>,

    /// TOML config file (default: ~/.config/substream/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only subtitles
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("substream={level}")));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = build_config(&cli)?;
    let json = cli.json;

    let mut reader = SubStreamReader::new(config).context("failed to create reader")?;
    reader.on_subtitle(move |event| print_event(event, json));
    reader.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("stopping");
    reader.stop(true).await;

    Ok(())
}

/// Merge the config file (if any) with command-line overrides.
fn build_config(cli: &Cli) -> Result<ReaderConfig> {
    let file = match &cli.config {
        Some(path) => Some(ReaderConfig::from_file(path)?),
        None => {
            let path = default_config_path();
            if path.exists() {
                Some(ReaderConfig::from_file(&path)?)
            } else {
                None
            }
        }
    };

    let mut config = match (file, &cli.url) {
        (Some(mut config), Some(url)) => {
            config.url.clone_from(url);
            config
        }
        (Some(config), None) => config,
        (None, Some(url)) => ReaderConfig::new(
            url.as_str(),
            Duration::ZERO,
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        ),
        (None, None) => anyhow::bail!("no playlist URL given and no config file found"),
    };

    if let Some(offset) = cli.offset_ms {
        config.initial_offset_ms = offset;
    }
    if let Some(interval) = cli.poll_interval {
        config.poll_interval_secs = interval;
    }

    if let Some(delay) = cli.delay_ms {
        config.delay_to_raise_event_ms = delay;
    }
    if let Some(timeout) = cli.timeout_ms {
        config.request_timeout_ms = timeout;
    }
    if let Some(fallback) = cli.fallback_duration {
        config.fallback_duration_secs = fallback;
    }

    config.validate()?;
    Ok(config)
}

fn print_event(event: &SubtitleEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
        }
        return;
    }

    println!(
        "[{} → {}] {}",
        event.start_time.format("%H:%M:%S%.3f"),
        event.end_time.format("%H:%M:%S%.3f"),
        event.blocks.join(" | ")
    );
}
