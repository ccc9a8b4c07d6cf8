//! guac-play — replay a recorded Guacamole session into PNG frames.
//!
//! Reads a session recording (raw concatenated wire frames, as written by
//! the tunnel's recording side-channel or by guacd itself), reconstructs the
//! display, and writes one numbered PNG per sync into the output directory.
//! The frames are ready for a downstream encoder, e.g.:
//!
//! ```text
//! guac-play /var/lib/guacamole/recordings/session --output frames
//! ffmpeg -framerate 10 -i frames/%d.png -c:v libx264 -pix_fmt yuv420p session.mp4
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use guac_core::Client;

/// Replay a recorded Guacamole session into numbered PNG frames.
#[derive(Debug, Parser)]
#[command(name = "guac-play", about = "Render a Guacamole session recording to PNG frames", version)]
struct Cli {
    /// Path to the session recording.
    recording: PathBuf,

    /// Directory receiving the numbered frames; created if missing.
    #[arg(long, default_value = "frames", env = "GUAC_PLAY_OUTPUT")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating output directory {}", cli.output.display()))?;

    let mut client = Client::from_recording(&cli.recording)
        .await
        .with_context(|| format!("opening recording {}", cli.recording.display()))?;

    info!(
        recording = %cli.recording.display(),
        output = %cli.output.display(),
        "replaying session"
    );

    let frame_count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&frame_count);
    let output = cli.output.clone();
    let mut last_timestamp = 0i64;

    client.on_sync(move |frame, timestamp_ms| {
        // Consecutive syncs with the same timestamp carry the same frame;
        // writing them again only bloats the output.
        if timestamp_ms == last_timestamp {
            return;
        }
        last_timestamp = timestamp_ms;

        let index = counter.fetch_add(1, Ordering::Relaxed) + 1;
        let path = output.join(format!("{index}.png"));
        if let Err(e) = frame.save(&path) {
            error!("writing {} failed: {e}", path.display());
        }
    });

    client.run().await;

    info!(
        frames = frame_count.load(Ordering::Relaxed),
        "replay finished"
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_output_directory() {
        let cli = Cli::parse_from(["guac-play", "/tmp/session.rec"]);
        assert_eq!(cli.output, PathBuf::from("frames"));
        assert_eq!(cli.recording, PathBuf::from("/tmp/session.rec"));
    }

    #[test]
    fn test_cli_output_override() {
        let cli = Cli::parse_from(["guac-play", "session.rec", "--output", "out/frames"]);
        assert_eq!(cli.output, PathBuf::from("out/frames"));
    }
}
