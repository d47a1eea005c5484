use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::DateTime;
use clap::Args;
use tracing::info;

use crate::download::{DEFAULT_VIDEO_DIR, ensure_output_dir};
use crate::{auth, clip, config};

#[derive(Debug, Args)]
#[command(about = "Download a span of footage by creating, saving and deleting clips")]
pub struct VideoArgs {
    #[arg(long, help = "Camera id")]
    pub id: String,
    #[arg(long, help = "Start of the span, in Unix seconds")]
    pub start: i64,
    #[arg(long, help = "End of the span, in Unix seconds")]
    pub end: i64,
    #[arg(long, value_name = "DIR", default_value = DEFAULT_VIDEO_DIR, help = "Directory to save videos to")]
    pub directory: PathBuf,
    #[arg(long, default_value_t = 3600, value_parser = clap::value_parser!(u32).range(1..), help = "Length of each clip in seconds")]
    pub chunk_seconds: u32,
}

/// Start of each chunk covering `[start, end)`.
fn chunk_starts(start: i64, end: i64, chunk_seconds: u32) -> impl Iterator<Item = i64> {
    (start..end).step_by(chunk_seconds as usize)
}

/// Rejects empty or reversed spans and timestamps outside the calendar range.
fn check_span(start: i64, end: i64) -> Result<()> {
    if end <= start {
        bail!("--end must be after --start");
    }
    for (flag, value) in [("--start", start), ("--end", end)] {
        if DateTime::from_timestamp(value, 0).is_none() {
            bail!("{flag} {value} is not a valid timestamp");
        }
    }
    Ok(())
}

pub async fn run(args: VideoArgs) -> Result<()> {
    if args.id.trim().is_empty() {
        bail!("--id must not be empty");
    }
    check_span(args.start, args.end)?;
    ensure_output_dir(&args.directory)?;

    let config = config::load_config()?;
    let api = auth::open_session(&config).await?;
    let policy = config.polling.retry_policy();
    let chunk = i64::from(args.chunk_seconds);

    for from in chunk_starts(args.start, args.end, args.chunk_seconds) {
        let to = from
            .checked_add(chunk)
            .with_context(|| format!("clip starting at {from} ends past the last timestamp"))?;
        let start = DateTime::from_timestamp(from, 0)
            .with_context(|| format!("{from} is not a valid timestamp"))?;

        let clip = clip::create(&api, &args.id, start, args.chunk_seconds)
            .await
            .with_context(|| format!("failed to create clip starting at {from}"))?;
        info!(id = clip.id, from, to, "clip requested");

        let destination = args.directory.join(format!("{}-{from}-{to}.mp4", args.id));
        clip.download(&api, &destination, &policy)
            .await
            .with_context(|| format!("failed to save clip {}", clip.id))?;
        clip.delete(&api)
            .await
            .with_context(|| format!("failed to delete clip {}", clip.id))?;
        println!("Saved {}", destination.display());
    }

    Ok(())
}
