use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use tracing::{error, info};

use crate::clip::{self, Clip, ClipError};
use crate::http::Api;
use crate::retry::RetryPolicy;
use crate::{auth, config};

pub(crate) const DEFAULT_VIDEO_DIR: &str = "videos";

#[derive(Debug, Args)]
#[command(about = "Download a specific clip")]
pub struct DownloadClipArgs {
    #[arg(long, help = "Clip id")]
    pub id: i64,
    #[arg(long, value_name = "PATH", help = "File to save the clip to [default: videos/<id>.mp4]")]
    pub filename: Option<PathBuf>,
}

#[derive(Debug, Args)]
#[command(about = "Download all clips")]
pub struct DownloadClipsArgs {
    #[arg(long, value_name = "DIR", help = "Directory to save clips to")]
    pub directory: PathBuf,
}

pub async fn run_clip(args: DownloadClipArgs) -> Result<()> {
    let destination = args
        .filename
        .unwrap_or_else(|| Path::new(DEFAULT_VIDEO_DIR).join(format!("{}.mp4", args.id)));

    let config = config::load_config()?;
    let api = auth::open_session(&config).await?;
    let Some(clip) = clip::find(&api, args.id)
        .await
        .context("failed to list clips")?
    else {
        bail!("clip {} not found", args.id);
    };

    if let Some(parent) = destination.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        ensure_output_dir(parent)?;
    }
    clip.download(&api, &destination, &config.polling.retry_policy())
        .await
        .with_context(|| format!("failed to save clip {}", clip.id))?;
    println!("Saved clip {} to {}.", clip.id, destination.display());
    Ok(())
}

pub async fn run_clips(args: DownloadClipsArgs) -> Result<()> {
    ensure_output_dir(&args.directory)?;

    let config = config::load_config()?;
    let api = auth::open_session(&config).await?;
    info!("listing clips");
    let clips = clip::list(&api).await.context("failed to list clips")?;

    let report = save_all(&api, &clips, &args.directory, &config.polling.retry_policy()).await;
    println!("Saved {} of {} clip(s).", report.saved, clips.len());
    if !report.failed.is_empty() {
        for (id, err) in &report.failed {
            eprintln!("{} clip {}: {}", "failed".red(), id, err);
        }
        bail!("{} clip(s) could not be saved", report.failed.len());
    }
    Ok(())
}

pub(crate) fn ensure_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub saved: usize,
    pub failed: Vec<(i64, ClipError)>,
}

/// Saves each clip under `directory`. A failing clip is recorded and the
/// batch moves on to the next one.
pub async fn save_all(
    api: &Api,
    clips: &[Clip],
    directory: &Path,
    policy: &RetryPolicy,
) -> BatchReport {
    let mut report = BatchReport::default();
    for clip in clips {
        let destination = directory.join(local_name(clip));
        info!(filename = %destination.display(), title = %clip.title, "saving clip");
        match clip.download(api, &destination, policy).await {
            Ok(()) => report.saved += 1,
            Err(err) => {
                error!(id = clip.id, error = %err, "failed to save clip");
                report.failed.push((clip.id, err));
            }
        }
    }
    report
}

/// File name for a clip inside the output directory; any directory part of
/// the service-provided name is dropped.
fn local_name(clip: &Clip) -> PathBuf {
    Path::new(&clip.filename)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("{}.mp4", clip.id)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::endpoints::Endpoints;

    fn clip(server: &MockServer, id: i64) -> Clip {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "download_url": format!("{}/clips/{id}.mp4", server.uri()),
            "filename": format!("{id}.mp4")
        }))
        .unwrap()
    }

    #[test]
    fn local_name_strips_directories() {
        let mut clip: Clip = serde_json::from_value(serde_json::json!({ "id": 3 })).unwrap();
        assert_eq!(local_name(&clip), PathBuf::from("3.mp4"));

        clip.filename = "../../etc/passwd".into();
        assert_eq!(local_name(&clip), PathBuf::from("passwd"));
    }

    #[tokio::test]
    async fn batch_continues_past_failing_clip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clips/1.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"first".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/clips/2.mp4"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/clips/3.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"third".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let api = Api::new(Endpoints::for_host(&server.uri())).unwrap();
        let clips = vec![clip(&server, 1), clip(&server, 2), clip(&server, 3)];
        let dir = tempfile::tempdir().unwrap();
        let policy = RetryPolicy {
            max_retries: 2,
            delay: Duration::ZERO,
        };

        let report = save_all(&api, &clips, dir.path(), &policy).await;

        assert_eq!(report.saved, 2);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0], (2, ClipError::AccessDenied { id: 2 })));
        assert_eq!(fs::read(dir.path().join("1.mp4")).unwrap(), b"first");
        assert_eq!(fs::read(dir.path().join("3.mp4")).unwrap(), b"third");
        assert!(!dir.path().join("2.mp4").exists());
    }
}
