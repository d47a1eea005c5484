use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::endpoints::Envelope;
use crate::fs_utils;
use crate::http::{Api, RequestError};
use crate::retry::{self, Attempt, RetryPolicy};

#[derive(Debug, Error)]
pub enum ClipError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("service returned no clips")]
    EmptyResult,
    #[error("service rejected the request ({code}): {description} {detail}")]
    ServiceRejected {
        code: i64,
        description: String,
        detail: String,
    },
    #[error("failed to delete clip {id}: {reason}")]
    DeleteFailed { id: i64, reason: String },
    #[error("access to clip {id} was denied")]
    AccessDenied { id: i64 },
    #[error("clip {id} not processed after {retries} retries")]
    Timeout { id: i64, retries: u32 },
    #[error("too many errors fetching clip {id} (last status {status})")]
    TooManyErrors { id: i64, status: StatusCode },
    #[error("failed to open {}", .path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move {} to {}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A rendered video segment as reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub download_url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub public_link: String,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(rename = "length_in_seconds", default, deserialize_with = "nullable")]
    pub length_seconds: f64,
    /// Unix seconds.
    #[serde(default, deserialize_with = "nullable")]
    pub start_time: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_time: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClipGroup {
    #[serde(default)]
    clips: Vec<Clip>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// What the download loop does with a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Stream,
    WaitForProcessing,
    RetryAfterError,
    Deny,
}

fn classify(status: StatusCode) -> Transition {
    match status {
        StatusCode::OK => Transition::Stream,
        StatusCode::FORBIDDEN => Transition::Deny,
        StatusCode::NOT_FOUND => Transition::WaitForProcessing,
        _ => Transition::RetryAfterError,
    }
}

fn check_status<T>(payload: &Envelope<T>) -> Result<(), ClipError> {
    if payload.status == 0 {
        return Ok(());
    }
    Err(ClipError::ServiceRejected {
        code: payload.status,
        description: payload.status_description.clone().unwrap_or_default(),
        detail: payload.status_detail.clone().unwrap_or_default(),
    })
}

/// Every visible clip, in the order the service lists them.
pub async fn list(api: &Api) -> Result<Vec<Clip>, ClipError> {
    let payload: Envelope<Vec<ClipGroup>> = api.get_payload(&api.endpoints().list_clips).await?;
    check_status(&payload)?;
    Ok(payload
        .items
        .into_iter()
        .flat_map(|group| group.clips)
        .collect())
}

pub async fn find(api: &Api, id: i64) -> Result<Option<Clip>, ClipError> {
    let clips = list(api).await?;
    Ok(clips.into_iter().find(|clip| clip.id == id))
}

/// Asks the service to render `duration_seconds` of footage from `camera_id`
/// starting at `start`. The returned clip is usually not downloadable yet.
pub async fn create(
    api: &Api,
    camera_id: &str,
    start: DateTime<Utc>,
    duration_seconds: u32,
) -> Result<Clip, ClipError> {
    let form = [
        ("uuid", camera_id.to_string()),
        ("start_date", start.timestamp().to_string()),
        ("length", duration_seconds.to_string()),
        ("is_public", "true".to_string()),
        ("is_time_lapse", "false".to_string()),
        ("donate_video", "false".to_string()),
    ];
    info!(camera = camera_id, start = %start, duration_seconds, "requesting clip");

    let payload: Envelope<Vec<Clip>> = api
        .post_form_payload(&api.endpoints().create_clip, &form)
        .await?;
    check_status(&payload)?;
    payload
        .items
        .into_iter()
        .next()
        .ok_or(ClipError::EmptyResult)
}

pub async fn delete(api: &Api, id: i64) -> Result<(), ClipError> {
    let url = api.endpoints().delete_clip.url_for(id);
    info!(id, %url, "deleting clip");
    match api.delete(&url).await {
        Ok(StatusCode::OK) => {
            info!(id, "clip deleted");
            Ok(())
        }
        Ok(status) => Err(ClipError::DeleteFailed {
            id,
            reason: format!("status {status}"),
        }),
        Err(err) => Err(ClipError::DeleteFailed {
            id,
            reason: err.to_string(),
        }),
    }
}

impl Clip {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.start_time.trunc() as i64;
        let nanos = (self.start_time.fract() * 1e9) as u32;
        DateTime::from_timestamp(secs, nanos)
    }

    pub async fn delete(&self, api: &Api) -> Result<(), ClipError> {
        delete(api, self.id).await
    }

    /// Waits for the service to finish rendering the clip and saves it to
    /// `destination`. The body is written to `<destination>.tmp` first and
    /// renamed into place once complete; the temp file is removed on failure.
    pub async fn download(
        &self,
        api: &Api,
        destination: &Path,
        policy: &RetryPolicy,
    ) -> Result<(), ClipError> {
        let partial = fs_utils::partial_path(destination);
        let file = File::create(&partial)
            .await
            .map_err(|source| ClipError::CreateFile {
                path: partial.clone(),
                source,
            })?;

        let saved = match self.fetch_into(api, file, &partial, policy).await {
            Ok(()) => fs::rename(&partial, destination)
                .await
                .map_err(|source| ClipError::Rename {
                    from: partial.clone(),
                    to: destination.to_path_buf(),
                    source,
                }),
            Err(err) => Err(err),
        };

        if saved.is_err() {
            if let Err(err) = fs::remove_file(&partial).await {
                warn!(path = %partial.display(), error = %err, "failed to remove partial download");
            }
        } else {
            info!(id = self.id, filename = %destination.display(), "clip saved");
        }
        saved
    }

    async fn fetch_into(
        &self,
        api: &Api,
        mut file: File,
        partial: &Path,
        policy: &RetryPolicy,
    ) -> Result<(), ClipError> {
        let mut response = retry::retry(policy, |attempt| {
            self.request_once(api, attempt, policy.max_retries)
        })
        .await?;

        info!(id = self.id, filename = %partial.display(), "streaming clip");
        let write_err = |source: io::Error| ClipError::Write {
            path: partial.to_path_buf(),
            source,
        };
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| write_err(io::Error::other(err)))?
        {
            file.write_all(&chunk).await.map_err(write_err)?;
        }
        file.flush().await.map_err(write_err)?;
        Ok(())
    }

    async fn request_once(
        &self,
        api: &Api,
        attempt: u32,
        max_retries: u32,
    ) -> Attempt<Response, ClipError> {
        let response = match api.get(&self.download_url).await {
            Ok(response) => response,
            Err(err) => return Attempt::Fatal(err.into()),
        };

        let status = response.status();
        match classify(status) {
            Transition::Stream => Attempt::Done(response),
            Transition::Deny => {
                warn!(id = self.id, url = %self.download_url, %status, "access to clip denied");
                Attempt::Fatal(ClipError::AccessDenied { id: self.id })
            }
            Transition::WaitForProcessing => {
                info!(id = self.id, %status, attempt, "waiting for clip to be processed");
                Attempt::Retry(ClipError::Timeout {
                    id: self.id,
                    retries: max_retries,
                })
            }
            Transition::RetryAfterError => {
                info!(id = self.id, %status, attempt, "hopefully temporary error fetching clip");
                Attempt::Retry(ClipError::TooManyErrors {
                    id: self.id,
                    status,
                })
            }
        }
    }
}
