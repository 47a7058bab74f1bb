//! YouTube resumable upload protocol.
//!
//! A POST opens an upload session and returns its URL in `Location`. The file is then sent
//! in sequential PUT requests carrying `Content-Range`. The server answers `308` with the
//! acknowledged `Range` while bytes are missing and `200`/`201` with the video resource once
//! the last chunk lands.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use url::Url;

use super::{UploadResult, VideoHost, VideoMetadata, Visibility};
use crate::auth::Session;

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
    status: Option<ResourceStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceStatus {
    privacy_status: Option<Visibility>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Client for the platform's media-ingestion endpoint
pub struct YouTubeClient {
    client: Client,
    upload_url: String,
    chunk_size: usize,
    show_progress: bool,
}

impl YouTubeClient {
    pub fn new(upload_url: impl Into<String>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            anyhow::bail!("Chunk size must be greater than zero");
        }

        // 308 means "resume incomplete" here, never a redirect
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client for uploads")?;

        Ok(Self {
            client,
            upload_url: upload_url.into(),
            chunk_size,
            show_progress: true,
        })
    }

    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Open an upload session and return its URL
    async fn start_session(
        &self,
        session: &Session,
        metadata: &VideoMetadata,
        content_type: &str,
        total: u64,
    ) -> Result<Url> {
        let parts = metadata.parts();

        let response = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable"), ("part", parts.as_str())])
            .bearer_auth(&session.access_token)
            .header("X-Upload-Content-Type", content_type)
            .header("X-Upload-Content-Length", total.to_string())
            .json(metadata)
            .send()
            .await
            .context("Failed to start resumable upload")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "Upload session rejected: HTTP {} - {}",
                status,
                error_message(response).await
            );
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| anyhow::anyhow!("Upload session response has no Location header"))?;

        Url::parse(&self.upload_url)
            .and_then(|base| base.join(location))
            .context("Invalid upload session URL")
    }

    /// Send the file chunk by chunk until the platform returns the video resource
    async fn send_chunks(
        &self,
        session: &Session,
        session_url: &Url,
        path: &Path,
        content_type: &str,
        total: u64,
    ) -> Result<VideoResource> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let progress = crate::utils::byte_progress(self.show_progress, total, "Uploading to YouTube...");
        let mut offset = 0u64;

        loop {
            let len = (self.chunk_size as u64).min(total - offset);
            let mut chunk = vec![0u8; len as usize];
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut chunk).await.context("Failed to read video file")?;

            let last_byte = offset + len - 1;
            tracing::debug!("Sending bytes {}-{}/{}", offset, last_byte, total);

            let response = self
                .client
                .put(session_url.clone())
                .bearer_auth(&session.access_token)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .header(reqwest::header::CONTENT_RANGE, format!("bytes {}-{}/{}", offset, last_byte, total))
                .body(chunk)
                .send()
                .await
                .context("Failed to send upload chunk")?;

            match response.status() {
                StatusCode::OK | StatusCode::CREATED => {
                    progress.finish_with_message("Upload complete");
                    return response
                        .json::<VideoResource>()
                        .await
                        .context("Failed to parse upload response");
                }
                StatusCode::PERMANENT_REDIRECT => {
                    let next = acknowledged_offset(response.headers().get(reqwest::header::RANGE));
                    if next <= offset {
                        progress.abandon_with_message("Upload stalled");
                        anyhow::bail!("Platform acknowledged no bytes of the chunk at offset {}", offset);
                    }
                    if next >= total {
                        progress.abandon_with_message("Upload incomplete");
                        anyhow::bail!("Platform acknowledged every byte but did not finish the upload");
                    }
                    offset = next;
                    progress.set_position(offset);
                }
                status => {
                    progress.abandon_with_message("Upload failed");
                    anyhow::bail!("Upload chunk rejected: HTTP {} - {}", status, error_message(response).await);
                }
            }
        }
    }
}

/// Next byte to send, from a `Range: bytes=0-N` acknowledgement
pub fn acknowledged_offset(range: Option<&reqwest::header::HeaderValue>) -> u64 {
    range
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("bytes="))
        .and_then(|value| value.split_once('-'))
        .and_then(|(_, end)| end.trim().parse::<u64>().ok())
        .map(|end| end + 1)
        .unwrap_or(0)
}

/// MIME type sent for the uploaded media
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()).map(|ext| ext.to_lowercase()).as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text)
}

#[async_trait]
impl VideoHost for YouTubeClient {
    async fn insert_video(
        &self,
        session: &Session,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<UploadResult> {
        let total = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Cannot access {}", path.display()))?
            .len();

        if total == 0 {
            anyhow::bail!("Refusing to upload empty file {}", path.display());
        }

        tracing::info!(
            "Uploading {} ({}) in {} chunks",
            path.display(),
            crate::utils::format_file_size(total),
            crate::utils::format_file_size(self.chunk_size as u64)
        );

        let content_type = content_type_for(path);
        let session_url = self.start_session(session, metadata, content_type, total).await?;
        let resource = self.send_chunks(session, &session_url, path, content_type, total).await?;

        let visibility = resource
            .status
            .and_then(|status| status.privacy_status)
            .unwrap_or(metadata.status.privacy_status);

        Ok(UploadResult {
            video_id: resource.id,
            visibility,
        })
    }
}
