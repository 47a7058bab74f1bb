use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::auth::{Authenticator, Session};
use crate::composer::RenderedVideo;
use crate::config::YoutubeConfig;
use crate::StageError;

pub mod resumable;

pub use resumable::YouTubeClient;

/// Who can see an uploaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Unlisted,
    Public,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Private => write!(f, "private"),
            Visibility::Unlisted => write!(f, "unlisted"),
            Visibility::Public => write!(f, "public"),
        }
    }
}

/// Terminal artifact of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub video_id: String,
    pub visibility: Visibility,
}

/// Request body for a video insert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub snippet: Snippet,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub privacy_status: Visibility,
    pub self_declared_made_for_kids: bool,
}

impl VideoMetadata {
    /// Value for the `part` parameter: the top-level keys present in the body
    pub fn parts(&self) -> String {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect::<Vec<_>>().join(","),
            _ => String::new(),
        }
    }
}

/// Category, visibility and kids declaration applied to every upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadDefaults {
    pub category_id: String,
    pub privacy_status: Visibility,
    pub made_for_kids: bool,
}

impl Default for UploadDefaults {
    fn default() -> Self {
        Self::from(&YoutubeConfig::default())
    }
}

impl From<&YoutubeConfig> for UploadDefaults {
    fn from(config: &YoutubeConfig) -> Self {
        Self {
            category_id: config.category_id.clone(),
            privacy_status: config.privacy_status,
            made_for_kids: config.made_for_kids,
        }
    }
}

impl UploadDefaults {
    pub fn metadata(&self, title: &str, description: &str, tags: &[String]) -> VideoMetadata {
        VideoMetadata {
            snippet: Snippet {
                title: title.to_string(),
                description: description.to_string(),
                tags: tags.to_vec(),
                category_id: self.category_id.clone(),
            },
            status: Status {
                privacy_status: self.privacy_status,
                self_declared_made_for_kids: self.made_for_kids,
            },
        }
    }
}

/// Transport that pushes a local file to the hosting platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoHost: Send + Sync {
    async fn insert_video(
        &self,
        session: &Session,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<UploadResult>;
}

/// Uploads rendered videos, authenticating lazily on first use
pub struct Uploader {
    authenticator: Box<dyn Authenticator>,
    host: Box<dyn VideoHost>,
    defaults: UploadDefaults,
    session: Option<Session>,
}

impl Uploader {
    pub fn new(
        authenticator: Box<dyn Authenticator>,
        host: Box<dyn VideoHost>,
        defaults: UploadDefaults,
    ) -> Self {
        Self {
            authenticator,
            host,
            defaults,
            session: None,
        }
    }

    /// Use an already established session instead of authenticating
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Authenticate unless a session already exists
    pub async fn ensure_authenticated(&mut self) -> std::result::Result<&Session, StageError> {
        session_or_authenticate(&mut self.session, self.authenticator.as_ref()).await
    }

    pub async fn upload(
        &mut self,
        video: &RenderedVideo,
        title: &str,
        description: &str,
        tags: &[String],
    ) -> std::result::Result<UploadResult, StageError> {
        let session = session_or_authenticate(&mut self.session, self.authenticator.as_ref()).await?;

        if session.is_expired() {
            tracing::warn!("Session expired; the platform will likely reject this upload");
        }

        let metadata = self.defaults.metadata(title, description, tags);
        tracing::debug!(
            "Uploading {} ({:.1}s, {}) as '{}'",
            video.path.display(),
            video.duration,
            video.codec,
            title
        );

        match self.host.insert_video(session, &video.path, &metadata).await {
            Ok(result) => {
                tracing::info!("Video uploaded successfully. Video ID: {}", result.video_id);
                Ok(result)
            }
            Err(e) => {
                tracing::error!("Video upload failed: {:#}", e);
                Err(StageError::Upload(e))
            }
        }
    }
}

async fn session_or_authenticate<'a>(
    slot: &'a mut Option<Session>,
    authenticator: &dyn Authenticator,
) -> std::result::Result<&'a Session, StageError> {
    let session = match slot.take() {
        Some(session) => session,
        None => authenticator
            .authenticate()
            .await
            .map_err(StageError::Authentication)?,
    };

    Ok(slot.insert(session))
}
