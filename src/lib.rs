//! Promptcast - A Rust CLI tool that turns a text prompt into a captioned video
//!
//! This library generates a script with a chat-completion API, burns it as a caption over a
//! background clip with ffmpeg, and uploads the result to YouTube with the resumable protocol.

pub mod auth;
pub mod cli;
pub mod composer;
pub mod config;
pub mod generator;
pub mod logging;
pub mod pipeline;
pub mod upload;
pub mod utils;

pub use auth::{Authenticator, InstalledAppFlow, Session};
pub use cli::{Cli, Commands};
pub use composer::{CaptionComposer, RenderedVideo, VideoComposer};
pub use config::Config;
pub use generator::{ContentGenerator, OpenAiGenerator, Script};
pub use pipeline::{PipelineOrchestrator, VideoRequest};
pub use upload::{UploadResult, Uploader, Visibility};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Which stage of the pipeline produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Authentication,
    Generation,
    Composition,
    Upload,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Authentication => write!(f, "authentication"),
            StageKind::Generation => write!(f, "generation"),
            StageKind::Composition => write!(f, "composition"),
            StageKind::Upload => write!(f, "upload"),
        }
    }
}

/// Error raised by a single pipeline stage
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("YouTube authentication failed: {0:#}")]
    Authentication(anyhow::Error),

    #[error("Content generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("Video creation failed: {0:#}")]
    Composition(anyhow::Error),

    #[error("Video upload failed: {0:#}")]
    Upload(anyhow::Error),
}

impl StageError {
    pub fn kind(&self) -> StageKind {
        match self {
            StageError::Authentication(_) => StageKind::Authentication,
            StageError::Generation(_) => StageKind::Generation,
            StageError::Composition(_) => StageKind::Composition,
            StageError::Upload(_) => StageKind::Upload,
        }
    }
}

/// Error returned at the orchestrator boundary
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0:#}")]
    Config(anyhow::Error),

    #[error("{source}")]
    Stage {
        run_id: String,
        #[source]
        source: StageError,
    },
}

impl PipelineError {
    /// The failing stage, if the error came from one
    pub fn stage_kind(&self) -> Option<StageKind> {
        match self {
            PipelineError::Stage { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}
