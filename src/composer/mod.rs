use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::VideoConfig;
use crate::generator::Script;
use crate::StageError;

pub mod caption;
pub mod ffmpeg;

pub use caption::CaptionOverlay;
pub use ffmpeg::FfmpegEngine;

/// Properties of a loaded clip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// Everything the encoder needs to produce the final file
#[derive(Debug, Clone)]
pub struct EncodePlan {
    pub background: PathBuf,
    pub caption: CaptionOverlay,
    /// Temporary file holding the caption text
    pub caption_file: PathBuf,
    pub fps: u32,
    pub video_codec: String,
    pub audio_codec: String,
    /// Background carries an audio stream to re-encode
    pub has_audio: bool,
}

/// A finished video on local storage
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedVideo {
    pub path: PathBuf,
    /// Duration in seconds
    pub duration: f64,
    pub codec: String,
}

/// Low-level media operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Inspect a clip for frame size and duration
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Composite and encode according to `plan`, writing `output`
    async fn encode(&self, plan: &EncodePlan, output: &Path) -> Result<()>;
}

/// Renders a script over a background clip
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoComposer: Send + Sync {
    async fn compose(
        &self,
        script: &Script,
        background: &Path,
        output: &Path,
    ) -> std::result::Result<RenderedVideo, StageError>;
}

/// Output file that is removed unless the encode is committed
struct PartialOutput<'a> {
    path: &'a Path,
    committed: bool,
}

impl<'a> PartialOutput<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, committed: false }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialOutput<'_> {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            match std::fs::remove_file(self.path) {
                Ok(()) => tracing::debug!("Removed partial output {}", self.path.display()),
                Err(e) => tracing::warn!("Failed to remove partial output {}: {}", self.path.display(), e),
            }
        }
    }
}

/// Composer that burns the script in as a full-frame caption
pub struct CaptionComposer {
    engine: Box<dyn MediaEngine>,
    settings: VideoConfig,
    show_progress: bool,
}

impl CaptionComposer {
    pub fn new(engine: Box<dyn MediaEngine>, settings: VideoConfig) -> Self {
        Self {
            engine,
            settings,
            show_progress: true,
        }
    }

    /// Composer backed by the configured ffmpeg binaries
    pub fn with_ffmpeg(settings: VideoConfig) -> Self {
        let engine = FfmpegEngine::new(settings.ffmpeg_path.clone(), settings.ffprobe_path.clone());
        Self::new(Box::new(engine), settings)
    }

    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Caption sized and timed to the background
    pub fn caption_for(&self, script: &Script, background: &MediaInfo) -> CaptionOverlay {
        let max_chars = caption::max_line_chars(background.width, self.settings.font_size);

        CaptionOverlay {
            text: caption::wrap_caption(script.as_str(), max_chars),
            font_size: self.settings.font_size,
            color: self.settings.font_color.clone(),
            font_file: self.settings.font_file.clone(),
            width: background.width,
            height: background.height,
            duration: background.duration,
        }
    }

    async fn render(&self, script: &Script, background: &Path, output: &Path) -> Result<RenderedVideo> {
        crate::utils::check_file_accessible(background)
            .context("Background video is not readable")?;

        let info = self
            .engine
            .probe(background)
            .await
            .context("Failed to load background clip")?;

        tracing::debug!(
            "Background clip {}x{}, {}",
            info.width,
            info.height,
            crate::utils::format_duration(info.duration)
        );

        let caption = self.caption_for(script, &info);

        // Removed when it goes out of scope, whatever the encode outcome
        let mut caption_file = tempfile::Builder::new()
            .prefix("caption_")
            .suffix(".txt")
            .tempfile()
            .context("Failed to create caption file")?;
        caption_file
            .write_all(caption.text.as_bytes())
            .context("Failed to write caption file")?;
        caption_file.flush()?;

        let plan = EncodePlan {
            background: background.to_path_buf(),
            caption,
            caption_file: caption_file.path().to_path_buf(),
            fps: self.settings.fps,
            video_codec: self.settings.video_codec.clone(),
            audio_codec: self.settings.audio_codec.clone(),
            has_audio: info.has_audio,
        };

        let partial = PartialOutput::new(output);
        let progress = crate::utils::spinner(self.show_progress, "Rendering captioned video...");

        let encoded = self.engine.encode(&plan, output).await;
        release(caption_file);

        match encoded {
            Ok(()) => progress.finish_with_message("Render complete"),
            Err(e) => {
                progress.abandon_with_message("Render failed");
                return Err(e.context("Failed to encode video"));
            }
        }

        if !output.exists() {
            anyhow::bail!("Encoder reported success but produced no file at {}", output.display());
        }

        partial.commit();

        Ok(RenderedVideo {
            path: output.to_path_buf(),
            duration: info.duration,
            codec: plan.video_codec,
        })
    }
}

fn release(caption_file: NamedTempFile) {
    if let Err(e) = caption_file.close() {
        tracing::warn!("Failed to remove caption file: {}", e);
    }
}

#[async_trait]
impl VideoComposer for CaptionComposer {
    async fn compose(
        &self,
        script: &Script,
        background: &Path,
        output: &Path,
    ) -> std::result::Result<RenderedVideo, StageError> {
        match self.render(script, background, output).await {
            Ok(video) => {
                tracing::info!("Video created successfully: {}", video.path.display());
                Ok(video)
            }
            Err(e) => {
                tracing::error!("Video creation failed: {:#}", e);
                Err(StageError::Composition(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StageKind;
    use std::sync::{Arc, Mutex};

    fn background_file(dir: &Path) -> PathBuf {
        let path = dir.join("background.mp4");
        fs_err::write(&path, b"fake video bytes").unwrap();
        path
    }

    fn script() -> Script {
        Script::new("Humans first reached orbit in 1961 and have been exploring ever since")
    }

    #[tokio::test]
    async fn test_caption_matches_background_duration_and_frame() {
        let sizes = [(1920u32, 1080u32), (720, 1280)];
        let durations = [1.0f64, 60.0];

        for &(width, height) in &sizes {
            for &duration in &durations {
                let dir = tempfile::tempdir().unwrap();
                let background = background_file(dir.path());
                let output = dir.path().join("out.mp4");
                let captured: Arc<Mutex<Option<EncodePlan>>> = Arc::new(Mutex::new(None));

                let mut engine = MockMediaEngine::new();
                engine.expect_probe().times(1).returning(move |_| {
                    Ok(MediaInfo { duration, width, height, has_audio: true })
                });
                let sink = captured.clone();
                engine.expect_encode().times(1).returning(move |plan, output| {
                    *sink.lock().unwrap() = Some(plan.clone());
                    std::fs::write(output, b"encoded")?;
                    Ok(())
                });

                let composer = CaptionComposer::new(Box::new(engine), VideoConfig::default())
                    .show_progress(false);
                let video = composer.compose(&script(), &background, &output).await.unwrap();

                let plan = captured.lock().unwrap().take().unwrap();
                assert_eq!(plan.caption.duration, duration);
                assert_eq!((plan.caption.width, plan.caption.height), (width, height));
                assert_eq!(plan.caption.font_size, 70);
                assert_eq!(plan.caption.color, "white");
                assert_eq!(plan.fps, 24);
                assert_eq!(plan.video_codec, "libx264");
                assert_eq!(plan.audio_codec, "aac");
                assert_eq!(video.duration, duration);
                assert_eq!(video.path, output);
                assert_eq!(video.codec, "libx264");
            }
        }
    }

    #[tokio::test]
    async fn test_non_default_settings_flow_into_plan() {
        let dir = tempfile::tempdir().unwrap();
        let background = background_file(dir.path());
        let output = dir.path().join("out.mp4");
        let captured: Arc<Mutex<Option<EncodePlan>>> = Arc::new(Mutex::new(None));

        let mut engine = MockMediaEngine::new();
        engine.expect_probe().returning(|_| {
            Ok(MediaInfo { duration: 5.0, width: 1280, height: 720, has_audio: false })
        });
        let sink = captured.clone();
        engine.expect_encode().returning(move |plan, output| {
            *sink.lock().unwrap() = Some(plan.clone());
            std::fs::write(output, b"encoded")?;
            Ok(())
        });

        let settings = VideoConfig {
            font_size: 40,
            font_color: "yellow".to_string(),
            fps: 30,
            video_codec: "libx265".to_string(),
            audio_codec: "libopus".to_string(),
            ..VideoConfig::default()
        };
        let composer = CaptionComposer::new(Box::new(engine), settings).show_progress(false);
        composer.compose(&script(), &background, &output).await.unwrap();

        let plan = captured.lock().unwrap().take().unwrap();
        assert_eq!(plan.caption.font_size, 40);
        assert_eq!(plan.caption.color, "yellow");
        assert_eq!(plan.fps, 30);
        assert_eq!(plan.video_codec, "libx265");
        assert_eq!(plan.audio_codec, "libopus");
    }

    #[tokio::test]
    async fn test_script_reaches_caption_file_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let background = background_file(dir.path());
        let output = dir.path().join("out.mp4");
        let written: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let mut engine = MockMediaEngine::new();
        engine.expect_probe().returning(|_| {
            Ok(MediaInfo { duration: 8.0, width: 1920, height: 1080, has_audio: false })
        });
        let sink = written.clone();
        engine.expect_encode().times(1).returning(move |plan, output| {
            *sink.lock().unwrap() = Some(std::fs::read_to_string(&plan.caption_file)?);
            assert!(!plan.has_audio);
            std::fs::write(output, b"encoded")?;
            Ok(())
        });

        let composer = CaptionComposer::new(Box::new(engine), VideoConfig::default()).show_progress(false);
        let script = Script::new(r"Mars is 38% of Earth's gravity \ 100%{x}");
        composer.compose(&script, &background, &output).await.unwrap();

        let caption = written.lock().unwrap().take().unwrap();
        assert_eq!(caption, r"Mars is 38% of Earth's gravity \ 100%{x}");
    }

    /// Engine that leaves a half-written file behind and then fails
    struct FailingEngine {
        caption_file: Arc<Mutex<Option<PathBuf>>>,
    }

    #[async_trait]
    impl MediaEngine for FailingEngine {
        async fn probe(&self, _path: &Path) -> Result<MediaInfo> {
            Ok(MediaInfo { duration: 10.0, width: 1920, height: 1080, has_audio: true })
        }

        async fn encode(&self, plan: &EncodePlan, output: &Path) -> Result<()> {
            assert!(plan.caption_file.exists());
            *self.caption_file.lock().unwrap() = Some(plan.caption_file.clone());
            std::fs::write(output, b"truncated")?;
            anyhow::bail!("encoder crashed")
        }
    }

    #[tokio::test]
    async fn test_failed_encode_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let background = background_file(dir.path());
        let output = dir.path().join("out.mp4");
        let caption_file = Arc::new(Mutex::new(None));

        let engine = FailingEngine { caption_file: caption_file.clone() };
        let composer = CaptionComposer::new(Box::new(engine), VideoConfig::default())
            .show_progress(false);

        let err = composer.compose(&script(), &background, &output).await.unwrap_err();
        assert_eq!(err.kind(), StageKind::Composition);
        assert!(err.to_string().contains("encoder crashed"));

        let caption_path = caption_file.lock().unwrap().clone().unwrap();
        assert!(!caption_path.exists(), "caption file leaked");
        assert!(!output.exists(), "partial output left behind");
        assert!(background.exists());
    }

    #[tokio::test]
    async fn test_missing_background_fails_before_probe() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MockMediaEngine::new();
        engine.expect_probe().times(0);
        engine.expect_encode().times(0);

        let composer = CaptionComposer::new(Box::new(engine), VideoConfig::default())
            .show_progress(false);
        let err = composer
            .compose(&script(), &dir.path().join("missing.mp4"), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), StageKind::Composition);
    }
}
