use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::auth::PlatformAuthenticator;
use crate::composer::{CaptionComposer, VideoComposer};
use crate::config::Config;
use crate::generator::{ContentGenerator, OpenAiGenerator};
use crate::upload::{UploadDefaults, UploadResult, Uploader, YouTubeClient};
use crate::{PipelineError, StageError};

/// One pipeline invocation
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub prompt: String,
    pub background_video_path: PathBuf,
    pub title: Option<String>,
}

impl VideoRequest {
    pub fn new(prompt: impl Into<String>, background_video_path: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            background_video_path: background_video_path.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.prompt.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("prompt must not be empty".to_string()));
        }

        if !self.background_video_path.is_file() {
            return Err(PipelineError::InvalidRequest(format!(
                "background video not found: {}",
                self.background_video_path.display()
            )));
        }

        Ok(())
    }
}

/// Identity of a single run, fixed when the run starts
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Local>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: crate::utils::generate_run_id(),
            started_at: Local::now(),
        }
    }

    /// `YYYYMMDD_HHMMSS` of the run start
    pub fn timestamp(&self) -> String {
        self.started_at.format("%Y%m%d_%H%M%S").to_string()
    }

    pub fn output_file_name(&self) -> String {
        format!("output_video_{}_{}.mp4", self.timestamp(), self.run_id)
    }

    pub fn default_title(&self) -> String {
        format!("AI Generated Video - {}", self.timestamp())
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings the orchestrator applies around the stages
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub keep_failed_output: bool,
    pub description_template: String,
    pub tags: Vec<String>,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            output_dir: config.app.output_dir.clone(),
            keep_failed_output: config.app.keep_failed_output,
            description_template: config.app.description_template.clone(),
            tags: config.app.tags.clone(),
        }
    }
}

impl PipelineSettings {
    /// Upload description with `{prompt}` substituted
    pub fn description(&self, prompt: &str) -> String {
        self.description_template.replace("{prompt}", prompt)
    }
}

/// Deletes the rendered file when dropped, unless told to keep it
struct OutputGuard {
    path: PathBuf,
    keep: bool,
}

impl OutputGuard {
    fn new(path: PathBuf, keep: bool) -> Self {
        Self { path, keep }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Delete after a successful upload
    fn remove(mut self) {
        self.keep = false;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }

        if self.keep {
            tracing::warn!("Leaving rendered video on disk: {}", self.path.display());
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed rendered video {}", self.path.display()),
            Err(e) => tracing::warn!("Failed to remove rendered video {}: {}", self.path.display(), e),
        }
    }
}

/// Runs generate, compose, authenticate and upload in order
pub struct PipelineOrchestrator {
    generator: Box<dyn ContentGenerator>,
    composer: Box<dyn VideoComposer>,
    uploader: Uploader,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    pub fn new(
        generator: Box<dyn ContentGenerator>,
        composer: Box<dyn VideoComposer>,
        uploader: Uploader,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            generator,
            composer,
            uploader,
            settings,
        }
    }

    /// Wire the production stages from configuration
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;

        let generator = OpenAiGenerator::new(config.openai.clone());
        let composer = CaptionComposer::with_ffmpeg(config.video.clone())
            .show_progress(config.app.show_progress);
        let host = YouTubeClient::new(config.youtube.upload_url.clone(), config.youtube.chunk_size)
            .map_err(PipelineError::Config)?
            .show_progress(config.app.show_progress);
        let authenticator = PlatformAuthenticator::new(
            config.youtube.client_secrets_file.clone(),
            config.youtube.scopes.clone(),
        );
        let uploader = Uploader::new(
            Box::new(authenticator),
            Box::new(host),
            UploadDefaults::from(&config.youtube),
        );

        Ok(Self::new(
            Box::new(generator),
            Box::new(composer),
            uploader,
            PipelineSettings::from(config),
        ))
    }

    /// Run the whole pipeline for one request
    pub async fn run(&mut self, request: &VideoRequest) -> Result<UploadResult, PipelineError> {
        let context = RunContext::new();
        self.run_with_context(request, &context).await
    }

    pub async fn run_with_context(
        &mut self,
        request: &VideoRequest,
        context: &RunContext,
    ) -> Result<UploadResult, PipelineError> {
        if let Err(e) = request.validate() {
            tracing::error!("Pipeline failed: {}", e);
            return Err(e);
        }

        tracing::info!("Starting pipeline run {}", context.run_id);

        match self.execute(request, context).await {
            Ok(result) => {
                tracing::info!(
                    "Pipeline run {} finished: video {} ({})",
                    context.run_id,
                    result.video_id,
                    result.visibility
                );
                Ok(result)
            }
            Err(source) => {
                tracing::error!("Pipeline failed: {}", source);
                Err(PipelineError::Stage {
                    run_id: context.run_id.clone(),
                    source,
                })
            }
        }
    }

    async fn execute(&mut self, request: &VideoRequest, context: &RunContext) -> Result<UploadResult, StageError> {
        let script = self.generator.generate(&request.prompt).await?;

        let output = OutputGuard::new(
            self.settings.output_dir.join(context.output_file_name()),
            self.settings.keep_failed_output,
        );

        let video = self
            .composer
            .compose(&script, &request.background_video_path, output.path())
            .await?;
        drop(script);

        let title = request
            .title
            .clone()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| context.default_title());
        let description = self.settings.description(&request.prompt);

        let result = self
            .uploader
            .upload(&video, &title, &description, &self.settings.tags)
            .await?;

        output.remove();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MockAuthenticator, Session};
    use crate::composer::{MockVideoComposer, RenderedVideo};
    use crate::generator::{MockContentGenerator, Script};
    use crate::upload::{MockVideoHost, Visibility};
    use crate::StageKind;
    use std::sync::{Arc, Mutex};

    const PROMPT: &str = "Create a 1-minute educational video about space exploration";

    struct Fixture {
        dir: tempfile::TempDir,
        background: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let background = dir.path().join("background_10s.mp4");
            fs_err::write(&background, b"ten seconds of background").unwrap();
            Self { dir, background }
        }

        fn output_dir(&self) -> PathBuf {
            let out = self.dir.path().join("out");
            fs_err::create_dir_all(&out).unwrap();
            out
        }

        fn settings(&self, keep_failed_output: bool) -> PipelineSettings {
            let config = Config::default();
            PipelineSettings {
                output_dir: self.output_dir(),
                keep_failed_output,
                ..PipelineSettings::from(&config)
            }
        }

        fn rendered_files(&self) -> Vec<String> {
            fs_err::read_dir(self.output_dir())
                .unwrap()
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .filter(|name| name.starts_with("output_video_") && name.ends_with(".mp4"))
                .collect()
        }
    }

    fn generator() -> MockContentGenerator {
        let mut generator = MockContentGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Ok(Script::new("Rockets, orbits and the moon landing.")));
        generator
    }

    fn composer() -> MockVideoComposer {
        let mut composer = MockVideoComposer::new();
        composer.expect_compose().times(1).returning(|_, _, output| {
            std::fs::write(output, b"rendered").map_err(|e| StageError::Composition(e.into()))?;
            Ok(RenderedVideo {
                path: output.to_path_buf(),
                duration: 10.0,
                codec: "libx264".to_string(),
            })
        });
        composer
    }

    fn authenticator() -> MockAuthenticator {
        let mut authenticator = MockAuthenticator::new();
        authenticator
            .expect_authenticate()
            .times(1)
            .returning(|| Ok(Session::new("token")));
        authenticator
    }

    fn orchestrator(
        generator: MockContentGenerator,
        composer: MockVideoComposer,
        host: MockVideoHost,
        settings: PipelineSettings,
    ) -> PipelineOrchestrator {
        let uploader = Uploader::new(Box::new(authenticator()), Box::new(host), UploadDefaults::default());
        PipelineOrchestrator::new(Box::new(generator), Box::new(composer), uploader, settings)
    }

    #[tokio::test]
    async fn test_end_to_end_success_cleans_up() {
        let fixture = Fixture::new();
        let mut host = MockVideoHost::new();
        host.expect_insert_video()
            .times(1)
            .withf(|_, path, metadata| {
                path.exists()
                    && metadata.snippet.description == format!("AI generated video based on: {}", PROMPT)
                    && metadata.snippet.tags == vec!["AI Generated".to_string(), "Automated Content".to_string()]
                    && metadata.status.privacy_status == Visibility::Private
            })
            .returning(|_, _, _| Ok(UploadResult { video_id: "yt-42".to_string(), visibility: Visibility::Private }));

        let mut pipeline = orchestrator(generator(), composer(), host, fixture.settings(true));
        let result = pipeline
            .run(&VideoRequest::new(PROMPT, &fixture.background))
            .await
            .unwrap();

        assert!(!result.video_id.is_empty());
        assert!(fixture.rendered_files().is_empty());
        assert!(fixture.background.exists());
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_rendered_file() {
        let fixture = Fixture::new();
        let mut host = MockVideoHost::new();
        host.expect_insert_video()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("HTTP 500 backendError")));

        let mut pipeline = orchestrator(generator(), composer(), host, fixture.settings(true));
        let err = pipeline
            .run(&VideoRequest::new(PROMPT, &fixture.background))
            .await
            .unwrap_err();

        assert_eq!(err.stage_kind(), Some(StageKind::Upload));
        assert!(err.to_string().contains("backendError"));
        assert_eq!(fixture.rendered_files().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_failure_can_clean_up() {
        let fixture = Fixture::new();
        let mut host = MockVideoHost::new();
        host.expect_insert_video()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("connection reset")));

        let mut pipeline = orchestrator(generator(), composer(), host, fixture.settings(false));
        assert!(pipeline.run(&VideoRequest::new(PROMPT, &fixture.background)).await.is_err());
        assert!(fixture.rendered_files().is_empty());
    }

    #[tokio::test]
    async fn test_default_title_uses_run_timestamp() {
        let fixture = Fixture::new();
        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = titles.clone();

        let mut host = MockVideoHost::new();
        host.expect_insert_video().times(1).returning(move |_, _, metadata| {
            sink.lock().unwrap().push(metadata.snippet.title.clone());
            Ok(UploadResult { video_id: "id".to_string(), visibility: Visibility::Private })
        });

        let mut pipeline = orchestrator(generator(), composer(), host, fixture.settings(true));
        pipeline.run(&VideoRequest::new(PROMPT, &fixture.background)).await.unwrap();

        let title = titles.lock().unwrap()[0].clone();
        let stamp = title.strip_prefix("AI Generated Video - ").unwrap();
        let digits: String = stamp.chars().filter(|c| *c != '_').collect();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
        assert_eq!(digits.len(), 14);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_explicit_title_and_output_name() {
        let fixture = Fixture::new();
        let context = RunContext::new();
        let expected_output = fixture.output_dir().join(context.output_file_name());

        let mut composer = MockVideoComposer::new();
        let expected = expected_output.clone();
        composer.expect_compose().times(1).returning(move |_, _, output| {
            assert_eq!(output, expected.as_path());
            std::fs::write(output, b"rendered").map_err(|e| StageError::Composition(e.into()))?;
            Ok(RenderedVideo { path: output.to_path_buf(), duration: 10.0, codec: "libx264".to_string() })
        });

        let mut host = MockVideoHost::new();
        host.expect_insert_video()
            .times(1)
            .withf(|_, _, metadata| metadata.snippet.title == "Journey to Mars")
            .returning(|_, _, _| Ok(UploadResult { video_id: "id".to_string(), visibility: Visibility::Private }));

        let mut pipeline = orchestrator(generator(), composer, host, fixture.settings(true));
        let request = VideoRequest::new(PROMPT, &fixture.background).with_title("Journey to Mars");
        pipeline.run_with_context(&request, &context).await.unwrap();

        let name = context.output_file_name();
        assert!(name.starts_with("output_video_"));
        assert!(name.ends_with(&format!("_{}.mp4", context.run_id)));
        assert!(!expected_output.exists());
    }

    #[tokio::test]
    async fn test_generation_failure_stops_pipeline() {
        let fixture = Fixture::new();
        let mut generator = MockContentGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Err(StageError::Generation(anyhow::anyhow!("invalid api key"))));

        let mut composer = MockVideoComposer::new();
        composer.expect_compose().times(0);

        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_authenticate().times(0);
        let mut host = MockVideoHost::new();
        host.expect_insert_video().times(0);

        let uploader = Uploader::new(Box::new(authenticator), Box::new(host), UploadDefaults::default());
        let mut pipeline =
            PipelineOrchestrator::new(Box::new(generator), Box::new(composer), uploader, fixture.settings(true));

        let err = pipeline.run(&VideoRequest::new(PROMPT, &fixture.background)).await.unwrap_err();
        assert_eq!(err.stage_kind(), Some(StageKind::Generation));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_up_front() {
        let fixture = Fixture::new();
        let mut generator = MockContentGenerator::new();
        generator.expect_generate().times(0);

        let uploader = Uploader::new(
            Box::new(MockAuthenticator::new()),
            Box::new(MockVideoHost::new()),
            UploadDefaults::default(),
        );
        let mut pipeline = PipelineOrchestrator::new(
            Box::new(generator),
            Box::new(MockVideoComposer::new()),
            uploader,
            fixture.settings(true),
        );

        let empty = pipeline.run(&VideoRequest::new("  ", &fixture.background)).await.unwrap_err();
        assert!(matches!(empty, PipelineError::InvalidRequest(_)));

        let missing = pipeline
            .run(&VideoRequest::new(PROMPT, fixture.dir.path().join("missing.mp4")))
            .await
            .unwrap_err();
        assert!(matches!(missing, PipelineError::InvalidRequest(_)));
        assert_eq!(missing.stage_kind(), None);
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let err = PipelineOrchestrator::from_config(&Config::default()).err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
