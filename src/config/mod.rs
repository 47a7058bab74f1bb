use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::upload::Visibility;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Text generation service
    pub openai: OpenAiConfig,

    /// Hosting platform settings
    pub youtube: YoutubeConfig,

    /// Caption rendering and encoding
    pub video: VideoConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key (overridden by OPENAI_API_KEY)
    pub api_key: String,

    /// Base URL of the chat completion API
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// System role sent ahead of every prompt
    pub system_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    /// OAuth client secrets JSON downloaded from the Google console
    pub client_secrets_file: PathBuf,

    /// OAuth scopes requested during authorization
    pub scopes: Vec<String>,

    /// Media ingestion endpoint
    pub upload_url: String,

    /// Bytes sent per resumable chunk
    pub chunk_size: usize,

    /// Video category id
    pub category_id: String,

    /// Visibility at creation time
    pub privacy_status: Visibility,

    /// Made-for-kids declaration
    pub made_for_kids: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub ffmpeg_path: String,

    pub ffprobe_path: String,

    /// Caption font size in pixels
    pub font_size: u32,

    /// Caption color, any ffmpeg color expression
    pub font_color: String,

    /// Optional font file; ffmpeg falls back to fontconfig when unset
    pub font_file: Option<PathBuf>,

    /// Output frame rate
    pub fps: u32,

    pub video_codec: String,

    pub audio_codec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory rendered videos are written to
    pub output_dir: PathBuf,

    /// Append-only process log
    pub log_file: PathBuf,

    /// Leave the rendered file on disk when a later stage fails
    pub keep_failed_output: bool,

    /// Upload description, `{prompt}` is replaced with the request prompt
    pub description_template: String,

    /// Tags attached to every upload
    pub tags: Vec<String>,

    /// Show progress bars and spinners
    pub show_progress: bool,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            system_prompt: "You are a video script writer.".to_string(),
        }
    }
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            client_secrets_file: PathBuf::new(),
            scopes: vec!["https://www.googleapis.com/auth/youtube.upload".to_string()],
            upload_url: "https://www.googleapis.com/upload/youtube/v3/videos".to_string(),
            chunk_size: 1024 * 1024,
            category_id: "22".to_string(),
            privacy_status: Visibility::Private,
            made_for_kids: false,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            font_size: 70,
            font_color: "white".to_string(),
            font_file: None,
            fps: 24,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            log_file: PathBuf::from("video_generator.log"),
            keep_failed_output: true,
            description_template: "AI generated video based on: {prompt}".to_string(),
            tags: vec!["AI Generated".to_string(), "Automated Content".to_string()],
            show_progress: true,
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };
        Self::load_from(&config_path)
    }

    /// Load a specific file, writing defaults there if it does not exist yet
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs_err::read_to_string(config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("promptcast").join("config.yaml"))
    }

    /// Validate the settings a pipeline run depends on
    pub fn validate(&self) -> Result<()> {
        if self.openai.api_key.trim().is_empty() {
            anyhow::bail!("OpenAI API key must be configured (openai.api_key or OPENAI_API_KEY)");
        }

        if self.youtube.client_secrets_file.as_os_str().is_empty() {
            anyhow::bail!(
                "YouTube client secrets file must be configured (youtube.client_secrets_file or YOUTUBE_CLIENT_SECRETS)"
            );
        }

        if self.youtube.chunk_size == 0 {
            anyhow::bail!("youtube.chunk_size must be greater than zero");
        }

        if self.video.fps == 0 {
            anyhow::bail!("video.fps must be greater than zero");
        }

        if self.video.font_size == 0 {
            anyhow::bail!("video.font_size must be greater than zero");
        }

        if self.youtube.chunk_size % (256 * 1024) != 0 {
            tracing::warn!(
                "youtube.chunk_size {} is not a multiple of 256 KiB; the platform may reject intermediate chunks",
                self.youtube.chunk_size
            );
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  OpenAI Model: {}", self.openai.model);
        println!("  OpenAI Endpoint: {}", self.openai.base_url);
        println!(
            "  OpenAI Key: {}",
            if self.openai.api_key.is_empty() { "(not set)" } else { "(set)" }
        );
        println!("  Client Secrets: {}", self.youtube.client_secrets_file.display());
        println!("  Privacy Status: {}", self.youtube.privacy_status);
        println!("  Category: {}", self.youtube.category_id);
        println!("  Chunk Size: {}", crate::utils::format_file_size(self.youtube.chunk_size as u64));
        println!(
            "  Caption: {}px {} @ {} fps ({}/{})",
            self.video.font_size,
            self.video.font_color,
            self.video.fps,
            self.video.video_codec,
            self.video.audio_codec
        );
        println!("  Output Dir: {}", self.app.output_dir.display());
        println!("  Log File: {}", self.app.log_file.display());
        println!("  Keep Failed Output: {}", self.app.keep_failed_output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.openai.api_key = "sk-test".to_string();
        config.youtube.client_secrets_file = PathBuf::from("client_secret.json");
        config
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.openai.model, "gpt-3.5-turbo");
        assert_eq!(config.openai.system_prompt, "You are a video script writer.");
        assert_eq!(config.video.font_size, 70);
        assert_eq!(config.video.font_color, "white");
        assert_eq!(config.video.fps, 24);
        assert_eq!(config.video.video_codec, "libx264");
        assert_eq!(config.video.audio_codec, "aac");
        assert_eq!(config.youtube.chunk_size, 1024 * 1024);
        assert_eq!(config.youtube.category_id, "22");
        assert_eq!(config.youtube.privacy_status, Visibility::Private);
        assert!(!config.youtube.made_for_kids);
        assert_eq!(config.app.tags, vec!["AI Generated", "Automated Content"]);
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.video.fps, 24);
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs_err::write(&path, "video:\n  font_size: 48\n  fps: 30\nyoutube:\n  privacy_status: unlisted\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.video.font_size, 48);
        assert_eq!(config.video.fps, 30);
        assert_eq!(config.video.font_color, "white");
        assert_eq!(config.youtube.privacy_status, Visibility::Unlisted);
        assert_eq!(config.youtube.chunk_size, 1024 * 1024);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.openai.api_key = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.youtube.client_secrets_file = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.youtube.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.video.fps = 0;
        assert!(config.validate().is_err());
    }
}
