use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{EncodePlan, MediaEngine, MediaInfo};

/// Media engine driving the ffmpeg and ffprobe binaries
pub struct FfmpegEngine {
    ffmpeg_path: String,
    ffprobe_path: String,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// ffmpeg arguments for an encode plan
    pub fn encode_args(plan: &EncodePlan, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            plan.background.to_string_lossy().to_string(),
            "-vf".to_string(),
            plan.caption.drawtext_filter(&plan.caption_file),
            "-t".to_string(),
            format!("{:.3}", plan.caption.duration),
            "-r".to_string(),
            plan.fps.to_string(),
            "-c:v".to_string(),
            plan.video_codec.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ];

        if plan.has_audio {
            args.push("-c:a".to_string());
            args.push(plan.audio_codec.clone());
        } else {
            args.push("-an".to_string());
        }

        args.extend([
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }
}

/// Interpret ffprobe's JSON for the first video stream
pub fn parse_probe_output(json: &[u8]) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .context("Failed to parse ffprobe output")?;

    let video = probe
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow::anyhow!("File does not contain a video stream"))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => anyhow::bail!("Video stream has no frame size"),
    };

    let duration = probe
        .format
        .as_ref()
        .and_then(|format| format.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| *d > 0.0)
        .ok_or_else(|| anyhow::anyhow!("Could not determine clip duration"))?;

    let has_audio = probe
        .streams
        .iter()
        .any(|stream| stream.codec_type.as_deref() == Some("audio"));

    Ok(MediaInfo { duration, width, height, has_audio })
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        tracing::debug!("Probing background clip: {}", path.display());

        let path_arg = path.to_string_lossy().to_string();
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v", "quiet",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
                path_arg.as_str(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffprobe_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to analyze file with ffprobe: {}", error.trim());
        }

        parse_probe_output(&output.stdout)
    }

    async fn encode(&self, plan: &EncodePlan, output: &Path) -> Result<()> {
        let args = Self::encode_args(plan, output);
        tracing::debug!("Running {} {}", self.ffmpeg_path, args.join(" "));

        let result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffmpeg_path))?;

        if !result.status.success() {
            let error = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!("ffmpeg exited with {}: {}", result.status, error.trim());
        }

        Ok(())
    }
}
