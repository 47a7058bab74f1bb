use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "promptcast",
    about = "Promptcast - Turn a text prompt into a captioned video and publish it to YouTube",
    version,
    long_about = "Generates a short script from a prompt with a chat-completion API, burns it as a centered caption over a background clip with ffmpeg, and uploads the result to YouTube as a private video."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./config.yaml, then the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// OpenAI API key
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true, value_name = "KEY")]
    pub openai_key: Option<String>,

    /// OAuth client secrets JSON for the YouTube Data API
    #[arg(long, global = true, env = "YOUTUBE_CLIENT_SECRETS", value_name = "FILE")]
    pub client_secrets: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate, render and upload a video
    Run {
        /// Prompt the script is generated from
        #[arg(short, long, value_name = "TEXT")]
        prompt: String,

        /// Background video the caption is burned onto
        #[arg(short, long, value_name = "FILE")]
        background: PathBuf,

        /// Video title (defaults to a timestamped title)
        #[arg(short, long, value_name = "TITLE")]
        title: Option<String>,

        /// Directory the rendered video is written to
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Run the YouTube authorization flow without uploading
    Auth,

    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Check that ffmpeg and ffprobe are available
    Check,
}
