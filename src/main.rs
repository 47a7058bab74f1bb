use anyhow::{Context, Result};
use clap::Parser;
use console::style;

use promptcast::auth::{Authenticator, PlatformAuthenticator};
use promptcast::cli::{Cli, Commands};
use promptcast::config::Config;
use promptcast::pipeline::{PipelineOrchestrator, VideoRequest};
use promptcast::{logging, utils, PipelineError, UploadResult};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).await?;
    apply_overrides(&mut config, &cli);

    logging::init(&config.app.log_file, cli.verbose)?;

    match cli.command {
        Commands::Run {
            prompt,
            background,
            title,
            output_dir,
        } => {
            if let Some(dir) = output_dir {
                config.app.output_dir = dir;
            }

            let mut request = VideoRequest::new(prompt, background);
            if let Some(title) = title {
                request = request.with_title(title);
            }

            match run_pipeline(&config, &request).await {
                Ok(result) => {
                    println!(
                        "{}",
                        style(format!("Video uploaded successfully! Video ID: {}", result.video_id)).green()
                    );
                }
                Err(e) => {
                    eprintln!("{}", style(format!("Error in pipeline: {}", e)).red());
                    std::process::exit(1);
                }
            }
        }
        Commands::Auth => {
            if config.youtube.client_secrets_file.as_os_str().is_empty() {
                anyhow::bail!(
                    "YouTube client secrets file must be configured (youtube.client_secrets_file or YOUTUBE_CLIENT_SECRETS)"
                );
            }

            let authenticator = PlatformAuthenticator::new(
                config.youtube.client_secrets_file.clone(),
                config.youtube.scopes.clone(),
            );
            let session = authenticator
                .authenticate()
                .await
                .context("YouTube authentication failed")?;

            println!("{}", style("Authorization complete").green());
            if let Some(scope) = &session.scope {
                println!("  Scope: {}", scope);
            }
            if let Some(expires_at) = session.expires_at {
                println!("  Expires: {}", expires_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                let path = match cli.config {
                    Some(path) => path,
                    None => Config::config_path()?,
                };
                println!("Configuration file: {}", path.display());
                println!("Edit it to change defaults, or run `promptcast config --show` to review them.");
            }
        }
        Commands::Check => {
            let missing = utils::check_dependencies(&config.video.ffmpeg_path, &config.video.ffprobe_path).await;
            if missing.is_empty() {
                println!("{}", style("All external tools are available").green());
            } else {
                eprintln!("Missing external tools:");
                for dep in missing {
                    eprintln!("   • {}", dep);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Command-line values win over the configuration file
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(key) = &cli.openai_key {
        config.openai.api_key = key.clone();
    }

    if let Some(secrets) = &cli.client_secrets {
        config.youtube.client_secrets_file = secrets.clone();
    }

    if cli.quiet {
        config.app.show_progress = false;
    }
}

async fn run_pipeline(config: &Config, request: &VideoRequest) -> std::result::Result<UploadResult, PipelineError> {
    let missing_deps = utils::check_dependencies(&config.video.ffmpeg_path, &config.video.ffprobe_path).await;
    if !missing_deps.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
    }

    let mut pipeline = PipelineOrchestrator::from_config(config)?;

    tracing::info!("Starting video pipeline for prompt: {}", request.prompt);
    pipeline.run(request).await
}
