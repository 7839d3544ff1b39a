use anyhow::Result;
use clap::Parser;
use console::style;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use profile_archiver::cli::{Cli, Commands};
use profile_archiver::config::Config;
use profile_archiver::pipeline::{EventKind, Orchestrator};
use profile_archiver::{catalog, output, server, utils, ArchiverError};

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("profile_archiver={},tower_http=info", level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn warn_missing_dependencies(config: &Config) {
    let missing = utils::check_dependencies(
        &config.tools.yt_dlp,
        &config.tools.ffmpeg,
        &config.transcription.binary,
    )
    .await;

    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().await?;
    if let Some(dir) = cli.download_dir.clone() {
        config.storage.download_dir = dir;
    }

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    init_tracing(level, cli.json_logs);

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            warn_missing_dependencies(&config).await;
            server::serve(&config).await?;
        }
        Commands::Run { url, no_transcribe } => {
            if let Some(message) = utils::validate_profile_url(&url) {
                return Err(ArchiverError::InvalidUrl(message).into());
            }
            if no_transcribe {
                config.transcription.enabled = false;
            }

            warn_missing_dependencies(&config).await;

            let orchestrator = Orchestrator::from_config(&config);
            let mut events = orchestrator.run(&url);

            let progress = ProgressBar::new(0);
            progress.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}",
                    )?
                    .progress_chars("=>-"),
            );

            let mut last_kind = None;
            while let Some(event) = events.next().await {
                if event.total > 0 {
                    progress.set_length(event.total as u64);
                    progress.set_position(event.current as u64);
                }
                progress.println(output::format_event(&event));
                last_kind = Some(event.kind);
            }
            progress.finish_and_clear();

            if last_kind != Some(EventKind::Complete) {
                anyhow::bail!("Pipeline stopped before completing");
            }
            println!(
                "Results saved under: {}",
                config.storage.download_dir.display()
            );
        }
        Commands::List => {
            let profiles = catalog::scan(&config.storage.download_dir)?;
            if profiles.is_empty() {
                println!(
                    "No downloads found in {}",
                    config.storage.download_dir.display()
                );
            }

            for profile in profiles {
                println!("{}", style(format!("@{}", profile.name)).bold());
                for video in profile.videos {
                    println!("  {}", video.id);
                    for file in video.files {
                        println!(
                            "    {:<16} {:>10}  {}",
                            file.name,
                            utils::format_file_size(file.size),
                            style(file.path).dim()
                        );
                    }
                }
            }
        }
        Commands::Config { show, save } => {
            if save {
                let path = config.save().await?;
                println!("Configuration saved to: {}", path.display());
            }
            if show || !save {
                config.display();
            }
        }
        Commands::Check => {
            let missing = utils::check_dependencies(
                &config.tools.yt_dlp,
                &config.tools.ffmpeg,
                &config.transcription.binary,
            )
            .await;

            if missing.is_empty() {
                println!("{} All external tools found", style("✓").green());
            } else {
                for dep in &missing {
                    println!("{} {}", style("✗").red(), dep);
                }
                anyhow::bail!("{} required tool(s) missing", missing.len());
            }
        }
    }

    Ok(())
}
