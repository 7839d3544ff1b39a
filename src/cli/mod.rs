use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "profile-archiver",
    about = "Profile Archiver - Download, transcribe and catalog every video of a TikTok profile",
    version,
    long_about = "Downloads every video of a TikTok profile with yt-dlp, extracts mp3 audio with ffmpeg, saves metadata and captions, and transcribes speech with whisper.cpp. Run it as an HTTP service with live progress, or drive a single profile from the terminal."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Override the download root directory
    #[arg(long, global = true, value_name = "DIR", env = "DOWNLOAD_DIR")]
    pub download_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP service
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Archive one profile from the terminal
    Run {
        /// Profile URL, e.g. https://www.tiktok.com/@username
        #[arg(value_name = "URL")]
        url: String,

        /// Skip the transcription stage
        #[arg(long)]
        no_transcribe: bool,
    },

    /// List archived profiles and their files
    List,

    /// Show or save configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the effective configuration to the user config file
        #[arg(long)]
        save: bool,
    },

    /// Check that yt-dlp, ffmpeg and whisper.cpp are installed
    Check,
}
