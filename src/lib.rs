//! Profile Archiver - download, transcribe and catalog every video of a TikTok profile
//!
//! This library drives a per-video pipeline (download media, extract audio, save
//! metadata, transcribe speech) and reports progress as a stream of events that can
//! be pushed to a remote caller as server-sent events.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod transcribe;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use extractors::{ItemDescriptor, MediaFetcher, ProfileLister};
pub use pipeline::{EventKind, Orchestrator, PipelineEvent};
pub use transcribe::Transcriber;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the archiver
#[derive(thiserror::Error, Debug)]
pub enum ArchiverError {
    #[error("{0}")]
    InvalidUrl(String),

    #[error("Failed to fetch video list: {0}")]
    Enumeration(String),

    #[error("{stage} failed: {message}")]
    Stage { stage: &'static str, message: String },

    #[error("Event consumer disconnected")]
    StreamClosed,
}
