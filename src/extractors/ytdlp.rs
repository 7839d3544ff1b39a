use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{ItemDescriptor, MediaFetcher, ProfileLister};
use crate::Result;

/// Profile lister and media fetcher backed by yt-dlp and ffmpeg
pub struct YtDlpExtractor {
    yt_dlp_path: String,
    ffmpeg_path: String,
}

impl YtDlpExtractor {
    pub fn new(yt_dlp_path: impl Into<String>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Run yt-dlp and return its stdout, failing with its stderr on a non-zero exit
    async fn run_yt_dlp(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.yt_dlp_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.yt_dlp_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp failed: {}", error.trim());
        }

        Ok(output.stdout)
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new("yt-dlp", "ffmpeg")
    }
}

/// Turn a `--dump-single-json` document into item descriptors.
///
/// Profile pages come back as a playlist with `entries`; anything else is treated
/// as a single video. Null entries are dropped.
pub(crate) fn parse_listing(info: Value) -> Vec<ItemDescriptor> {
    if info.is_null() {
        return Vec::new();
    }

    match info.get("entries") {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter(|entry| !entry.is_null())
            .cloned()
            .map(ItemDescriptor::from_json)
            .collect(),
        Some(Value::Null) | None => vec![ItemDescriptor::from_json(info)],
        Some(_) => Vec::new(),
    }
}

/// Locate the downloaded media file, preferring `video.mp4`
pub(crate) fn find_video_file(output_dir: &Path) -> Result<PathBuf> {
    let preferred = output_dir.join("video.mp4");
    if preferred.is_file() {
        return Ok(preferred);
    }

    let mut candidates: Vec<PathBuf> = fs_err::read_dir(output_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            path.is_file() && name.starts_with("video.") && !name.ends_with(".part")
        })
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Video file not found in {}", output_dir.display()))
}

#[async_trait]
impl ProfileLister for YtDlpExtractor {
    async fn list_items(&self, profile_url: &str) -> Result<Vec<ItemDescriptor>> {
        tracing::debug!("Listing videos for: {}", profile_url);

        let stdout = self
            .run_yt_dlp(&["--dump-single-json", "--quiet", "--no-warnings", profile_url])
            .await?;

        let info: Value =
            serde_json::from_slice(&stdout).context("yt-dlp returned invalid JSON")?;
        let items = parse_listing(info);

        tracing::debug!("yt-dlp listed {} item(s)", items.len());
        Ok(items)
    }
}

#[async_trait]
impl MediaFetcher for YtDlpExtractor {
    async fn fetch_media(&self, item: &ItemDescriptor, output_dir: &Path) -> Result<PathBuf> {
        let source = item
            .source_url()
            .ok_or_else(|| anyhow::anyhow!("Video has no download URL"))?;
        let template = output_dir.join("video.%(ext)s");
        let template = template.to_string_lossy().into_owned();

        tracing::debug!("Downloading {} into {}", source, output_dir.display());

        self.run_yt_dlp(&[
            "--quiet",
            "--no-warnings",
            "--no-playlist",
            "--output",
            template.as_str(),
            "--format",
            "best[ext=mp4]/best",
            "--merge-output-format",
            "mp4",
            source,
        ])
        .await?;

        find_video_file(output_dir)
    }

    async fn extract_audio(&self, media_path: &Path, audio_path: &Path) -> Result<()> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(media_path)
            .args(["-vn", "-acodec", "libmp3lame", "-q:a", "2", "-y"])
            .arg(audio_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffmpeg_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            let last_line = error.lines().last().unwrap_or("unknown error");
            anyhow::bail!("ffmpeg exited with {}: {}", output.status, last_line);
        }

        Ok(())
    }
}
