use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;

use crate::config::Config;
use crate::Result;

pub mod models;

pub use models::{LoadedModel, ModelCache};

/// Speech-to-text engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file and return the recognized text
    async fn transcribe(&self, audio_path: &Path, model: &str, language: &str) -> Result<String>;
}

/// Transcriber that shells out to whisper.cpp
pub struct WhisperCppTranscriber {
    whisper_path: String,
    ffmpeg_path: String,
    models_dir: PathBuf,
    cache: Arc<ModelCache>,
}

impl WhisperCppTranscriber {
    pub fn new(
        whisper_path: impl Into<String>,
        ffmpeg_path: impl Into<String>,
        models_dir: impl Into<PathBuf>,
        cache: Arc<ModelCache>,
    ) -> Self {
        Self {
            whisper_path: whisper_path.into(),
            ffmpeg_path: ffmpeg_path.into(),
            models_dir: models_dir.into(),
            cache,
        }
    }

    /// Build a transcriber from configuration, sharing the process-wide model cache
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.transcription.binary,
            &config.tools.ffmpeg,
            &config.transcription.models_dir,
            ModelCache::shared(),
        )
    }

    /// whisper.cpp wants 16 kHz mono PCM
    async fn convert_to_wav(&self, audio_path: &Path, wav_path: &Path) -> Result<()> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(audio_path)
            .args(["-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le", "-y"])
            .arg(wav_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffmpeg_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Audio conversion failed: {}",
                error.lines().last().unwrap_or("unknown error")
            );
        }

        Ok(())
    }
}

/// Join whisper.cpp's per-segment lines into a single transcript
pub(crate) fn collect_transcript(stdout: &str) -> String {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Transcriber for WhisperCppTranscriber {
    async fn transcribe(&self, audio_path: &Path, model: &str, language: &str) -> Result<String> {
        let model = self.cache.get_or_load(&self.models_dir, model)?;

        // One whisper run per model at a time
        let _guard = model.lock.lock().await;

        let temp_dir = TempDir::new().context("Failed to create temporary directory")?;
        let wav_path = temp_dir.path().join("audio.wav");
        self.convert_to_wav(audio_path, &wav_path).await?;

        tracing::debug!(
            "Running whisper model '{}' on {}",
            model.id,
            audio_path.display()
        );

        let output = Command::new(&self.whisper_path)
            .arg("-m")
            .arg(&model.path)
            .arg("-f")
            .arg(&wav_path)
            .args(["-l", language, "-nt", "-np"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.whisper_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("whisper failed: {}", error.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(collect_transcript(&stdout))
    }
}
