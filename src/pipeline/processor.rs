use anyhow::Context;
use serde_json::json;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::layout;
use super::{EventKind, EventSink, PipelineEvent};
use crate::extractors::{ItemDescriptor, MediaFetcher};
use crate::transcribe::Transcriber;
use crate::{ArchiverError, Result};

/// One step of per-video processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    ExtractAudio,
    Metadata,
    Transcribe,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::ExtractAudio => "extract_audio",
            Stage::Metadata => "metadata",
            Stage::Transcribe => "transcribe",
        }
    }

    /// Label used in user-facing messages
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Fetch => "Download",
            Stage::ExtractAudio => "Audio extraction",
            Stage::Metadata => "Metadata save",
            Stage::Transcribe => "Transcription",
        }
    }
}

/// Transcription settings applied to every item
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub transcribe: bool,
    pub model: String,
    pub language: String,
}

/// Position and naming of the item being processed
#[derive(Debug, Clone)]
pub struct ItemContext {
    pub index: usize,
    pub total: usize,
    pub item_id: String,
    pub title: String,
}

impl ItemContext {
    /// Event scoped to this item, prefixed with `[index/total]`
    pub fn event(&self, kind: EventKind, message: impl AsRef<str>) -> PipelineEvent {
        PipelineEvent::new(
            kind,
            format!("[{}/{}] {}", self.index, self.total, message.as_ref()),
        )
        .with_position(self.index, self.total)
        .with_item(&self.item_id)
    }
}

/// What happened to one item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemOutcome {
    pub media_path: Option<PathBuf>,
    pub failed_stages: Vec<Stage>,
}

impl ItemOutcome {
    pub fn succeeded(&self) -> bool {
        self.media_path.is_some() && self.failed_stages.is_empty()
    }
}

/// Runs the fixed stage sequence for a single video
pub struct ItemProcessor {
    fetcher: Arc<dyn MediaFetcher>,
    transcriber: Arc<dyn Transcriber>,
    settings: ProcessorSettings,
}

impl ItemProcessor {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        transcriber: Arc<dyn Transcriber>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            fetcher,
            transcriber,
            settings,
        }
    }

    /// Process one item into `item_dir`, reporting through `sink`.
    ///
    /// Stage failures become `error` events; the only error returned is
    /// [`ArchiverError::StreamClosed`].
    pub async fn process(
        &self,
        item: &ItemDescriptor,
        ctx: &ItemContext,
        item_dir: &Path,
        sink: &EventSink,
    ) -> std::result::Result<ItemOutcome, ArchiverError> {
        let mut outcome = ItemOutcome::default();

        // Everything after this depends on the media file
        let media_path = match self
            .run_stage(Stage::Fetch, ctx, sink, self.fetcher.fetch_media(item, item_dir))
            .await?
        {
            Some(path) => path,
            None => {
                outcome.failed_stages.push(Stage::Fetch);
                return Ok(outcome);
            }
        };

        let audio_path = layout::audio_path(item_dir);
        if self
            .run_stage(
                Stage::ExtractAudio,
                ctx,
                sink,
                self.fetcher.extract_audio(&media_path, &audio_path),
            )
            .await?
            .is_none()
        {
            outcome.failed_stages.push(Stage::ExtractAudio);
        }

        if self
            .run_stage(Stage::Metadata, ctx, sink, async {
                save_metadata(item, item_dir)
            })
            .await?
            .is_none()
        {
            outcome.failed_stages.push(Stage::Metadata);
        }

        if self.settings.transcribe && audio_path.is_file() {
            sink.emit(ctx.event(
                EventKind::Progress,
                format!("Transcribing: {}", ctx.title),
            ))
            .await?;

            let transcribed = self
                .run_stage(
                    Stage::Transcribe,
                    ctx,
                    sink,
                    self.transcribe(&audio_path, item_dir),
                )
                .await?;
            if transcribed.is_none() {
                outcome.failed_stages.push(Stage::Transcribe);
            }
        }

        outcome.media_path = Some(media_path);

        sink.emit(
            ctx.event(EventKind::Progress, format!("Complete: {}", ctx.title))
                .with_extra("stage", json!("complete"))
                .with_extra("success", json!(outcome.succeeded())),
        )
        .await?;

        Ok(outcome)
    }

    async fn transcribe(&self, audio_path: &Path, item_dir: &Path) -> Result<()> {
        let text = self
            .transcriber
            .transcribe(audio_path, &self.settings.model, &self.settings.language)
            .await?;

        fs_err::write(layout::transcript_path(item_dir), text.trim())
            .context("Failed to write transcript")?;
        Ok(())
    }

    /// Await one stage; on failure log it, emit an `error` event and yield `None`
    async fn run_stage<T>(
        &self,
        stage: Stage,
        ctx: &ItemContext,
        sink: &EventSink,
        work: impl Future<Output = Result<T>>,
    ) -> std::result::Result<Option<T>, ArchiverError> {
        match work.await {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(
                    item_id = %ctx.item_id,
                    stage = stage.as_str(),
                    "Stage failed: {:#}",
                    e
                );

                let failure = ArchiverError::Stage {
                    stage: stage.label(),
                    message: format!("{:#}", e),
                };
                sink.emit(
                    ctx.event(EventKind::Error, failure.to_string())
                        .with_extra("stage", json!(stage.as_str())),
                )
                .await?;

                Ok(None)
            }
        }
    }
}

/// Write `metadata.json` and `caption.txt` for an item
pub fn save_metadata(item: &ItemDescriptor, item_dir: &Path) -> Result<()> {
    let metadata = serde_json::to_string_pretty(&item.metadata_document())
        .context("Failed to serialize metadata")?;
    fs_err::write(layout::metadata_path(item_dir), metadata)?;
    fs_err::write(layout::caption_path(item_dir), item.caption())?;
    Ok(())
}
