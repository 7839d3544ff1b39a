use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

pub mod layout;
pub mod processor;

use crate::config::Config;
use crate::extractors::{ItemDescriptor, MediaFetcher, ProfileLister, YtDlpExtractor};
use crate::transcribe::{Transcriber, WhisperCppTranscriber};
use crate::utils::{extract_profile_name, sanitize_filename, truncate_title};
use crate::ArchiverError;

pub use layout::OutputLayout;
pub use processor::{ItemContext, ItemOutcome, ItemProcessor, ProcessorSettings, Stage};

/// Longest title shown in progress messages
const MAX_TITLE_CHARS: usize = 80;

/// Kind of a pipeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Progress,
    Error,
    Complete,
}

/// One unit of observable progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,

    pub message: String,

    /// 1-based position in the batch, 0 when not item-scoped
    pub current: usize,

    /// Batch size, 0 when unknown
    pub total: usize,

    #[serde(rename = "video_id")]
    pub item_id: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl PipelineEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            current: 0,
            total: 0,
            item_id: String::new(),
            extra: Map::new(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventKind::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, message)
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self::new(EventKind::Complete, message)
    }

    pub fn with_position(mut self, current: usize, total: usize) -> Self {
        self.current = current;
        self.total = total;
        self
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = item_id.into();
        self
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Producer side of an event stream
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }

    /// Hand one event to the consumer, waiting until it has room for it
    pub async fn emit(&self, event: PipelineEvent) -> Result<(), ArchiverError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ArchiverError::StreamClosed)
    }

    /// Resolves once the consumer has gone away
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Drive `work` unless the consumer disconnects first
    pub async fn until_closed<T>(
        &self,
        work: impl Future<Output = T>,
    ) -> Result<T, ArchiverError> {
        tokio::select! {
            biased;
            _ = self.closed() => Err(ArchiverError::StreamClosed),
            value = work => Ok(value),
        }
    }
}

/// Totals for one finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }
}

/// Per-run bookkeeping, owned by the orchestrator loop
#[derive(Debug, Default)]
struct RunState {
    total: usize,
    success_count: usize,
    used_ids: HashSet<String>,
}

impl RunState {
    /// Filesystem-safe id for an item, unique within this run
    fn assign_id(&mut self, item: &ItemDescriptor, index: usize) -> String {
        let raw = item
            .id
            .clone()
            .unwrap_or_else(|| format!("unknown_{}", index));

        let mut id = sanitize_filename(&raw);
        while self.used_ids.contains(&id) {
            id = format!("{}_{}", id, index);
        }
        self.used_ids.insert(id.clone());
        id
    }
}

/// Drives a whole profile: list, lay out, process each video, summarize
#[derive(Clone)]
pub struct Orchestrator {
    lister: Arc<dyn ProfileLister>,
    processor: Arc<ItemProcessor>,
    download_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        lister: Arc<dyn ProfileLister>,
        fetcher: Arc<dyn MediaFetcher>,
        transcriber: Arc<dyn Transcriber>,
        settings: ProcessorSettings,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lister,
            processor: Arc::new(ItemProcessor::new(fetcher, transcriber, settings)),
            download_dir: download_dir.into(),
        }
    }

    /// Wire up yt-dlp, ffmpeg and whisper.cpp from configuration
    pub fn from_config(config: &Config) -> Self {
        let extractor = Arc::new(YtDlpExtractor::new(
            &config.tools.yt_dlp,
            &config.tools.ffmpeg,
        ));
        let transcriber = Arc::new(WhisperCppTranscriber::from_config(config));
        let settings = ProcessorSettings {
            transcribe: config.transcription.enabled,
            model: config.transcription.model.clone(),
            language: config.transcription.language.clone(),
        };

        Self::new(
            extractor.clone(),
            extractor,
            transcriber,
            settings,
            &config.storage.download_dir,
        )
    }

    /// Start a run in the background and return its event stream.
    ///
    /// The producer is never more than one event ahead of the consumer; dropping
    /// the stream stops the run at the next event or item boundary.
    pub fn run(&self, profile_url: &str) -> ReceiverStream<PipelineEvent> {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        let orchestrator = self.clone();
        let profile_url = profile_url.trim().to_string();
        let span = tracing::info_span!(
            "pipeline",
            run_id = %Uuid::new_v4(),
            profile = %extract_profile_name(&profile_url)
        );

        tokio::spawn(
            async move {
                match orchestrator.drive(&profile_url, &sink).await {
                    Ok(summary) => tracing::info!(
                        "Run finished: {}/{} succeeded",
                        summary.succeeded,
                        summary.total
                    ),
                    Err(ArchiverError::StreamClosed) => {
                        tracing::info!("Consumer disconnected, run abandoned")
                    }
                    Err(e) => tracing::debug!("Run ended early: {}", e),
                }
            }
            .instrument(span),
        );

        ReceiverStream::new(rx)
    }

    /// Run the pipeline to completion, emitting every event through `sink`
    pub async fn drive(
        &self,
        profile_url: &str,
        sink: &EventSink,
    ) -> Result<RunSummary, ArchiverError> {
        let profile = extract_profile_name(profile_url);
        sink.emit(PipelineEvent::info(format!(
            "Fetching video list for @{}...",
            profile
        )))
        .await?;

        let items = match sink.until_closed(self.lister.list_items(profile_url)).await? {
            Ok(items) => items,
            Err(e) => {
                tracing::error!("Failed to enumerate videos: {:#}", e);
                let failure = ArchiverError::Enumeration(format!("{:#}", e));
                sink.emit(PipelineEvent::error(failure.to_string())).await?;
                return Err(failure);
            }
        };

        let mut state = RunState {
            total: items.len(),
            ..RunState::default()
        };
        let total = state.total;

        if total == 0 {
            sink.emit(PipelineEvent::complete("No videos found for this profile."))
                .await?;
            return Ok(RunSummary::default());
        }

        sink.emit(
            PipelineEvent::info(format!("Found {} video(s). Starting downloads...", total))
                .with_position(0, total),
        )
        .await?;

        let layout = OutputLayout::new(&self.download_dir, &profile);

        for (offset, item) in items.iter().enumerate() {
            let index = offset + 1;
            let ctx = ItemContext {
                index,
                total,
                item_id: state.assign_id(item, index),
                title: truncate_title(
                    item.title.as_deref().unwrap_or("Untitled"),
                    MAX_TITLE_CHARS,
                ),
            };

            sink.emit(ctx.event(EventKind::Progress, format!("Downloading: {}", ctx.title)))
                .await?;

            let item_dir = match layout.create_item_dir(&ctx.item_id) {
                Ok(dir) => dir,
                Err(e) => {
                    tracing::warn!(item_id = %ctx.item_id, "Cannot create item directory: {}", e);
                    sink.emit(
                        ctx.event(
                            EventKind::Error,
                            format!("Could not create output directory: {}", e),
                        )
                        .with_extra("stage", json!(Stage::Fetch.as_str())),
                    )
                    .await?;
                    continue;
                }
            };

            let outcome = sink
                .until_closed(self.processor.process(item, &ctx, &item_dir, sink))
                .await??;
            if outcome.succeeded() {
                state.success_count += 1;
            }
        }

        let summary = RunSummary {
            total,
            succeeded: state.success_count,
        };

        sink.emit(
            PipelineEvent::complete(format!(
                "Done! {}/{} videos processed successfully.",
                summary.succeeded, summary.total
            ))
            .with_position(total, total)
            .with_extra("succeeded", json!(summary.succeeded))
            .with_extra("failed", json!(summary.failed()))
            .with_extra("finished_at", json!(chrono::Utc::now().to_rfc3339())),
        )
        .await?;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::{MockMediaFetcher, MockProfileLister};
    use crate::transcribe::MockTranscriber;
    use futures_util::StreamExt;

    fn descriptor(id: &str, title: &str) -> ItemDescriptor {
        ItemDescriptor::from_json(json!({
            "id": id,
            "title": title,
            "webpage_url": format!("https://www.tiktok.com/@someone/video/{}", id),
        }))
    }

    fn lister_returning(items: Vec<ItemDescriptor>) -> MockProfileLister {
        let mut lister = MockProfileLister::new();
        lister
            .expect_list_items()
            .times(1)
            .returning(move |_| Ok(items.clone()));
        lister
    }

    /// Fetcher whose downloads fail for the listed ids
    fn fetcher_failing_for(failing: &'static [&'static str]) -> MockMediaFetcher {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch_media().returning(move |item, dir| {
            if failing.contains(&item.id.as_deref().unwrap_or_default()) {
                anyhow::bail!("video unavailable");
            }
            let path = dir.join("video.mp4");
            fs_err::write(&path, b"video")?;
            Ok(path)
        });
        fetcher.expect_extract_audio().returning(|_, audio| {
            fs_err::write(audio, b"audio")?;
            Ok(())
        });
        fetcher
    }

    fn orchestrator(
        lister: MockProfileLister,
        fetcher: MockMediaFetcher,
        root: &std::path::Path,
    ) -> Orchestrator {
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().never();
        Orchestrator::new(
            Arc::new(lister),
            Arc::new(fetcher),
            Arc::new(transcriber),
            ProcessorSettings {
                transcribe: false,
                model: "base".to_string(),
                language: "en".to_string(),
            },
            root,
        )
    }

    const URL: &str = "https://www.tiktok.com/@someone";

    #[tokio::test]
    async fn test_one_fetch_failure_is_isolated() {
        let root = tempfile::tempdir().unwrap();
        let lister = lister_returning(vec![descriptor("a", "T1"), descriptor("b", "T2")]);
        let events: Vec<_> = orchestrator(lister, fetcher_failing_for(&["b"]), root.path())
            .run(URL)
            .collect()
            .await;

        let summary: Vec<_> = events
            .iter()
            .map(|e| (e.kind, e.item_id.as_str(), e.current, e.total))
            .collect();
        assert_eq!(
            summary,
            vec![
                (EventKind::Info, "", 0, 0),
                (EventKind::Info, "", 0, 2),
                (EventKind::Progress, "a", 1, 2),
                (EventKind::Progress, "a", 1, 2),
                (EventKind::Progress, "b", 2, 2),
                (EventKind::Error, "b", 2, 2),
                (EventKind::Complete, "", 2, 2),
            ]
        );
        assert_eq!(events[0].message, "Fetching video list for @someone...");
        assert_eq!(events[2].message, "[1/2] Downloading: T1");
        assert_eq!(events[3].message, "[1/2] Complete: T1");
        assert_eq!(events[5].message, "[2/2] Download failed: video unavailable");
        assert_eq!(events[6].message, "Done! 1/2 videos processed successfully.");
        assert_eq!(events[6].extra["succeeded"], json!(1));
        assert_eq!(events[6].extra["failed"], json!(1));

        let videos = root.path().join("tiktok/someone/videos");
        assert!(videos.join("a/video.mp4").is_file());
        assert!(videos.join("a/metadata.json").is_file());
        assert!(videos.join("a/caption.txt").is_file());
        assert!(videos.join("b").is_dir());
        assert!(!videos.join("b/metadata.json").exists());
    }

    #[tokio::test]
    async fn test_all_items_succeed() {
        let root = tempfile::tempdir().unwrap();
        let items = (1..=4)
            .map(|i| descriptor(&i.to_string(), &format!("Video {}", i)))
            .collect();
        let orchestrator =
            orchestrator(lister_returning(items), fetcher_failing_for(&[]), root.path());
        let events: Vec<_> = orchestrator.run(URL).collect().await;

        assert_eq!(events.iter().filter(|e| e.kind == EventKind::Info).count(), 2);
        assert_eq!(events.iter().filter(|e| e.kind == EventKind::Error).count(), 0);
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Complete);
        assert_eq!((last.current, last.total), (4, 4));
        assert_eq!(last.message, "Done! 4/4 videos processed successfully.");
        assert_eq!(
            events.iter().filter(|e| e.kind == EventKind::Complete).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_empty_profile() {
        let root = tempfile::tempdir().unwrap();
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch_media().never();
        let events: Vec<_> = orchestrator(lister_returning(Vec::new()), fetcher, root.path())
            .run(URL)
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Info);
        assert_eq!(events[1].kind, EventKind::Complete);
        assert_eq!(events[1].message, "No videos found for this profile.");
        assert_eq!((events[1].current, events[1].total), (0, 0));
        assert!(!root.path().join("tiktok").exists());
    }

    #[tokio::test]
    async fn test_enumeration_failure_ends_stream_without_complete() {
        let root = tempfile::tempdir().unwrap();
        let mut lister = MockProfileLister::new();
        lister
            .expect_list_items()
            .returning(|_| Err(anyhow::anyhow!("profile is private")));
        let events: Vec<_> = orchestrator(lister, MockMediaFetcher::new(), root.path())
            .run(URL)
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::Error);
        assert_eq!(
            events[1].message,
            "Failed to fetch video list: profile is private"
        );
    }

    #[tokio::test]
    async fn test_missing_and_duplicate_ids_get_distinct_directories() {
        let root = tempfile::tempdir().unwrap();
        let items = vec![
            ItemDescriptor::from_json(json!({"title": "no id", "url": "https://x/1"})),
            ItemDescriptor::from_json(json!({"id": "unknown_1", "url": "https://x/2"})),
            ItemDescriptor::from_json(json!({"id": "../evil", "url": "https://x/3"})),
        ];
        let orchestrator =
            orchestrator(lister_returning(items), fetcher_failing_for(&[]), root.path());
        let events: Vec<_> = orchestrator.run(URL).collect().await;

        let ids: Vec<_> = events
            .iter()
            .filter(|e| e.message.contains("Downloading"))
            .map(|e| e.item_id.clone())
            .collect();
        assert_eq!(ids[0], "unknown_1");
        assert_eq!(ids[1], "unknown_1_2");
        assert!(!ids[2].contains('/') && !ids[2].contains(".."));

        let videos = root.path().join("tiktok/someone/videos");
        for id in &ids {
            assert!(videos.join(id).join("video.mp4").is_file());
        }
    }

    #[tokio::test]
    async fn test_dropping_the_stream_stops_the_run() {
        let root = tempfile::tempdir().unwrap();
        let items = (1..=50)
            .map(|i| descriptor(&i.to_string(), "clip"))
            .collect();
        let orchestrator =
            orchestrator(lister_returning(items), fetcher_failing_for(&[]), root.path());

        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        let mut stream = ReceiverStream::new(rx);
        let driver = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.drive(URL, &sink).await }
        });

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_some());
        drop(stream);

        let result = driver.await.unwrap();
        assert!(matches!(result, Err(ArchiverError::StreamClosed)));
        let created = fs_err::read_dir(root.path().join("tiktok/someone/videos"))
            .map(|dirs| dirs.count())
            .unwrap_or(0);
        assert!(created < 50);
    }

    #[test]
    fn test_event_serializes_with_wire_names() {
        let event = PipelineEvent::info("hi").with_position(1, 2).with_item("x");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "info", "message": "hi", "current": 1, "total": 2, "video_id": "x"})
        );

        let with_extra = event.with_extra("stage", json!("fetch"));
        let value = serde_json::to_value(&with_extra).unwrap();
        assert_eq!(value["extra"], json!({"stage": "fetch"}));
    }
}
