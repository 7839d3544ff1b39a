use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub mod ytdlp;

use crate::Result;

pub use ytdlp::YtDlpExtractor;

/// Fields copied into `metadata.json`
pub const METADATA_FIELDS: &[&str] = &[
    "id",
    "title",
    "description",
    "uploader",
    "uploader_id",
    "upload_date",
    "duration",
    "view_count",
    "like_count",
    "comment_count",
    "webpage_url",
];

/// One video as reported by the lister
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemDescriptor {
    /// Platform id of the video, if the lister reported one
    pub id: Option<String>,

    /// Title of the video
    pub title: Option<String>,

    /// Raw metadata as returned by the platform
    pub fields: Map<String, Value>,
}

impl ItemDescriptor {
    /// Build a descriptor from one JSON entry of a profile listing
    pub fn from_json(value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let id = match fields.get("id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let title = fields
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);

        Self { id, title, fields }
    }

    /// Look up a raw metadata field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    fn field_str(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Locator the fetcher should download from
    pub fn source_url(&self) -> Option<&str> {
        self.field_str("webpage_url").or_else(|| self.field_str("url"))
    }

    /// Caption text: description, falling back to title, falling back to empty
    pub fn caption(&self) -> &str {
        self.field_str("description")
            .or_else(|| self.title.as_deref().filter(|t| !t.is_empty()))
            .unwrap_or_default()
    }

    /// The flat metadata document persisted next to each video
    pub fn metadata_document(&self) -> Value {
        let document: Map<String, Value> = METADATA_FIELDS
            .iter()
            .map(|key| {
                let value = match *key {
                    "id" => self.id.clone().map(Value::String).unwrap_or(Value::Null),
                    _ => self.field(key).cloned().unwrap_or(Value::Null),
                };
                (key.to_string(), value)
            })
            .collect();
        Value::Object(document)
    }
}

/// Enumerates the videos of a profile
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileLister: Send + Sync {
    /// List every video of the profile, in platform order
    async fn list_items(&self, profile_url: &str) -> Result<Vec<ItemDescriptor>>;
}

/// Materializes media files for a single video
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download the video into `output_dir` and return the path of the media file
    async fn fetch_media(&self, item: &ItemDescriptor, output_dir: &Path) -> Result<PathBuf>;

    /// Derive an mp3 audio track from a downloaded media file
    async fn extract_audio(&self, media_path: &Path, audio_path: &Path) -> Result<()>;
}
