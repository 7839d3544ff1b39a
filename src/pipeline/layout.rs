use std::path::{Path, PathBuf};

use crate::utils::sanitize_filename;

/// Top-level directory for this platform under the download root
pub const PLATFORM_DIR: &str = "tiktok";
/// Directory under each profile holding one directory per video
pub const VIDEOS_DIR: &str = "videos";

pub const AUDIO_FILE: &str = "audio.mp3";
pub const METADATA_FILE: &str = "metadata.json";
pub const CAPTION_FILE: &str = "caption.txt";
pub const TRANSCRIPT_FILE: &str = "transcript.txt";

/// Addresses `<root>/tiktok/<profile>/videos/<item>/`.
///
/// Every component is sanitized, so hostile profile or video names can never
/// point outside the root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    profile: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, profile: &str) -> Self {
        Self {
            root: root.into(),
            profile: sanitize_filename(profile),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.root.join(PLATFORM_DIR).join(&self.profile)
    }

    pub fn item_dir(&self, item_id: &str) -> PathBuf {
        self.profile_dir()
            .join(VIDEOS_DIR)
            .join(sanitize_filename(item_id))
    }

    /// Create the item directory (and any missing parents)
    pub fn create_item_dir(&self, item_id: &str) -> std::io::Result<PathBuf> {
        let dir = self.item_dir(item_id);
        fs_err::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Artifact paths inside one item directory
pub fn audio_path(item_dir: &Path) -> PathBuf {
    item_dir.join(AUDIO_FILE)
}

pub fn metadata_path(item_dir: &Path) -> PathBuf {
    item_dir.join(METADATA_FILE)
}

pub fn caption_path(item_dir: &Path) -> PathBuf {
    item_dir.join(CAPTION_FILE)
}

pub fn transcript_path(item_dir: &Path) -> PathBuf {
    item_dir.join(TRANSCRIPT_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Component;

    #[test]
    fn test_item_dir_shape() {
        let layout = OutputLayout::new("/data", "someone");
        assert_eq!(
            layout.item_dir("123"),
            PathBuf::from("/data/tiktok/someone/videos/123")
        );
    }

    #[test]
    fn test_hostile_names_stay_under_root() {
        let layout = OutputLayout::new("/data", "../../etc");
        let dir = layout.item_dir("../../../root/.ssh");

        assert!(dir.starts_with("/data/tiktok"));
        assert!(!dir.components().any(|c| c == Component::ParentDir));
        let expected = PathBuf::from("/data/tiktok/p/videos/i");
        assert_eq!(dir.components().count(), expected.components().count());
    }

    #[test]
    fn test_create_item_dir_is_lazy_and_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(root.path(), "someone");
        assert!(!layout.profile_dir().exists());

        let dir = layout.create_item_dir("42").unwrap();
        assert!(dir.is_dir());
        assert_eq!(layout.create_item_dir("42").unwrap(), dir);
    }
}
