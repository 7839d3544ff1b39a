//! Read-only view over the download directory.
//!
//! Lists profiles, videos and artifacts for browsing, and resolves artifact
//! requests to files that are guaranteed to live under the download root.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::pipeline::layout::{PLATFORM_DIR, VIDEOS_DIR};
use crate::Result;

/// A downloaded profile and its videos
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub name: String,
    pub videos: Vec<VideoEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub id: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name within the video directory
    pub name: String,

    /// Size in bytes
    pub size: u64,

    /// Path relative to the download root, `/`-separated
    pub path: String,
}

/// Sorted names of the subdirectories (or files) of `dir`
fn sorted_entries(dir: &Path, want_dirs: bool) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs_err::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_type()
                .map(|t| if want_dirs { t.is_dir() } else { t.is_file() })
                .unwrap_or(false)
        })
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}

/// Scan `<base_dir>/tiktok/<profile>/videos/<id>/*`.
///
/// Profiles, videos and files are sorted lexically. Profiles without any video
/// directory are omitted. A missing root yields an empty list.
pub fn scan(base_dir: &Path) -> Result<Vec<ProfileEntry>> {
    let platform_dir = base_dir.join(PLATFORM_DIR);
    if !platform_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut profiles = Vec::new();
    for profile in sorted_entries(&platform_dir, true)? {
        let videos_dir = platform_dir.join(&profile).join(VIDEOS_DIR);
        if !videos_dir.is_dir() {
            continue;
        }

        let mut videos = Vec::new();
        for id in sorted_entries(&videos_dir, true)? {
            let video_dir = videos_dir.join(&id);
            let files = sorted_entries(&video_dir, false)?
                .into_iter()
                .map(|name| {
                    let size = fs_err::metadata(video_dir.join(&name))
                        .map(|m| m.len())
                        .unwrap_or(0);
                    let path = [
                        PLATFORM_DIR,
                        profile.as_str(),
                        VIDEOS_DIR,
                        id.as_str(),
                        name.as_str(),
                    ]
                    .join("/");
                    FileEntry { name, size, path }
                })
                .collect();
            videos.push(VideoEntry { id, files });
        }

        if !videos.is_empty() {
            profiles.push(ProfileEntry {
                name: profile,
                videos,
            });
        }
    }

    Ok(profiles)
}

/// Why an artifact request was refused
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Forbidden")]
    Forbidden,

    #[error("Not found")]
    NotFound,
}

/// Resolve a client-supplied relative path to a file under `root`.
///
/// Absolute paths and `..` segments are refused outright; whatever survives is
/// canonicalized and must still sit under the canonical root, so symlinks cannot
/// escape either.
pub fn resolve_artifact(
    root: &Path,
    requested: &str,
) -> std::result::Result<PathBuf, ResolveError> {
    if requested.is_empty() || requested.contains('\0') || requested.contains('\\') {
        return Err(ResolveError::Forbidden);
    }

    let relative = Path::new(requested);
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(ResolveError::Forbidden);
    }

    let base = fs_err::canonicalize(root).map_err(|_| ResolveError::NotFound)?;
    let resolved = match fs_err::canonicalize(base.join(relative)) {
        Ok(path) => path,
        Err(_) => return Err(ResolveError::NotFound),
    };

    if resolved == base || !resolved.starts_with(&base) {
        return Err(ResolveError::Forbidden);
    }

    if !resolved.is_file() {
        return Err(ResolveError::NotFound);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        fs_err::create_dir_all(path.parent().unwrap()).unwrap();
        fs_err::write(path, bytes).unwrap();
    }

    fn sample_tree() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "tiktok/zed/videos/2/video.mp4", b"12345");
        write(root.path(), "tiktok/zed/videos/2/audio.mp3", b"123");
        write(root.path(), "tiktok/zed/videos/1/metadata.json", b"{}");
        write(root.path(), "tiktok/amy/videos/9/transcript.txt", b"hi");
        fs_err::create_dir_all(root.path().join("tiktok/empty")).unwrap();
        write(root.path(), "tiktok/stray.txt", b"x");
        root
    }

    #[test]
    fn test_missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(scan(&root.path().join("nope")).unwrap().is_empty());
        assert!(scan(root.path()).unwrap().is_empty());
    }

    #[test]
    fn test_scan_sorted_listing() {
        let root = sample_tree();
        let profiles = scan(root.path()).unwrap();

        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["amy", "zed"]);

        let zed = &profiles[1];
        let ids: Vec<_> = zed.videos.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        let files = &zed.videos[1].files;
        assert_eq!(
            files,
            &vec![
                FileEntry {
                    name: "audio.mp3".to_string(),
                    size: 3,
                    path: "tiktok/zed/videos/2/audio.mp3".to_string(),
                },
                FileEntry {
                    name: "video.mp4".to_string(),
                    size: 5,
                    path: "tiktok/zed/videos/2/video.mp4".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_scan_is_repeatable() {
        let root = sample_tree();
        assert_eq!(scan(root.path()).unwrap(), scan(root.path()).unwrap());
    }

    #[test]
    fn test_resolve_existing_artifact() {
        let root = sample_tree();
        let path = assert_ok!(resolve_artifact(root.path(), "tiktok/zed/videos/2/video.mp4"));
        assert_eq!(fs_err::read(path).unwrap(), b"12345");
    }

    #[test]
    fn test_resolve_refuses_traversal() {
        let outer = tempfile::tempdir().unwrap();
        write(outer.path(), "secret.txt", b"secret");
        let root = outer.path().join("downloads");
        write(&root, "tiktok/a/videos/1/video.mp4", b"v");

        for escape in [
            "../secret.txt",
            "tiktok/../../secret.txt",
            "tiktok/a/videos/1/../../../../../secret.txt",
            "/etc/passwd",
            "..\\secret.txt",
            "",
        ] {
            assert_eq!(
                resolve_artifact(&root, escape),
                Err(ResolveError::Forbidden),
                "{escape:?}"
            );
        }

        let absolute = outer.path().join("secret.txt");
        assert_err!(resolve_artifact(&root, &absolute.to_string_lossy()));
    }

    #[test]
    fn test_resolve_missing_and_directories() {
        let root = sample_tree();
        assert_eq!(
            resolve_artifact(root.path(), "tiktok/zed/videos/2/nope.mp4"),
            Err(ResolveError::NotFound)
        );
        assert_eq!(
            resolve_artifact(root.path(), "tiktok/zed"),
            Err(ResolveError::NotFound)
        );
        assert_eq!(
            resolve_artifact(root.path(), "%2e%2e/secret.txt"),
            Err(ResolveError::NotFound)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_refuses_symlink_escape() {
        let outer = tempfile::tempdir().unwrap();
        write(outer.path(), "secret.txt", b"secret");
        let root = outer.path().join("downloads");
        write(&root, "tiktok/a/videos/1/video.mp4", b"v");
        std::os::unix::fs::symlink(
            outer.path().join("secret.txt"),
            root.join("tiktok/a/videos/1/link.txt"),
        )
        .unwrap();

        assert_eq!(
            resolve_artifact(&root, "tiktok/a/videos/1/link.txt"),
            Err(ResolveError::Forbidden)
        );
    }
}
