//! Source media under the configured media root.
//!
//! Every reference is confined to the root. Uploads land in a hidden
//! `.part` file and are renamed into place once complete, so a job never
//! starts from a half-written source.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};

use crate::utils::fs;
use crate::{Error, Result};

/// A file available for broadcasting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    /// Reference to pass as `video_reference`.
    pub name: String,
    pub size_bytes: u64,
}

/// View of the media root.
#[derive(Debug, Clone)]
pub struct MediaLibrary {
    root: PathBuf,
}

impl MediaLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a video reference to a path inside the root.
    ///
    /// Returns `None` for references that could escape the root: absolute
    /// paths, `..` components, or empty references.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let candidate = Path::new(reference);
        let mut saw_normal = false;
        for component in candidate.components() {
            match component {
                Component::Normal(_) => saw_normal = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        saw_normal.then(|| self.root.join(candidate))
    }

    /// Resolve a reference and confirm it names an existing regular file.
    pub async fn locate(&self, reference: &str) -> Option<PathBuf> {
        let path = self.resolve(reference)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            Ok(_) => {
                debug!(path = %path.display(), "media reference is not a regular file");
                None
            }
            Err(_) => None,
        }
    }

    /// Write `content` to `reference`, replacing any existing file.
    pub async fn store<R>(&self, reference: &str, mut content: R) -> Result<MediaFile>
    where
        R: AsyncRead + Unpin,
    {
        let path = self
            .resolve(reference)
            .ok_or_else(|| Error::validation(format!("invalid media reference '{reference}'")))?;
        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(Error::validation(format!("invalid media reference '{reference}'")));
        };
        fs::ensure_dir_all_with_op("creating media directory", parent).await?;

        let partial = parent.join(format!(".{}.part", file_name.to_string_lossy()));
        let written = match write_file(&partial, &mut content).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(fs::io_error("moving uploaded media", &path, e));
        }

        info!(reference, size_bytes = written, "Media stored");
        Ok(MediaFile {
            name: reference.to_string(),
            size_bytes: written,
        })
    }

    /// Delete the file named by `reference`.
    ///
    /// A running job keeps reading its already open source.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        if self.resolve(reference).is_none() {
            return Err(Error::validation(format!("invalid media reference '{reference}'")));
        }
        let path = self
            .locate(reference)
            .await
            .ok_or_else(|| Error::not_found("MediaFile", reference))?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| fs::io_error("deleting media", &path, e))?;
        info!(reference, "Media deleted");
        Ok(())
    }

    /// List the regular files directly under the root, sorted by name.
    pub async fn list(&self) -> Result<Vec<MediaFile>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(fs::io_error("listing media root", &self.root, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| fs::io_error("listing media root", &self.root, e))?
        {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && !is_partial_upload(name)
            {
                files.push(MediaFile {
                    name: name.to_string(),
                    size_bytes: meta.len(),
                });
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

fn is_partial_upload(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".part")
}

async fn write_file<R>(path: &Path, content: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| fs::io_error("creating media file", path, e))?;
    let written = tokio::io::copy(content, &mut file)
        .await
        .map_err(|e| fs::io_error("writing media file", path, e))?;
    file.flush()
        .await
        .map_err(|e| fs::io_error("writing media file", path, e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case::plain("loop.mp4", true)]
    #[case::nested("shows/loop.mp4", true)]
    #[case::dot("./loop.mp4", true)]
    #[case::parent("../secret.mp4", false)]
    #[case::sneaky("shows/../../secret.mp4", false)]
    #[case::absolute("/etc/passwd", false)]
    #[case::empty("", false)]
    fn test_resolve_stays_inside_root(#[case] reference: &str, #[case] accepted: bool) {
        let library = MediaLibrary::new("/srv/video");
        let resolved = library.resolve(reference);
        assert_eq!(resolved.is_some(), accepted);
        if let Some(path) = resolved {
            assert!(path.starts_with("/srv/video"));
        }
    }

    #[tokio::test]
    async fn test_locate_and_list() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"bbbb").unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("folder")).unwrap();

        let library = MediaLibrary::new(dir.path());
        assert!(library.locate("a.mp4").await.is_some());
        assert!(library.locate("missing.mp4").await.is_none());
        assert!(library.locate("folder").await.is_none());

        let files = library.list().await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4"]);
        assert_eq!(files[1].size_bytes, 4);
    }

    #[tokio::test]
    async fn test_store_and_remove() {
        let dir = TempDir::new().unwrap();
        let library = MediaLibrary::new(dir.path().join("media"));

        let stored = library.store("loop.mp4", &b"video"[..]).await.unwrap();
        assert_eq!(stored.size_bytes, 5);
        assert_eq!(
            std::fs::read(dir.path().join("media").join("loop.mp4")).unwrap(),
            b"video"
        );

        let replaced = library.store("loop.mp4", &b"v2"[..]).await.unwrap();
        assert_eq!(replaced.size_bytes, 2);
        let names: Vec<_> = library
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["loop.mp4"]);

        library.remove("loop.mp4").await.unwrap();
        assert!(library.locate("loop.mp4").await.is_none());
        assert!(matches!(
            library.remove("loop.mp4").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_rejects_escaping_reference() {
        let dir = TempDir::new().unwrap();
        let library = MediaLibrary::new(dir.path());
        assert!(matches!(
            library.store("../evil.mp4", &b"x"[..]).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            library.remove("/etc/passwd").await,
            Err(Error::Validation(_))
        ));
        assert!(!dir.path().parent().unwrap().join("evil.mp4").exists());
    }

    #[test]
    fn test_partial_uploads_are_hidden() {
        assert!(is_partial_upload(".loop.mp4.part"));
        assert!(!is_partial_upload("loop.mp4"));
        assert!(!is_partial_upload("loop.part"));
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let library = MediaLibrary::new("/definitely/not/here");
        assert!(library.list().await.unwrap().is_empty());
    }
}
