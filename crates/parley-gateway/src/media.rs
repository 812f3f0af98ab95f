use std::path::PathBuf;

use anyhow::Result;
use tokio::fs;
use tracing::info;

/// On-disk blob store for profile thumbnails.
///
/// Each identity owns at most one thumbnail, stored at
/// `{dir}/thumbnails/{username}.{ext}` with the extension taken from
/// the uploaded filename. Paths handed back (and persisted in the
/// user row) are relative to `dir`.
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(dir.join("thumbnails")).await?;
        info!("Media directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub async fn save_thumbnail(
        &self,
        username: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let relative = thumbnail_path(username, filename);
        fs::write(self.dir.join(&relative), bytes).await?;
        Ok(relative)
    }

    /// Remove a stored blob. A missing file is not an error — the row
    /// and the disk can disagree after a crash.
    pub async fn delete(&self, relative: &str) -> Result<()> {
        match fs::remove_file(self.dir.join(relative)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn thumbnail_path(username: &str, filename: &str) -> String {
    let mut path = format!("thumbnails/{username}");
    if let Some((_, extension)) = filename.rsplit_once('.') {
        let extension: String = extension
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if !extension.is_empty() {
            path.push('.');
            path.push_str(&extension);
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("parley-media-{}", Uuid::new_v4()))
    }

    #[test]
    fn path_uses_username_and_sanitized_extension() {
        assert_eq!(thumbnail_path("alice", "pic.png"), "thumbnails/alice.png");
        assert_eq!(thumbnail_path("alice", "pic.p?g"), "thumbnails/alice.pg");
        assert_eq!(thumbnail_path("alice", "noext"), "thumbnails/alice");
    }

    #[tokio::test]
    async fn save_and_delete_roundtrip() {
        let store = MediaStore::new(scratch_dir()).await.unwrap();

        let relative = store
            .save_thumbnail("alice", "me.jpg", b"not really a jpg")
            .await
            .unwrap();
        assert_eq!(relative, "thumbnails/alice.jpg");
        assert_eq!(
            fs::read(store.dir.join(&relative)).await.unwrap(),
            b"not really a jpg"
        );

        store.delete(&relative).await.unwrap();
        assert!(fs::read(store.dir.join(&relative)).await.is_err());

        // Deleting again is fine.
        store.delete(&relative).await.unwrap();
    }
}
