use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// On-disk object store for uploaded pitch videos.
///
/// Objects are content-addressed: the filename is the SHA-256 of the bytes,
/// so re-uploading identical content is a no-op and orphaned objects from an
/// abandoned submission are harmless (nothing here garbage-collects them).
pub struct MediaStore {
    dir: PathBuf,
    base_url: String,
}

impl MediaStore {
    pub async fn new(dir: PathBuf, base_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        let base_url = base_url.into();
        info!("Media storage directory: {}", dir.display());
        Ok(Self { dir, base_url })
    }

    /// Store a video byte stream and return its public URL. The write goes
    /// to a temp name first and is renamed into place, so a concurrent
    /// reader never sees a partial object.
    pub async fn store_video(&self, data: &[u8], ext: &str) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let name = format!("{}.{}", hex::encode(hasher.finalize()), sanitize_ext(ext));

        let path = self.dir.join(&name);
        if fs::try_exists(&path).await? {
            debug!("Object {} already stored", name);
            return Ok(self.public_url(&name));
        }

        let tmp = self.dir.join(format!("{name}.partial"));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        fs::rename(&tmp, &path).await?;

        info!("Stored object {} ({} bytes)", name, data.len());
        Ok(self.public_url(&name))
    }

    fn public_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }
}

fn sanitize_ext(ext: &str) -> &str {
    let ext = ext.trim_start_matches('.');
    if !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext
    } else {
        "bin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MediaStore {
        let dir = std::env::temp_dir().join(format!("pitchroom-media-test-{}", std::process::id()));
        MediaStore::new(dir, "http://localhost:3400/media").await.unwrap()
    }

    #[tokio::test]
    async fn store_is_content_addressed() {
        let store = store().await;
        let url1 = store.store_video(b"video bytes", "mp4").await.unwrap();
        let url2 = store.store_video(b"video bytes", "mp4").await.unwrap();
        assert_eq!(url1, url2);
        assert!(url1.starts_with("http://localhost:3400/media/"));
        assert!(url1.ends_with(".mp4"));
    }

    #[tokio::test]
    async fn bad_extension_falls_back() {
        let store = store().await;
        let url = store.store_video(b"other bytes", "../evil").await.unwrap();
        assert!(url.ends_with(".bin"));
    }
}
