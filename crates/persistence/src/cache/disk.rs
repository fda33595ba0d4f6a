//! Persistent on-disk image tier.
//!
//! Layout: one file per image inside the cache directory, named by the
//! hex SHA-256 of the source URL, holding the raw downloaded bytes.

use coinfeed_core::Result;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DiskImageCache {
    dir: PathBuf,
}

impl DiskImageCache {
    /// Use `dir` as cache directory, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Stable content key for a URL
    pub fn key_for(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(Self::key_for(url))
    }

    /// Read cached bytes. Missing or unreadable files count as a miss.
    pub async fn read(&self, url: &str) -> Option<Vec<u8>> {
        match tokio::fs::read(self.path_for(url)).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Disk cache read failed for {}: {}", url, e);
                None
            }
        }
    }

    /// Write bytes for a URL. Goes through a temp file so readers never see
    /// a partial image.
    pub async fn write(&self, url: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(url);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Stored {} bytes on disk for {}", bytes.len(), url);
        Ok(())
    }

    pub async fn contains(&self, url: &str) -> bool {
        tokio::fs::try_exists(self.path_for(url))
            .await
            .unwrap_or(false)
    }

    /// Remove the whole directory and recreate it empty
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }
}
