use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::manifest::FirmwareRecord;
use crate::store::ArtifactStore;

pub mod archive;
pub mod direct;
pub mod override_url;
pub mod release;
pub mod s3;
pub mod supermicro;

/// A strategy for materializing one firmware binary on local disk.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetches `firmware` into `dir` and returns the path of a file holding
    /// the raw binary, ready for upload. The caller owns `dir` and removes it
    /// afterwards.
    async fn download(&self, dir: &Path, firmware: &FirmwareRecord) -> Result<PathBuf>;
}

/// Streams `url` into the file at `dest` through the object-store HTTP
/// backend.
pub(crate) async fn fetch_url_to_file(url: &str, dest: &Path) -> Result<()> {
    let mut file = File::create(dest)
        .await
        .with_context(|| format!("creating {}", dest.display()))?;
    ArtifactStore::copy_url_to_writer(url, &mut file).await?;
    file.flush().await?;
    Ok(())
}
