use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::Downloader;
use crate::manifest::FirmwareRecord;
use crate::store::ArtifactStore;

/// Ignores the upstream URL and fetches `<base>/<filename>` from a
/// configured mirror through the adapter's HTTP backend. Anything but a
/// successful response is terminal.
pub struct OverrideDownloader {
    source: ArtifactStore,
}

impl OverrideDownloader {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            source: ArtifactStore::http(base_url)?,
        })
    }
}

#[async_trait]
impl Downloader for OverrideDownloader {
    async fn download(&self, dir: &Path, firmware: &FirmwareRecord) -> Result<PathBuf> {
        let dest = dir.join(&firmware.filename);
        debug!(filename = %firmware.filename, "downloading firmware from override origin");
        self.source.get_to_file(&firmware.filename, &dest).await?;
        Ok(dest)
    }
}
