use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{fetch_url_to_file, Downloader};
use crate::manifest::FirmwareRecord;

/// Fetches the upstream URL as-is through the adapter's HTTP backend; the
/// URL points directly at the firmware file.
#[derive(Default)]
pub struct DirectDownloader;

impl DirectDownloader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Downloader for DirectDownloader {
    async fn download(&self, dir: &Path, firmware: &FirmwareRecord) -> Result<PathBuf> {
        let dest = dir.join(&firmware.filename);
        debug!(url = %firmware.upstream_url, "downloading firmware");
        fetch_url_to_file(&firmware.upstream_url, &dest).await?;
        Ok(dest)
    }
}
