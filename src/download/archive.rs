use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{fetch_url_to_file, Downloader};
use crate::archive::extract_member;
use crate::checksum;
use crate::manifest::FirmwareRecord;

/// Where an archive really lives, as reported by a vendor indirection.
pub struct ResolvedArchive {
    pub url: String,
    /// `algo:hex` checksum of the archive itself, when the vendor publishes
    /// one.
    pub checksum: Option<String>,
}

/// Resolves the real archive location for vendors that hide it behind an
/// indirection such as a checksum listing.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, firmware: &FirmwareRecord) -> Result<ResolvedArchive>;
}

/// Fetches a zip from the upstream URL through the adapter's HTTP backend
/// and extracts the wanted member.
#[derive(Default)]
pub struct ArchiveDownloader {
    resolver: Option<Box<dyn SourceResolver>>,
}

impl ArchiveDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(resolver: Box<dyn SourceResolver>) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }
}

#[async_trait]
impl Downloader for ArchiveDownloader {
    async fn download(&self, dir: &Path, firmware: &FirmwareRecord) -> Result<PathBuf> {
        let (url, archive_checksum) = match &self.resolver {
            Some(resolver) => {
                let resolved = resolver.resolve(firmware).await?;
                (resolved.url, resolved.checksum)
            }
            None => (firmware.upstream_url.clone(), None),
        };

        let archive_path = dir.join(archive_filename(&url));
        debug!(url = %url, "downloading archive");
        fetch_url_to_file(&url, &archive_path).await?;

        if let Some(expected) = archive_checksum {
            if !checksum::validate(&archive_path, &expected).await {
                bail!("archive from {url} does not match its published checksum {expected}");
            }
        }

        let wanted = firmware.filename.clone();
        let expected = firmware.checksum.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            extract_member(&archive_path, &wanted, &expected)
        })
        .await
        .context("extraction task panicked")??;
        Ok(extracted)
    }
}

/// Local name for the downloaded archive, taken from the URL's last path
/// segment.
fn archive_filename(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| "download.zip".to_owned())
}
