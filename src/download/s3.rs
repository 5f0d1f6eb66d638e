use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::Downloader;
use crate::manifest::FirmwareRecord;
use crate::store::ArtifactStore;

/// Streams firmware out of a vendor-provided source bucket; the upstream
/// URL's path names the source key.
pub struct S3Downloader {
    source: ArtifactStore,
}

impl S3Downloader {
    pub fn new(source: ArtifactStore) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Downloader for S3Downloader {
    async fn download(&self, dir: &Path, firmware: &FirmwareRecord) -> Result<PathBuf> {
        let url = Url::parse(&firmware.upstream_url)
            .with_context(|| format!("invalid upstream URL {}", firmware.upstream_url))?;
        let key = url.path().trim_start_matches('/').to_owned();
        let dest = dir.join(&firmware.filename);
        debug!(%key, "copying firmware from source bucket");
        self.source.get_to_file(&key, &dest).await?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_the_source_key_named_by_the_upstream_path() {
        let source_root = tempfile::tempdir().expect("source root");
        let scratch = tempfile::tempdir().expect("scratch");
        std::fs::create_dir_all(source_root.path().join("firmware/bmc")).expect("mkdir");
        std::fs::write(source_root.path().join("firmware/bmc/fw.bin"), b"payload")
            .expect("seed source object");

        let downloader = S3Downloader::new(
            ArtifactStore::local(source_root.path()).expect("open source store"),
        );
        let firmware = FirmwareRecord {
            vendor: "asrockrack".into(),
            component: "bmc".into(),
            models: vec!["x570".into()],
            version: "1.0".into(),
            upstream_url: "https://cdn.example/firmware/bmc/fw.bin".into(),
            filename: "fw.bin".into(),
            checksum: "md5sum:ignored".into(),
            install_inband: None,
            oem: None,
        };

        let path = downloader
            .download(scratch.path(), &firmware)
            .await
            .expect("download");
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }
}
