use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::Downloader;
use crate::manifest::FirmwareRecord;

/// Timeout for release-platform requests; asset downloads can be large.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
#[error("release URL must look like https://<host>/<owner>/<repo>/releases/download/<tag>/<filename>, got {0}")]
pub struct MalformedReleaseUrl(String);

/// The coordinates encoded in a release download URL.
#[derive(Debug, PartialEq, Eq)]
pub struct ReleaseLocator {
    pub owner: String,
    pub repo: String,
    pub tag: String,
    pub asset: String,
}

/// Splits `https://<host>/<owner>/<repo>/releases/download/<tag>/<filename>`
/// into its coordinates. Anything else is malformed.
pub fn parse_release_url(raw: &str) -> Result<ReleaseLocator> {
    let url = Url::parse(raw).with_context(|| format!("invalid release URL {raw}"))?;
    let segments: Vec<&str> = url.path().split('/').collect();
    if segments.len() != 7
        || !segments[0].is_empty()
        || segments[3] != "releases"
        || segments[4] != "download"
    {
        return Err(MalformedReleaseUrl(raw.to_owned()).into());
    }
    Ok(ReleaseLocator {
        owner: segments[1].to_owned(),
        repo: segments[2].to_owned(),
        tag: segments[5].to_owned(),
        asset: segments[6].to_owned(),
    })
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    id: u64,
    name: String,
}

/// Resolves a release tag through the platform API and streams the matching
/// asset down through a redirect-following client.
pub struct ReleaseDownloader {
    api_base: String,
    token: String,
    client: reqwest::Client,
}

impl ReleaseDownloader {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fwsync")
            .timeout(DOWNLOAD_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("building release platform HTTP client")?;
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            token: token.into(),
            client,
        })
    }

    async fn release_by_tag(&self, locator: &ReleaseLocator) -> Result<Release> {
        let url = format!(
            "{}/repos/{}/{}/releases/tags/{}",
            self.api_base, locator.owner, locator.repo, locator.tag
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("resolving release tag {}", locator.tag))?;
        resp.json().await.context("parsing release")
    }

    async fn download_asset(&self, locator: &ReleaseLocator, asset_id: u64, dest: &Path) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/releases/assets/{asset_id}",
            self.api_base, locator.owner, locator.repo
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/octet-stream")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let mut resp = resp
            .error_for_status()
            .with_context(|| format!("downloading asset {asset_id}"))?;
        let mut file = File::create(dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;
        while let Some(chunk) = resp.chunk().await.context("reading asset body")? {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("writing {}", dest.display()))?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Downloader for ReleaseDownloader {
    async fn download(&self, dir: &Path, firmware: &FirmwareRecord) -> Result<PathBuf> {
        let locator = parse_release_url(&firmware.upstream_url)?;
        let release = self.release_by_tag(&locator).await?;
        debug!(tag = %release.tag_name, assets = release.assets.len(), "resolved release");
        let asset = release
            .assets
            .iter()
            .find(|asset| asset.name == locator.asset)
            .ok_or_else(|| {
                anyhow!(
                    "release {} of {}/{} has no asset named {}",
                    locator.tag,
                    locator.owner,
                    locator.repo,
                    locator.asset
                )
            })?;
        let dest = dir.join(&firmware.filename);
        self.download_asset(&locator, asset.id, &dest).await?;
        Ok(dest)
    }
}
