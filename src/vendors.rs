use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};

use crate::download::archive::ArchiveDownloader;
use crate::download::direct::DirectDownloader;
use crate::download::override_url::OverrideDownloader;
use crate::download::release::ReleaseDownloader;
use crate::download::s3::S3Downloader;
use crate::download::supermicro::SupermicroResolver;
use crate::download::Downloader;
use crate::store::ArtifactStore;

/// Vendor-independent source configuration gathered at startup.
pub struct SourceOptions {
    /// Release platform API base, e.g. `https://api.github.com`.
    pub release_api: String,
    pub release_token: Option<String>,
    /// Source bucket for vendors that mirror out of S3.
    pub source_bucket: Option<ArtifactStore>,
    /// Per-vendor origin overrides, vendor id to mirror base URL.
    pub origin_overrides: HashMap<String, String>,
}

/// Maps a vendor identifier to its acquisition strategy. Vendor identity
/// stays here; the sync engine only ever sees the [`Downloader`] interface.
pub struct Registry {
    /// Client for vendor protocol calls such as checksum listings; blob
    /// fetches go through the object-store adapter.
    http: reqwest::Client,
    options: SourceOptions,
}

impl Registry {
    pub fn new(options: SourceOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("fwsync")
            .build()
            .context("building vendor HTTP client")?;
        Ok(Self { http, options })
    }

    /// The downloader for `vendor`, `Ok(None)` when the vendor is unknown
    /// (callers log and skip), `Err` when the vendor is known but its source
    /// configuration is missing.
    pub fn downloader_for(&self, vendor: &str) -> Result<Option<Box<dyn Downloader>>> {
        if let Some(base) = self.options.origin_overrides.get(vendor) {
            return Ok(Some(Box::new(OverrideDownloader::new(base)?)));
        }

        let downloader: Box<dyn Downloader> = match vendor {
            "dell" => Box::new(DirectDownloader::new()),
            "asrockrack" => {
                let source = self.options.source_bucket.clone().ok_or_else(|| {
                    anyhow!("vendor {vendor} requires a configured source bucket")
                })?;
                Box::new(S3Downloader::new(source))
            }
            "supermicro" => Box::new(ArchiveDownloader::with_resolver(Box::new(
                SupermicroResolver::new(self.http.clone()),
            ))),
            "mellanox" | "intel" => Box::new(ArchiveDownloader::new()),
            "equinix" => {
                let token = self.options.release_token.as_deref().ok_or_else(|| {
                    anyhow!("vendor {vendor} requires a release platform token")
                })?;
                Box::new(ReleaseDownloader::new(&self.options.release_api, token)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(downloader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(options: SourceOptions) -> Registry {
        Registry::new(options).expect("build registry")
    }

    fn bare_options() -> SourceOptions {
        SourceOptions {
            release_api: "https://api.github.com".into(),
            release_token: None,
            source_bucket: None,
            origin_overrides: HashMap::new(),
        }
    }

    #[test]
    fn unknown_vendor_has_no_downloader() {
        assert!(registry(bare_options())
            .downloader_for("contoso")
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn known_vendors_resolve() {
        let reg = registry(bare_options());
        for vendor in ["dell", "supermicro", "mellanox", "intel"] {
            assert!(reg.downloader_for(vendor).expect("lookup").is_some());
        }
    }

    #[test]
    fn source_bucket_vendor_without_config_is_an_error() {
        assert!(registry(bare_options()).downloader_for("asrockrack").is_err());
    }

    #[test]
    fn release_vendor_without_token_is_an_error() {
        assert!(registry(bare_options()).downloader_for("equinix").is_err());
    }

    #[test]
    fn release_vendor_with_token_resolves() {
        let mut options = bare_options();
        options.release_token = Some("token".into());
        assert!(registry(options)
            .downloader_for("equinix")
            .expect("lookup")
            .is_some());
    }

    #[test]
    fn origin_override_takes_precedence() {
        let mut options = bare_options();
        options.release_token = None;
        options
            .origin_overrides
            .insert("equinix".into(), "https://mirror.example".into());
        // without the override this vendor would need a release token
        assert!(registry(options)
            .downloader_for("equinix")
            .expect("lookup")
            .is_some());
    }
}
