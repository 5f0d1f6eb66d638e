use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::auth::TokenSource;
use crate::manifest::FirmwareRecord;

pub mod models;

pub use models::CatalogEntry;

/// More than one catalog entry claims the same checksum. The catalog is the
/// system of record; this is never resolved silently.
#[derive(Debug, Error)]
#[error("checksum {checksum} maps to {} catalog entries: {}", .ids.len(), .ids.join(", "))]
pub struct DuplicateEntriesError {
    pub checksum: String,
    pub ids: Vec<String>,
}

/// Client for the firmware inventory service: lookup by checksum, create,
/// and update with merged model sets.
pub struct InventoryClient {
    firmwares_url: Url,
    artifacts_base: Url,
    token: TokenSource,
    client: reqwest::Client,
}

impl InventoryClient {
    pub fn new(endpoint: &str, artifacts_base_url: &str, token: TokenSource) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid inventory endpoint {endpoint}"))?;
        let firmwares_url = join_url(&endpoint, &["api", "v1", "firmwares"])?;
        let artifacts_base = Url::parse(artifacts_base_url)
            .with_context(|| format!("invalid artifacts base URL {artifacts_base_url}"))?;
        let client = reqwest::Client::builder()
            .user_agent("fwsync")
            .build()
            .context("building inventory HTTP client")?;
        Ok(Self {
            firmwares_url,
            artifacts_base,
            token,
            client,
        })
    }

    /// Reconciles one firmware record with the catalog:
    /// no entry with its checksum creates one, exactly one entry merges model
    /// sets and updates on any field drift, more than one entry is a
    /// [`DuplicateEntriesError`].
    pub async fn publish(&self, firmware: &FirmwareRecord) -> Result<()> {
        let repository_url = join_url(
            &self.artifacts_base,
            &[firmware.vendor.as_str(), firmware.filename.as_str()],
        )?;
        let mut entry = CatalogEntry::from_record(firmware, repository_url.to_string());

        let existing = self.by_checksum(&firmware.checksum).await?;
        match existing.len() {
            0 => {
                let created = self.create(&entry).await?;
                info!(
                    id = %created.id,
                    vendor = %firmware.vendor,
                    filename = %firmware.filename,
                    "created catalog entry"
                );
            }
            1 => {
                let current = &existing[0];
                entry.id = current.id.clone();
                entry.models = merge_models(&current.models, &entry.models);
                if entry_differs(&entry, current) {
                    self.update(&entry).await?;
                    info!(
                        id = %entry.id,
                        vendor = %firmware.vendor,
                        filename = %firmware.filename,
                        "updated catalog entry"
                    );
                } else {
                    debug!(id = %entry.id, "catalog entry already up to date");
                }
            }
            _ => {
                return Err(DuplicateEntriesError {
                    checksum: firmware.checksum.clone(),
                    ids: existing.into_iter().map(|entry| entry.id).collect(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn by_checksum(&self, checksum: &str) -> Result<Vec<CatalogEntry>> {
        let request = self
            .client
            .get(self.firmwares_url.clone())
            .query(&[("checksum", checksum)]);
        let resp = self
            .token
            .authorize(request)
            .await?
            .send()
            .await
            .context("inventory lookup failed")?
            .error_for_status()
            .context("inventory lookup rejected")?;
        resp.json().await.context("parsing inventory lookup")
    }

    async fn create(&self, entry: &CatalogEntry) -> Result<CatalogEntry> {
        let request = self.client.post(self.firmwares_url.clone()).json(entry);
        let resp = self
            .token
            .authorize(request)
            .await?
            .send()
            .await
            .context("inventory create failed")?
            .error_for_status()
            .context("inventory create rejected")?;
        resp.json().await.context("parsing created catalog entry")
    }

    async fn update(&self, entry: &CatalogEntry) -> Result<()> {
        let url = join_url(&self.firmwares_url, &[entry.id.as_str()])?;
        let request = self.client.put(url).json(entry);
        self.token
            .authorize(request)
            .await?
            .send()
            .await
            .context("inventory update failed")?
            .error_for_status()
            .context("inventory update rejected")?;
        Ok(())
    }
}

/// URL path join without double slashes; segments are percent-encoded.
fn join_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("URL {base} cannot be a base"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Set-union of both model lists, sorted. An update never removes a model
/// already present in the catalog.
fn merge_models(current: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = current.iter().chain(incoming).cloned().collect();
    merged.sort();
    merged.dedup();
    merged
}

/// Field-for-field drift check; model lists compare as sorted sets.
fn entry_differs(next: &CatalogEntry, current: &CatalogEntry) -> bool {
    let mut current_models = current.models.clone();
    current_models.sort();
    current_models.dedup();

    next.vendor != current.vendor
        || next.filename != current.filename
        || next.version != current.version
        || next.component != current.component
        || next.checksum != current.checksum
        || next.upstream_url != current.upstream_url
        || next.repository_url != current.repository_url
        || next.models != current_models
}
