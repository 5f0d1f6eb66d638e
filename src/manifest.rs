use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Timeout for fetching the manifest document.
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(15);

/// One declared firmware artifact, normalized from the manifest. Immutable
/// for the duration of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareRecord {
    pub vendor: String,
    pub component: String,
    pub models: Vec<String>,
    pub version: String,
    pub upstream_url: String,
    pub filename: String,
    /// `algo:hex`; manifests only ever carry md5.
    pub checksum: String,
    pub install_inband: Option<bool>,
    pub oem: Option<bool>,
}

impl FirmwareRecord {
    /// Destination object key, `<vendor>/<filename>`.
    pub fn destination_key(&self) -> String {
        format!("{}/{}", self.vendor, self.filename)
    }
}

/// Wire shape of one manifest entry: a device model with its firmware grouped
/// by component kind.
#[derive(Debug, Deserialize)]
pub struct ModelEntry {
    pub model: String,
    pub manufacturer: String,
    #[serde(default)]
    pub firmware: BTreeMap<String, Vec<ManifestRecord>>,
}

/// Wire shape of one firmware row. The `prerequisite` field is deliberately
/// not declared: its JSON type varies across manifests.
#[derive(Debug, Deserialize)]
pub struct ManifestRecord {
    pub filename: String,
    pub firmware_version: String,
    pub md5sum: String,
    pub vendor_uri: String,
    #[serde(default)]
    pub build_date: Option<String>,
    #[serde(default)]
    pub latest: Option<bool>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub install_inband: Option<bool>,
    #[serde(default)]
    pub oem: Option<bool>,
}

/// Fetches the manifest document and normalizes it into per-vendor firmware
/// lists.
pub struct ManifestClient {
    client: reqwest::Client,
    url: String,
}

impl ManifestClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fwsync")
            .timeout(MANIFEST_TIMEOUT)
            .build()
            .context("building manifest HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn load(&self) -> Result<BTreeMap<String, Vec<FirmwareRecord>>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("fetching manifest from {}", self.url))?;
        let resp = resp
            .error_for_status()
            .with_context(|| format!("fetching manifest from {}", self.url))?;
        let entries: Vec<ModelEntry> = resp.json().await.context("parsing manifest")?;
        debug!(models = entries.len(), "manifest fetched");
        Ok(normalize(entries))
    }
}

/// Flattens `(model, component, record)` triples into [`FirmwareRecord`]s
/// grouped by vendor. Vendor, component, model, and filename are lowercased
/// here, once, so every later key and comparison agrees.
pub fn normalize(entries: Vec<ModelEntry>) -> BTreeMap<String, Vec<FirmwareRecord>> {
    let mut by_vendor: BTreeMap<String, Vec<FirmwareRecord>> = BTreeMap::new();
    for entry in entries {
        let vendor = entry.manufacturer.to_lowercase();
        let outer_model = entry.model.to_lowercase();
        for (component, records) in entry.firmware {
            let component = component.to_lowercase();
            for record in records {
                let mut models = vec![outer_model.clone()];
                if let Some(sub_model) = &record.model {
                    models.push(sub_model.to_lowercase());
                }
                by_vendor.entry(vendor.clone()).or_default().push(FirmwareRecord {
                    vendor: vendor.clone(),
                    component: component.clone(),
                    models,
                    version: record.firmware_version,
                    upstream_url: record.vendor_uri,
                    filename: record.filename.to_lowercase(),
                    checksum: format!("md5sum:{}", record.md5sum),
                    install_inband: record.install_inband,
                    oem: record.oem,
                });
            }
        }
    }
    by_vendor
}
