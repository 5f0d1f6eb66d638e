use serde::{Deserialize, Serialize};

use crate::manifest::FirmwareRecord;

/// The inventory service's persisted representation of a firmware record.
/// `checksum` is the natural key: at most one entry per checksum value.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub vendor: String,
    pub component: String,
    #[serde(default)]
    pub models: Vec<String>,
    pub version: String,
    pub filename: String,
    pub checksum: String,
    pub upstream_url: String,
    pub repository_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_inband: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oem: Option<bool>,
}

impl CatalogEntry {
    /// The catalog form of a firmware record, advertised under
    /// `repository_url`. Models are kept sorted and unique.
    pub fn from_record(firmware: &FirmwareRecord, repository_url: String) -> Self {
        let mut models = firmware.models.clone();
        models.sort();
        models.dedup();
        CatalogEntry {
            id: String::new(),
            vendor: firmware.vendor.clone(),
            component: firmware.component.clone(),
            models,
            version: firmware.version.clone(),
            filename: firmware.filename.clone(),
            checksum: firmware.checksum.clone(),
            upstream_url: firmware.upstream_url.clone(),
            repository_url,
            install_inband: firmware.install_inband,
            oem: firmware.oem,
        }
    }
}
