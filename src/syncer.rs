use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checksum;
use crate::download::Downloader;
use crate::inventory::{DuplicateEntriesError, InventoryClient};
use crate::manifest::FirmwareRecord;
use crate::store::ArtifactStore;

/// Per-vendor tally of a sync pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Failures that are catalog invariant violations; these make the whole
    /// run exit non-zero.
    pub invariant_violations: u64,
}

impl SyncReport {
    pub fn absorb(&mut self, other: &SyncReport) {
        self.synced += other.synced;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.invariant_violations += other.invariant_violations;
    }
}

enum Outcome {
    Synced,
    Skipped,
}

/// Per-firmware reconciliation against the destination store and the
/// inventory catalog: skip-if-present, download, verify, upload, publish.
pub struct Syncer {
    store: ArtifactStore,
    inventory: InventoryClient,
    temp_root: PathBuf,
    /// Destination keys currently being processed. The scheduling seam for a
    /// worker pool: a claimed key is never processed twice concurrently.
    in_flight: Mutex<HashSet<String>>,
}

impl Syncer {
    pub fn new(store: ArtifactStore, inventory: InventoryClient, temp_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(temp_root)
            .with_context(|| format!("creating temp root {}", temp_root.display()))?;
        Ok(Self {
            store,
            inventory,
            temp_root: temp_root.to_path_buf(),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Walks one vendor's firmware list in manifest order. Per-record
    /// failures are logged and counted; they never abort the remaining
    /// records.
    pub async fn sync_vendor(
        &self,
        vendor: &str,
        downloader: &dyn Downloader,
        firmwares: &[FirmwareRecord],
        cancel: &CancellationToken,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        for firmware in firmwares {
            if cancel.is_cancelled() {
                warn!(vendor, "sync cancelled, leaving remaining records for the next run");
                break;
            }
            let started = Instant::now();
            match self.sync_one(downloader, firmware, cancel).await {
                Ok(Outcome::Synced) => {
                    report.synced += 1;
                    metrics::counter!("firmware_synced_total", "vendor" => vendor.to_string())
                        .increment(1);
                }
                Ok(Outcome::Skipped) => {
                    report.skipped += 1;
                    metrics::counter!("firmware_skipped_total", "vendor" => vendor.to_string())
                        .increment(1);
                }
                Err(err) => {
                    report.failed += 1;
                    if err.downcast_ref::<DuplicateEntriesError>().is_some() {
                        report.invariant_violations += 1;
                    }
                    error!(
                        vendor = %firmware.vendor,
                        filename = %firmware.filename,
                        version = %firmware.version,
                        upstream_url = %firmware.upstream_url,
                        error = ?err,
                        "firmware sync failed"
                    );
                    metrics::counter!("firmware_sync_failures_total", "vendor" => vendor.to_string())
                        .increment(1);
                }
            }
            metrics::histogram!("firmware_sync_duration_seconds", "vendor" => vendor.to_string())
                .record(started.elapsed().as_secs_f64());
        }
        report
    }

    async fn sync_one(
        &self,
        downloader: &dyn Downloader,
        firmware: &FirmwareRecord,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let key = firmware.destination_key();
        let Some(_claim) = Claim::take(&self.in_flight, &key) else {
            debug!(%key, "destination key already claimed in this run");
            return Ok(Outcome::Skipped);
        };

        if self.store.exists(&key).await? {
            info!(%key, "destination object already present, skipping");
            return Ok(Outcome::Skipped);
        }

        let scratch = TempDir::with_prefix_in("fw-", &self.temp_root)
            .context("creating scratch directory")?;
        // dropping `scratch` removes it on every exit path, cancellation
        // included
        tokio::select! {
            () = cancel.cancelled() => Err(anyhow!("cancelled while processing {key}")),
            result = self.fetch_and_publish(downloader, firmware, scratch.path(), &key) => result,
        }
    }

    async fn fetch_and_publish(
        &self,
        downloader: &dyn Downloader,
        firmware: &FirmwareRecord,
        scratch: &Path,
        key: &str,
    ) -> Result<Outcome> {
        let local = downloader.download(scratch, firmware).await?;
        if !checksum::validate(&local, &firmware.checksum).await {
            bail!(
                "downloaded file {} does not match {}",
                local.display(),
                firmware.checksum
            );
        }
        self.store
            .put_file(key, &local)
            .await
            .with_context(|| format!("uploading {key}"))?;
        self.inventory.publish(firmware).await?;
        Ok(Outcome::Synced)
    }
}

/// RAII claim on a destination key; released when dropped.
struct Claim<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> Claim<'a> {
    fn take(set: &'a Mutex<HashSet<String>>, key: &str) -> Option<Self> {
        if set.lock().insert(key.to_owned()) {
            Some(Claim {
                set,
                key: key.to_owned(),
            })
        } else {
            None
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}
