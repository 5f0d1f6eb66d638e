//! Shared test utilities for fwsync integration tests.
//!
//! Provides an in-memory inventory service behind a wiremock API, helpers
//! for serving firmware blobs and archives, and a preassembled sync harness
//! over a local destination store.

// Allow dead code since not all test files use all helpers
#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use md5::{Digest, Md5};
use parking_lot::Mutex;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};
use zip::write::SimpleFileOptions;

use fwsync::auth::TokenSource;
use fwsync::inventory::{CatalogEntry, InventoryClient};
use fwsync::manifest::FirmwareRecord;
use fwsync::store::ArtifactStore;
use fwsync::syncer::Syncer;

/// Artifacts base URL used to compose repository URLs in tests.
pub const ARTIFACTS_BASE: &str = "https://artifacts.example";

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// An in-memory firmware catalog behind a wiremock inventory API: list by
/// checksum, create, and update by id, with call counters for assertions.
pub struct MockInventory {
    server: MockServer,
    entries: Arc<Mutex<Vec<CatalogEntry>>>,
    creates: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

impl MockInventory {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let entries: Arc<Mutex<Vec<CatalogEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let next_id = Arc::new(AtomicUsize::new(1));
        let creates = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));

        {
            let entries = Arc::clone(&entries);
            Mock::given(method("GET"))
                .and(path("/api/v1/firmwares"))
                .respond_with(move |req: &Request| {
                    let checksum = req
                        .url
                        .query_pairs()
                        .find(|(key, _)| key == "checksum")
                        .map(|(_, value)| value.into_owned())
                        .unwrap_or_default();
                    let matching: Vec<CatalogEntry> = entries
                        .lock()
                        .iter()
                        .filter(|entry| entry.checksum == checksum)
                        .cloned()
                        .collect();
                    ResponseTemplate::new(200).set_body_json(&matching)
                })
                .mount(&server)
                .await;
        }

        {
            let entries = Arc::clone(&entries);
            let next_id = Arc::clone(&next_id);
            let creates = Arc::clone(&creates);
            Mock::given(method("POST"))
                .and(path("/api/v1/firmwares"))
                .respond_with(move |req: &Request| {
                    let mut entry: CatalogEntry =
                        serde_json::from_slice(&req.body).expect("parse create body");
                    entry.id = format!("fw-{}", next_id.fetch_add(1, Ordering::SeqCst));
                    creates.fetch_add(1, Ordering::SeqCst);
                    entries.lock().push(entry.clone());
                    ResponseTemplate::new(200).set_body_json(&entry)
                })
                .mount(&server)
                .await;
        }

        {
            let entries = Arc::clone(&entries);
            let updates = Arc::clone(&updates);
            Mock::given(method("PUT"))
                .and(path_regex(r"^/api/v1/firmwares/.+$"))
                .respond_with(move |req: &Request| {
                    let updated: CatalogEntry =
                        serde_json::from_slice(&req.body).expect("parse update body");
                    updates.fetch_add(1, Ordering::SeqCst);
                    let mut entries = entries.lock();
                    match entries.iter_mut().find(|entry| entry.id == updated.id) {
                        Some(slot) => {
                            *slot = updated.clone();
                            ResponseTemplate::new(200).set_body_json(&updated)
                        }
                        None => ResponseTemplate::new(404),
                    }
                })
                .mount(&server)
                .await;
        }

        Self {
            server,
            entries,
            creates,
            updates,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Seeds an entry directly into the catalog, bypassing the API. The
    /// entry must carry an id.
    pub fn seed(&self, entry: CatalogEntry) {
        assert!(!entry.id.is_empty(), "seeded entries need an id");
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.entries.lock().clone()
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// An [`InventoryClient`] pointed at this mock, using the token-bypass
    /// mode.
    pub fn client(&self, artifacts_base_url: &str) -> InventoryClient {
        InventoryClient::new(
            &self.uri(),
            artifacts_base_url,
            TokenSource::static_token("test-token"),
        )
        .expect("build inventory client")
    }
}

/// A sync engine over a local destination store, a scratch root, and a mock
/// inventory.
pub struct TestHarness {
    pub store_root: tempfile::TempDir,
    pub temp_root: tempfile::TempDir,
    pub inventory: MockInventory,
    pub syncer: Syncer,
}

pub async fn harness() -> TestHarness {
    init_tracing();
    let store_root = tempfile::tempdir().expect("create store root");
    let temp_root = tempfile::tempdir().expect("create temp root");
    let inventory = MockInventory::start().await;
    let store = ArtifactStore::local(store_root.path()).expect("open destination store");
    let syncer = Syncer::new(store, inventory.client(ARTIFACTS_BASE), temp_root.path())
        .expect("build syncer");
    TestHarness {
        store_root,
        temp_root,
        inventory,
        syncer,
    }
}

impl TestHarness {
    /// Filesystem path of a destination object in the local store.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.store_root.path().join(key)
    }
}

/// Mounts `bytes` at `url_path` on `server`.
pub async fn serve_blob(server: &MockServer, url_path: &str, bytes: &[u8]) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(bytes.to_vec()),
        )
        .mount(server)
        .await;
}

/// Like [`serve_blob`] but verifies the blob is fetched exactly
/// `expected_hits` times over the server's lifetime.
pub async fn serve_blob_expect(server: &MockServer, url_path: &str, bytes: &[u8], expected_hits: u64) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(bytes.to_vec()),
        )
        .expect(expected_hits)
        .mount(server)
        .await;
}

/// Builds an in-memory zip holding the given entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(&mut cursor);
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(data).expect("write zip entry");
    }
    writer.finish().expect("finish zip");
    cursor.into_inner()
}

/// A firmware record with sensible defaults; tests adjust fields in place.
pub fn firmware_record(vendor: &str, filename: &str, upstream_url: &str, md5: &str) -> FirmwareRecord {
    FirmwareRecord {
        vendor: vendor.to_string(),
        component: "bios".to_string(),
        models: vec![format!("{vendor}-model")],
        version: "1.0.0".to_string(),
        upstream_url: upstream_url.to_string(),
        filename: filename.to_string(),
        checksum: format!("md5sum:{md5}"),
        install_inband: None,
        oem: None,
    }
}

/// Initializes tracing for tests, respecting RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .with_test_writer()
        .try_init();
}
