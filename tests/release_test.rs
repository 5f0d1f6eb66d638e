//! Release-platform downloader tests against a mock API.

mod common;

use common::{firmware_record, harness, md5_hex};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{bearer_token, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fwsync::download::release::ReleaseDownloader;

async fn mount_release(api: &MockServer, assets: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/firmware/releases/tags/v1"))
        .and(bearer_token("release-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 99,
            "tag_name": "v1",
            "assets": assets
        })))
        .mount(api)
        .await;
}

#[tokio::test]
async fn syncs_a_release_platform_vendor() {
    let h = harness().await;
    let api = MockServer::start().await;
    let payload = b"release-hosted firmware";

    mount_release(
        &api,
        serde_json::json!([
            {"id": 7, "name": "other.tar.gz"},
            {"id": 8, "name": "fw.bin"}
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/firmware/releases/assets/8"))
        .and(bearer_token("release-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(payload.to_vec()),
        )
        .mount(&api)
        .await;

    let record = firmware_record(
        "equinix",
        "fw.bin",
        "https://github.example/acme/firmware/releases/download/v1/fw.bin",
        &md5_hex(payload),
    );
    let downloader = ReleaseDownloader::new(api.uri(), "release-token").expect("build downloader");
    let report = h
        .syncer
        .sync_vendor(
            "equinix",
            &downloader,
            std::slice::from_ref(&record),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.synced, 1);
    assert_eq!(
        std::fs::read(h.object_path("equinix/fw.bin")).expect("read destination object"),
        payload
    );
    assert_eq!(h.inventory.entries().len(), 1);
}

#[tokio::test]
async fn missing_asset_fails_the_record() {
    let h = harness().await;
    let api = MockServer::start().await;

    mount_release(&api, serde_json::json!([{"id": 7, "name": "other.tar.gz"}])).await;

    let record = firmware_record(
        "equinix",
        "fw.bin",
        "https://github.example/acme/firmware/releases/download/v1/fw.bin",
        "00000000000000000000000000000000",
    );
    let downloader = ReleaseDownloader::new(api.uri(), "release-token").expect("build downloader");
    let report = h
        .syncer
        .sync_vendor(
            "equinix",
            &downloader,
            std::slice::from_ref(&record),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.failed, 1);
    assert!(!h.object_path("equinix/fw.bin").exists());
    assert!(h.inventory.entries().is_empty());
}

#[tokio::test]
async fn malformed_release_url_fails_the_record() {
    let h = harness().await;
    let api = MockServer::start().await;

    let record = firmware_record(
        "equinix",
        "fw.bin",
        "https://github.example/acme/firmware/releases/v1/fw.bin",
        "00000000000000000000000000000000",
    );
    let downloader = ReleaseDownloader::new(api.uri(), "release-token").expect("build downloader");
    let report = h
        .syncer
        .sync_vendor(
            "equinix",
            &downloader,
            std::slice::from_ref(&record),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.failed, 1);
}
