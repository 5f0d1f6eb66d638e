pub mod archive;
pub mod auth;
pub mod checksum;
pub mod download;
pub mod inventory;
pub mod manifest;
pub mod metrics;
pub mod store;
pub mod syncer;
pub mod vendors;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::TokenSource;
use crate::inventory::InventoryClient;
use crate::manifest::ManifestClient;
use crate::store::{ArtifactStore, S3Config};
use crate::syncer::{SyncReport, Syncer};
use crate::vendors::{Registry, SourceOptions};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// URL of the firmware manifest document.
    #[clap(long, env)]
    pub manifest_url: String,
    /// Base URL artifacts are served from; composed into repository URLs.
    #[clap(long, env)]
    pub artifacts_base_url: String,

    /// Destination bucket; mutually exclusive with --destination-root.
    #[clap(long, env)]
    pub destination_bucket: Option<String>,
    #[clap(long, env)]
    pub destination_endpoint: Option<String>,
    #[clap(long, env, default_value = "us-east-1")]
    pub destination_region: String,
    #[clap(long, env, default_value = "")]
    pub destination_access_key: String,
    #[clap(long, env, default_value = "")]
    pub destination_secret_key: String,
    /// Local directory destination, for tests and local runs.
    #[clap(long, env)]
    pub destination_root: Option<PathBuf>,

    /// Inventory service base URL.
    #[clap(long, env)]
    pub inventory_endpoint: String,
    /// Skip OAuth entirely; pairs with --inventory-token for tests.
    #[clap(long, env, required(false), default_value_t = false)]
    pub inventory_disable_oauth: bool,
    /// Pre-acquired bearer token, used when OAuth is disabled.
    #[clap(long, env)]
    pub inventory_token: Option<String>,
    #[clap(long, env)]
    pub inventory_oauth_token_url: Option<String>,
    #[clap(long, env, default_value = "")]
    pub inventory_oauth_client_id: String,
    #[clap(long, env, default_value = "")]
    pub inventory_oauth_client_secret: String,
    #[clap(long, env, default_value = "")]
    pub inventory_oauth_audience: String,

    /// Bearer token for vendors published through a release platform.
    #[clap(long, env)]
    pub release_platform_token: Option<String>,
    #[clap(long, env, default_value = "https://api.github.com")]
    pub release_platform_api: String,

    /// Source bucket for vendors that mirror out of S3.
    #[clap(long, env)]
    pub source_s3_bucket: Option<String>,
    #[clap(long, env)]
    pub source_s3_endpoint: Option<String>,
    #[clap(long, env, default_value = "us-east-1")]
    pub source_s3_region: String,
    #[clap(long, env, default_value = "")]
    pub source_s3_access_key: String,
    #[clap(long, env, default_value = "")]
    pub source_s3_secret_key: String,

    /// Per-vendor origin override, `vendor=https://mirror.example`
    /// (repeatable).
    #[clap(long, env, value_parser = parse_origin_override, value_delimiter = ',')]
    pub origin_override: Vec<(String, String)>,

    /// Base directory for per-firmware scratch directories.
    #[clap(long, env)]
    pub temp_root: Option<PathBuf>,
    #[clap(long, env, default_value = "0.0.0.0:9090")]
    pub metrics_listen_addr: String,
    #[clap(long, env, default_value = "info")]
    log_level: LevelFilter,
}

fn parse_origin_override(val: &str) -> Result<(String, String), String> {
    val.split_once('=')
        .map(|(vendor, url)| (vendor.to_lowercase(), url.to_string()))
        .ok_or_else(|| format!("expected vendor=url, got '{val}'"))
}

/// Runs one sync pass with the provided CLI configuration.
///
/// Initializes logging and the metrics endpoint, wires the destination
/// store, inventory client, and vendor registry, then walks the manifest
/// vendor by vendor. Per-record failures are logged and counted but leave
/// the exit code at zero; configuration errors and catalog invariant
/// violations surface as `Err`.
pub async fn run(cli: Cli) -> Result<()> {
    tracing_subscriber::registry()
        .with(cli.log_level)
        .with(fmt::layer())
        .init();

    // Graceful shutdown setup
    let cancel_token = CancellationToken::new();
    tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, proceeding with graceful shutdown...");
                cancel_token.cancel();
            }
        }
    });

    let store = match (&cli.destination_bucket, &cli.destination_root) {
        (Some(bucket), None) => ArtifactStore::s3(&S3Config {
            endpoint: cli.destination_endpoint.clone(),
            region: cli.destination_region.clone(),
            bucket: bucket.clone(),
            access_key: cli.destination_access_key.clone(),
            secret_key: cli.destination_secret_key.clone(),
        })?,
        (None, Some(root)) => ArtifactStore::local(root)?,
        _ => bail!("exactly one of --destination-bucket or --destination-root must be set"),
    };

    let token = if cli.inventory_disable_oauth {
        match &cli.inventory_token {
            Some(token) => TokenSource::static_token(token.clone()),
            None => TokenSource::anonymous(),
        }
    } else {
        let token_url = cli
            .inventory_oauth_token_url
            .clone()
            .context("--inventory-oauth-token-url is required unless OAuth is disabled")?;
        TokenSource::client_credentials(
            token_url,
            cli.inventory_oauth_client_id.clone(),
            cli.inventory_oauth_client_secret.clone(),
            cli.inventory_oauth_audience.clone(),
        )?
    };
    let inventory = InventoryClient::new(&cli.inventory_endpoint, &cli.artifacts_base_url, token)?;

    let source_bucket = match &cli.source_s3_bucket {
        Some(bucket) => Some(ArtifactStore::s3(&S3Config {
            endpoint: cli.source_s3_endpoint.clone(),
            region: cli.source_s3_region.clone(),
            bucket: bucket.clone(),
            access_key: cli.source_s3_access_key.clone(),
            secret_key: cli.source_s3_secret_key.clone(),
        })?),
        None => None,
    };
    let registry = Registry::new(SourceOptions {
        release_api: cli.release_platform_api.clone(),
        release_token: cli.release_platform_token.clone(),
        source_bucket,
        origin_overrides: cli.origin_override.iter().cloned().collect::<HashMap<_, _>>(),
    })?;

    let temp_root = cli.temp_root.clone().unwrap_or_else(std::env::temp_dir);
    let syncer = Syncer::new(store, inventory, &temp_root)?;
    let manifest = ManifestClient::new(&cli.manifest_url)?;

    // Metrics endpoint lives for the duration of the run.
    let metrics_task = tokio::spawn(serve_metrics(
        cli.metrics_listen_addr.clone(),
        cancel_token.clone(),
    ));

    let by_vendor = tokio::select! {
        () = cancel_token.cancelled() => bail!("cancelled before the manifest was loaded"),
        loaded = manifest.load() => loaded?,
    };
    info!(vendors = by_vendor.len(), "manifest loaded");

    let mut totals = SyncReport::default();
    for (vendor, firmwares) in &by_vendor {
        if cancel_token.is_cancelled() {
            break;
        }
        let downloader = match registry.downloader_for(vendor) {
            Ok(Some(downloader)) => downloader,
            Ok(None) => {
                warn!(vendor = %vendor, "no downloader registered for vendor, skipping");
                continue;
            }
            Err(err) => {
                error!(vendor = %vendor, error = ?err, "vendor source configuration invalid, skipping");
                totals.failed += firmwares.len() as u64;
                continue;
            }
        };
        info!(vendor = %vendor, records = firmwares.len(), "syncing vendor");
        let report = syncer
            .sync_vendor(vendor, downloader.as_ref(), firmwares, &cancel_token)
            .await;
        totals.absorb(&report);
    }

    info!(
        synced = totals.synced,
        skipped = totals.skipped,
        failed = totals.failed,
        "sync finished"
    );

    cancel_token.cancel();
    let _ = metrics_task.await;

    if totals.invariant_violations > 0 {
        bail!(
            "{} firmware records hit catalog invariant violations",
            totals.invariant_violations
        );
    }
    Ok(())
}

async fn serve_metrics(listen_address: String, cancel_token: CancellationToken) {
    let listener = match TcpListener::bind(&listen_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = ?err, "failed to bind metrics listener on {listen_address}");
            return;
        }
    };
    info!("metrics server listening on {listen_address}");

    let shutdown_future = async move {
        cancel_token.cancelled().await;
    };

    if let Err(err) = axum::serve(listener, crate::metrics::metrics_router())
        .with_graceful_shutdown(shutdown_future)
        .await
    {
        error!(error = ?err, "metrics server failed");
    }
}
