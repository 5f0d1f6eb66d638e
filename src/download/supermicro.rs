use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::archive::{ResolvedArchive, SourceResolver};
use crate::manifest::FirmwareRecord;

/// Supermicro publishes firmware behind a download page keyed by a short
/// numeric id; the real archive URL and its md5 live in a `checksum.txt`
/// next to the archive.
pub struct SupermicroResolver {
    client: reqwest::Client,
}

impl SupermicroResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceResolver for SupermicroResolver {
    async fn resolve(&self, firmware: &FirmwareRecord) -> Result<ResolvedArchive> {
        let upstream = Url::parse(&firmware.upstream_url)
            .with_context(|| format!("invalid upstream URL {}", firmware.upstream_url))?;
        let id = firmware_id(&upstream)?;

        let checksum_url = softfiles_url(&upstream, &id, "checksum.txt");
        debug!(url = %checksum_url, "fetching checksum listing");
        let body = self
            .client
            .get(checksum_url.clone())
            .send()
            .await
            .with_context(|| format!("GET {checksum_url}"))?
            .error_for_status()
            .with_context(|| format!("GET {checksum_url}"))?
            .text()
            .await
            .context("reading checksum listing")?;

        let (archive, md5) = parse_checksum_listing(&body, &id)?;
        Ok(ResolvedArchive {
            url: softfiles_url(&upstream, &id, &archive).to_string(),
            checksum: Some(format!("md5sum:{md5}")),
        })
    }
}

/// The short numeric firmware id embedded in the upstream URL query.
fn firmware_id(url: &Url) -> Result<String> {
    url.query_pairs()
        .map(|(_, value)| value.into_owned())
        .find(|value| !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| anyhow!("no numeric firmware id in query of {url}"))
}

fn softfiles_url(upstream: &Url, id: &str, name: &str) -> Url {
    let mut url = upstream.clone();
    url.set_path(&format!("/Bios/softfiles/{id}/{name}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Pulls the archive filename and its md5 out of a `checksum.txt` body.
///
/// Two layouts occur in the wild: the digest on the `MD5 CheckSum:` line
/// itself, or on the first non-empty line after it. The archive name is
/// whatever follows `softfiles/<id>/` on the first line mentioning it.
fn parse_checksum_listing(body: &str, id: &str) -> Result<(String, String)> {
    let lines: Vec<&str> = body.lines().collect();
    let marker = format!("softfiles/{id}/");
    let mut archive = None;
    let mut md5 = None;

    for (index, raw) in lines.iter().enumerate() {
        if archive.is_some() && md5.is_some() {
            break;
        }
        let line = raw.trim();
        if archive.is_none() {
            if let Some(pos) = line.find(&marker) {
                let name = line[pos + marker.len()..]
                    .split_whitespace()
                    .next()
                    .unwrap_or("");
                if !name.is_empty() {
                    archive = Some(name.to_owned());
                }
            }
        }
        if md5.is_none() && line.to_ascii_lowercase().contains("md5") {
            let tail = line.rsplit(':').next().unwrap_or("").trim();
            if is_md5_hex(tail) {
                md5 = Some(tail.to_ascii_lowercase());
            } else if let Some(next) = lines[index + 1..]
                .iter()
                .map(|l| l.trim())
                .find(|l| !l.is_empty())
            {
                if is_md5_hex(next) {
                    md5 = Some(next.to_ascii_lowercase());
                }
            }
        }
    }

    match (archive, md5) {
        (Some(archive), Some(md5)) => Ok((archive, md5)),
        _ => bail!("checksum listing for firmware id {id} names no archive or md5"),
    }
}

fn is_md5_hex(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit())
}
