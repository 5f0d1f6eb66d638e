use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Hash algorithms a checksum hint can select.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha256,
}

impl Algorithm {
    fn from_hint(hint: &str) -> Option<Self> {
        match hint {
            "md5sum" => Some(Algorithm::Md5),
            "sha256" => Some(Algorithm::Sha256),
            _ => None,
        }
    }
}

/// Splits an `algo:hex` checksum into algorithm and digest. A bare hex value
/// (no colon) is treated as md5. Returns `None` for an unsupported algorithm.
pub fn parse_hint(checksum: &str) -> Option<(Algorithm, &str)> {
    match checksum.split_once(':') {
        Some((algo, digest)) => Algorithm::from_hint(algo).map(|a| (a, digest)),
        None => Some((Algorithm::Md5, checksum)),
    }
}

/// Computes the hex digest of the file at `path` without buffering its whole
/// contents.
pub fn compute_blocking(path: &Path, algorithm: Algorithm) -> Result<String> {
    match algorithm {
        Algorithm::Md5 => digest_file::<Md5>(path),
        Algorithm::Sha256 => digest_file::<Sha256>(path),
    }
}

/// Async wrapper around [`compute_blocking`], run on the blocking pool.
pub async fn compute(path: &Path, algorithm: Algorithm) -> Result<String> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || compute_blocking(&path, algorithm))
        .await
        .context("hashing task panicked")?
}

/// Checks the file at `path` against an `algo:hex` checksum. Any failure
/// (unsupported hint, unreadable file, digest mismatch) yields `false`; the
/// caller decides what to do with the record.
pub fn validate_blocking(path: &Path, checksum: &str) -> bool {
    let Some((algorithm, expected)) = parse_hint(checksum) else {
        warn!(checksum, "unsupported checksum hint");
        return false;
    };
    match compute_blocking(path, algorithm) {
        Ok(actual) => actual.eq_ignore_ascii_case(expected),
        Err(error) => {
            warn!(path = %path.display(), error = ?error, "checksum computation failed");
            false
        }
    }
}

/// Async wrapper around [`validate_blocking`], run on the blocking pool.
pub async fn validate(path: &Path, checksum: &str) -> bool {
    let path = path.to_owned();
    let checksum = checksum.to_owned();
    tokio::task::spawn_blocking(move || validate_blocking(&path, &checksum))
        .await
        .unwrap_or(false)
}

fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("opening {} for hashing", path.display()))?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
