use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

use crate::checksum;

/// Upper bound on zip-in-zip recursion.
pub const MAX_NESTING: usize = 4;

/// Errors from resolving a firmware file out of a vendor archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no member matching {wanted} in {archive}")]
    MemberNotFound { archive: String, wanted: String },
    #[error("nested archives exceed depth {0}")]
    TooDeep(usize),
    #[error("checksum mismatch for {path}, expected {expected}")]
    ChecksumMismatch { path: String, expected: String },
    #[error("malformed archive {archive}: {source}")]
    Zip {
        archive: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Extracts the member named `wanted` out of the zip at `archive` and returns
/// the extracted file's path.
///
/// Member selection walks the entries in order and picks the first that is
/// either a nested zip whose stem contains the stem of `wanted`, or a plain
/// entry whose name ends with `wanted`. Nested zips are extracted and
/// descended into; intermediate archives have no known checksum and are not
/// verified. The final file is verified against `expected_checksum` unless it
/// is empty.
pub fn extract_member(
    archive: &Path,
    wanted: &str,
    expected_checksum: &str,
) -> Result<PathBuf, ExtractError> {
    extract_at_depth(archive, wanted, expected_checksum, 0)
}

fn extract_at_depth(
    archive: &Path,
    wanted: &str,
    expected_checksum: &str,
    depth: usize,
) -> Result<PathBuf, ExtractError> {
    if depth >= MAX_NESTING {
        return Err(ExtractError::TooDeep(MAX_NESTING));
    }

    let zip_error = |source| ExtractError::Zip {
        archive: archive.display().to_string(),
        source,
    };
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(zip_error)?;

    let wanted_stem = stem(wanted);
    let mut selected = None;
    for index in 0..zip.len() {
        let name = zip.by_index(index).map_err(zip_error)?.name().to_owned();
        if name.ends_with(".zip") && stem(basename(&name)).contains(wanted_stem) {
            selected = Some(index);
            break;
        }
        if name.ends_with(wanted) {
            selected = Some(index);
            break;
        }
    }
    let Some(index) = selected else {
        return Err(ExtractError::MemberNotFound {
            archive: archive.display().to_string(),
            wanted: wanted.to_owned(),
        });
    };

    let mut entry = zip.by_index(index).map_err(zip_error)?;
    let entry_name = basename(entry.name()).to_owned();
    let parent = archive.parent().unwrap_or(Path::new(".")).to_path_buf();
    let out_path = {
        let candidate = parent.join(&entry_name);
        if candidate == archive {
            // an inner archive can carry the same name as its container
            let nested_dir = parent.join(format!("nested-{depth}"));
            std::fs::create_dir_all(&nested_dir)?;
            nested_dir.join(&entry_name)
        } else {
            candidate
        }
    };
    let mut out = File::create(&out_path)?;
    io::copy(&mut entry, &mut out)?;
    drop(entry);

    if entry_name.ends_with(".zip") {
        return extract_at_depth(&out_path, wanted, expected_checksum, depth + 1);
    }

    if !expected_checksum.is_empty() && !checksum::validate_blocking(&out_path, expected_checksum) {
        return Err(ExtractError::ChecksumMismatch {
            path: out_path.display().to_string(),
            expected: expected_checksum.to_owned(),
        });
    }
    Ok(out_path)
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Filename minus its last extension.
fn stem(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}
