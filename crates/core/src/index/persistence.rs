//! Disk persistence for index artifacts using bincode serialization.
//!
//! Each index is written to `{name}.lvi`. Writes use atomic temp-file + rename
//! so a crash never leaves a half-written artifact behind. The file layout is
//! `[bincode payload][magic "LVI1"][u32 CRC32 BE]`; the payload carries a
//! format version and the full artifact (descriptor, centroids, codebook,
//! posting lists or value map, covered row ids).

use crate::config;
use crate::error::{Error, Result};
use crate::index::IndexArtifact;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Magic bytes written before the CRC32 footer.
const INDEX_CRC_MAGIC: &[u8; 4] = b"LVI1";

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    artifact: IndexArtifact,
}

/// Path an index named `name` is stored at inside `dir`.
pub fn index_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{}", config::INDEX_FILE_EXTENSION))
}

/// Save an index to `dir` with an atomic write. Returns the final path.
pub fn save_index(artifact: &IndexArtifact, dir: &Path) -> Result<PathBuf> {
    let envelope = PersistedIndex {
        format_version: config::INDEX_FORMAT_VERSION,
        artifact: artifact.clone(),
    };
    let bytes = bincode::serialize(&envelope)?;
    let crc = crc32fast::hash(&bytes);

    fs::create_dir_all(dir)?;
    let path = index_path(dir, artifact.name());
    let tmp_path = dir.join(format!(
        "{}.{}.tmp",
        artifact.name(),
        config::INDEX_FILE_EXTENSION
    ));

    let mut output = Vec::with_capacity(bytes.len() + 8);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(INDEX_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    fs::write(&tmp_path, &output)?;
    fs::rename(&tmp_path, &path)?;

    tracing::info!(
        "Saved index '{}' ({} bytes, CRC32={:#010x})",
        artifact.name(),
        bytes.len(),
        crc
    );
    Ok(path)
}

/// Load an index, verifying its CRC32 footer and format version.
///
/// Any truncation, checksum mismatch or undecodable payload is a data error.
pub fn load_index(path: &Path) -> Result<IndexArtifact> {
    let raw = fs::read(path)?;
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != INDEX_CRC_MAGIC {
        return Err(Error::data(format!(
            "{} is not an index file (missing checksum footer)",
            path.display()
        )));
    }
    let payload = &raw[..raw.len() - 8];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&raw[raw.len() - 4..]);
    let stored_crc = u32::from_be_bytes(crc_bytes);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(Error::data(format!(
            "index CRC32 mismatch: expected {:#010x}, got {:#010x}. File may be corrupted: {}",
            stored_crc,
            computed_crc,
            path.display()
        )));
    }
    tracing::debug!("Index CRC32 verified: {:#010x}", stored_crc);

    let envelope: PersistedIndex = bincode::deserialize(payload)?;
    if envelope.format_version != config::INDEX_FORMAT_VERSION {
        return Err(Error::data(format!(
            "unsupported index format version {} in {}",
            envelope.format_version,
            path.display()
        )));
    }

    let artifact = envelope.artifact;
    tracing::info!(
        "Loaded {} index '{}' on column '{}' ({} rows)",
        artifact.kind(),
        artifact.name(),
        artifact.column(),
        artifact.covered.len()
    );
    Ok(artifact)
}

/// Load every index file in `dir`, ordered by file name.
pub fn load_dir(dir: &Path) -> Result<Vec<IndexArtifact>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some(config::INDEX_FILE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(|p| load_index(p)).collect()
}
