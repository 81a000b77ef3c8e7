use std::fmt::Display;
use std::fs::Metadata;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;

use camino::Utf8Path;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Digest used both for content hashes of individual files and for the
/// fingerprint of a resolved asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    /// Lowercase hex digest of `buffer`.
    pub fn digest(self, buffer: impl AsRef<[u8]>) -> String {
        let buffer = buffer.as_ref();

        match self {
            HashAlgorithm::Md5 => to_hex(&Md5::digest(buffer)),
            HashAlgorithm::Sha256 => to_hex(&Sha256::digest(buffer)),
            HashAlgorithm::Blake3 => to_hex(blake3::hash(buffer).as_bytes()),
        }
    }

    pub fn digest_file(self, path: impl AsRef<std::path::Path>) -> std::io::Result<String> {
        let buffer = std::fs::read(path)?;
        Ok(self.digest(buffer))
    }

    /// Number of hex characters produced by [`HashAlgorithm::digest`].
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => 64,
        }
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashAlgorithm::Md5 => write!(f, "md5"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut acc = String::with_capacity(bytes.len() * 2);

    for &byte in bytes {
        acc.push(HEX[(byte >> 4) as usize] as char);
        acc.push(HEX[(byte & 0xF) as usize] as char);
    }

    acc
}

/// A single source file known to the manager.
///
/// The record is keyed by `name`, the lowercased path relative to the asset
/// root. The same shape is persisted in the on-disk manifest, which lets the
/// hash of an unchanged file be reused across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Lowercased relative path with `/` separators.
    pub name: String,
    /// Modification time in milliseconds since the Unix epoch.
    #[serde(rename = "modificationTime")]
    pub mtime: u64,
    /// Hex content digest.
    pub hash: String,
    /// Relative path as found on disk, used for reading.
    #[serde(skip)]
    pub(crate) path: String,
}

/// Notifications emitted by [`Assets`](crate::Assets) outside the normal
/// control flow of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A non-fatal problem, e.g. an unreadable file during indexing or a
    /// manifest that couldn't be written.
    Error(String),
    /// A file was updated, added or removed by the watcher.
    Change(String),
}

pub(crate) fn mtime(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|time| time.as_millis() as u64)
        .unwrap_or_default()
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Relative path with `/` separators regardless of platform.
pub(crate) fn to_key(path: &Utf8Path) -> String {
    path.components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Splits `a/b/c.js` into `("a/b", "c.js")`.
pub(crate) fn split_name(name: &str) -> (&str, &str) {
    name.rsplit_once('/').unwrap_or(("", name))
}

/// Extension of the last path segment, without the dot.
pub(crate) fn extension(name: &str) -> Option<&str> {
    let (_, base) = split_name(name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => Some(ext),
        _ => None,
    }
}

/// Whether a relative name climbs out of the directory it is relative to.
pub(crate) fn escapes_root(name: &str) -> bool {
    name.split(['/', '\\']).any(|segment| segment == "..")
}

/// Joins URL segments, keeping exactly one `/` at every join point.
pub(crate) fn join_url<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut acc = String::new();

    for part in parts {
        if part.is_empty() {
            continue;
        }

        if acc.is_empty() {
            acc.push_str(part);
            continue;
        }

        match (acc.ends_with('/'), part.starts_with('/')) {
            (true, true) => acc.push_str(&part[1..]),
            (false, false) => {
                acc.push('/');
                acc.push_str(part);
            }
            _ => acc.push_str(part),
        }
    }

    acc
}

/// Name of the hashed output file for `base`.
pub(crate) fn hashed_name(prefix: &str, hash: &str, base: &str) -> String {
    format!("{prefix}-{hash}-{base}")
}

/// If `name` is a compiled output (`{prefix}-{hex}-rest`), returns its
/// canonical name, i.e. the same path with the fingerprint stripped.
pub(crate) fn canonical_name(prefix: &str, name: &str) -> Option<String> {
    let (dir, base) = split_name(name);
    let rest = base.strip_prefix(prefix)?.strip_prefix('-')?;
    let split = rest.find(|c: char| !c.is_ascii_hexdigit() || c.is_ascii_uppercase())?;

    if split == 0 {
        return None;
    }

    let rest = rest[split..].strip_prefix('-')?;

    Some(match dir {
        "" => rest.to_string(),
        dir => format!("{dir}/{rest}"),
    })
}
