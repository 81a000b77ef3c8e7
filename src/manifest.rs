//! Persistent hash cache.
//!
//! The manifest maps each source file to the modification time and content
//! hash it had when last hashed. On startup only files whose modification
//! time differs from the manifest are read and hashed again.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;

use camino::Utf8Path;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::core::{Asset, HashAlgorithm};
use crate::error::{IndexError, ManifestError};
use crate::index::Entry;

pub(crate) type Manifest = HashMap<String, Asset>;

/// Reads the manifest. A missing file is an empty manifest.
pub(crate) fn load(path: &Utf8Path) -> Result<Manifest, ManifestError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Manifest::new()),
        Err(err) => return Err(ManifestError::Read(path.to_path_buf(), err)),
    };

    serde_json::from_slice(&data).map_err(|err| ManifestError::Parse(path.to_path_buf(), err))
}

pub(crate) fn save(path: &Utf8Path, assets: &BTreeMap<String, Asset>) -> Result<(), ManifestError> {
    let data = serde_json::to_vec_pretty(assets)?;
    fs::write(path, data).map_err(|err| ManifestError::Write(path.to_path_buf(), err))
}

pub(crate) struct Rehashed {
    pub(crate) assets: BTreeMap<String, Asset>,
    /// Whether the manifest no longer reflects `assets`.
    pub(crate) outdated: bool,
    pub(crate) errors: Vec<IndexError>,
}

/// Builds asset records for `entries`, reusing hashes from `manifest` when
/// the modification time matches.
pub(crate) fn rehash(
    root: &Utf8Path,
    entries: Vec<Entry>,
    manifest: &Manifest,
    algorithm: HashAlgorithm,
) -> Rehashed {
    let results: Vec<_> = entries
        .into_par_iter()
        .map(|entry| -> Result<(bool, Asset), IndexError> {
            let name = entry.path.to_lowercase();

            if let Some(cached) = manifest.get(&name)
                && cached.mtime == entry.mtime
            {
                tracing::debug!(%name, "manifest hit");
                return Ok((false, asset(name, entry, cached.hash.clone())));
            }

            let path = root.join(&entry.path);
            let hash = algorithm
                .digest_file(&path)
                .map_err(|err| IndexError::Hash(path, err))?;

            Ok((true, asset(name, entry, hash)))
        })
        .collect();

    let mut assets = BTreeMap::new();
    let mut errors = Vec::new();
    let mut outdated = false;

    for result in results {
        match result {
            Ok((fresh, asset)) => {
                outdated |= fresh;
                assets.insert(asset.name.clone(), asset);
            }
            Err(err) => errors.push(err),
        }
    }

    outdated |= manifest.keys().any(|name| !assets.contains_key(name));

    Rehashed {
        assets,
        outdated,
        errors,
    }
}

fn asset(name: String, entry: Entry, hash: String) -> Asset {
    Asset {
        name,
        mtime: entry.mtime,
        hash,
        path: entry.path,
    }
}
