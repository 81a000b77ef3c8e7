//! Walking the asset root.
//!
//! The walk produces every regular file below the root together with its
//! modification time. Files are then split into sources and previously
//! compiled outputs, which are recognized by their `{prefix}-{hex}-` name.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{GlobError, Pattern, glob};

use crate::core::{Asset, canonical_name, mtime, to_key};
use crate::error::IndexError;

/// A file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    /// Path relative to the root, with `/` separators and original casing.
    pub(crate) path: String,
    pub(crate) mtime: u64,
}

/// In-memory index of the asset root.
#[derive(Debug, Default)]
pub(crate) struct Index {
    /// Source files, by lowercased relative path.
    pub(crate) assets: BTreeMap<String, Asset>,
    /// Canonical output name -> hashed files present on disk.
    pub(crate) compiled: HashMap<String, BTreeSet<String>>,
}

impl Index {
    pub(crate) fn add_compiled(&mut self, prefix: &str, path: &str) {
        if let Some(canonical) = canonical_name(prefix, path) {
            self.compiled
                .entry(canonical.to_lowercase())
                .or_default()
                .insert(path.to_string());
        }
    }

    /// Replaces the registry with the outputs `found` by a walk, keeping the
    /// files registered meanwhile that still exist below `root`.
    pub(crate) fn merge_compiled(
        &mut self,
        found: HashMap<String, BTreeSet<String>>,
        root: &Utf8Path,
    ) {
        let previous = std::mem::replace(&mut self.compiled, found);

        for (canonical, files) in previous {
            for file in files {
                if root.join(&file).is_file() {
                    self.compiled
                        .entry(canonical.clone())
                        .or_default()
                        .insert(file);
                }
            }
        }
    }

    /// Forgets every hashed copy of `canonical` except `keep`, returning the
    /// relative paths of the forgotten files.
    pub(crate) fn take_stale(&mut self, canonical: &str, keep: &str) -> Vec<String> {
        let Some(files) = self.compiled.get_mut(canonical) else {
            return vec![];
        };

        let stale: Vec<_> = files
            .iter()
            .filter(|file| !file.eq_ignore_ascii_case(keep))
            .cloned()
            .collect();

        for file in &stale {
            files.remove(file);
        }

        stale
    }
}

/// Recursively lists regular files under `root`. Errors are collected rather
/// than returned so a partially unreadable tree still yields results.
pub(crate) fn walk(root: &Utf8Path) -> (Vec<Entry>, Vec<IndexError>) {
    let mut found = Vec::new();
    let mut errors = Vec::new();

    if let Err(err) = fs::read_dir(root) {
        errors.push(IndexError::Metadata(root.to_path_buf(), err));
        return (found, errors);
    }

    let pattern = format!("{}/**/*", Pattern::escape(root.as_str()));
    let paths = match glob(&pattern) {
        Ok(paths) => paths,
        Err(err) => {
            errors.push(err.into());
            return (found, errors);
        }
    };

    for path in paths {
        match visit(root, path) {
            Ok(Some(entry)) => found.push(entry),
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }

    (found, errors)
}

fn visit(root: &Utf8Path, path: Result<PathBuf, GlobError>) -> Result<Option<Entry>, IndexError> {
    let path = Utf8PathBuf::try_from(path?)?;
    let meta = fs::metadata(&path).map_err(|err| IndexError::Metadata(path.clone(), err))?;

    if !meta.is_file() {
        return Ok(None);
    }

    let relative = path.strip_prefix(root).unwrap_or(&path);

    Ok(Some(Entry {
        path: to_key(relative),
        mtime: mtime(&meta),
    }))
}

/// Separates source files from compiled outputs, dropping the manifest.
pub(crate) fn partition(
    entries: Vec<Entry>,
    prefix: &str,
    manifest: &str,
) -> (Vec<Entry>, HashMap<String, BTreeSet<String>>) {
    let mut index = Index::default();
    let mut sources = Vec::new();

    for entry in entries {
        if entry.path == manifest {
            continue;
        }

        if canonical_name(prefix, &entry.path).is_some() {
            index.add_compiled(prefix, &entry.path);
        } else {
            sources.push(entry);
        }
    }

    (sources, index.compiled)
}

/// Whether a path reported by the watcher should never be treated as a
/// source file.
pub(crate) fn is_ignored(prefix: &str, manifest: &str, key: &str) -> bool {
    key == manifest || canonical_name(prefix, key).is_some()
}
