//! Identifier resolution.
//!
//! An identifier such as `js/app.js` resolves to a fingerprinted output path
//! such as `/js/asset-1a2b3c-app.js`. The fingerprint is derived from the
//! content hashes of every constituent file and every dependency, in order,
//! so the same inputs always produce the same path and any content change
//! produces a new one.

use std::collections::{BTreeMap, HashSet};

use glob::{MatchOptions, Pattern};

use crate::config::{Options, Settings};
use crate::core::{Asset, escapes_root, extension, hashed_name, join_url, split_name};
use crate::error::ResolveError;
use crate::plugin::Plugins;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Per-call options for [`Assets::resolve`](crate::Assets::resolve).
///
/// Options given for an identifier that was resolved before are merged over
/// the stored ones, so later calls only need to pass what changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Files or globs making up a bundle, in order. Without it the
    /// identifier names a single file.
    pub include: Option<Vec<String>>,
    /// Files or globs that only contribute to the fingerprint.
    pub dependencies: Option<Vec<String>>,
    /// Overrides [`Options::url_prefix`] for this call.
    pub url_prefix: Option<String>,
    /// Skip merging with stored options and replace the entry outright.
    pub force: bool,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn dependencies<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = Some(prefix.into());
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Fields set on `self` win over `old`.
    pub(crate) fn merge_over(self, old: &ResolveOptions) -> ResolveOptions {
        ResolveOptions {
            include: self.include.or_else(|| old.include.clone()),
            dependencies: self.dependencies.or_else(|| old.dependencies.clone()),
            url_prefix: self.url_prefix.or_else(|| old.url_prefix.clone()),
            force: true,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Resolution {
    /// Served path, including the serve prefix.
    pub(crate) output: String,
    /// Physical path relative to the asset root.
    pub(crate) file: String,
    pub(crate) assets: Vec<Asset>,
    pub(crate) dependencies: Vec<Asset>,
}

/// Lowercases the identifier and maps a compiler source extension to the
/// compiler's output, e.g. `Main.LESS` -> `main.css`.
pub(crate) fn normalize(identifier: &str, plugins: &Plugins) -> String {
    let identifier = identifier.trim_start_matches('/').to_lowercase();

    let Some(ext) = extension(&identifier) else {
        return identifier;
    };

    match plugins.compiler(ext) {
        Some(compiler) => {
            let stem = &identifier[..identifier.len() - ext.len()];
            format!("{stem}{}", compiler.output)
        }
        None => identifier,
    }
}

fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}

/// Expands globs against the known assets. Plain entries pass through as
/// they are, duplicates are dropped keeping the first occurrence.
pub(crate) fn expand(
    entries: &[String],
    assets: &BTreeMap<String, Asset>,
) -> Result<Vec<String>, ResolveError> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for entry in entries {
        let entry = entry.trim_start_matches('/').to_lowercase();

        if escapes_root(&entry) {
            return Err(ResolveError::OutsideRoot(entry));
        }

        if !is_glob(&entry) {
            if seen.insert(entry.clone()) {
                files.push(entry);
            }
            continue;
        }

        let pattern =
            Pattern::new(&entry).map_err(|err| ResolveError::Pattern(entry.clone(), err))?;
        let mut matched = false;

        for name in assets
            .keys()
            .filter(|name| pattern.matches_with(name, MATCH_OPTIONS))
        {
            matched = true;
            if seen.insert(name.clone()) {
                files.push(name.clone());
            }
        }

        if !matched {
            return Err(ResolveError::NoMatches(entry));
        }
    }

    Ok(files)
}

/// Finds the asset for `name`, falling back to any source a compiler could
/// turn into it when `plugins` is given.
fn lookup(
    name: &str,
    assets: &BTreeMap<String, Asset>,
    plugins: Option<&Plugins>,
) -> Result<Asset, ResolveError> {
    if let Some(asset) = assets.get(name) {
        return Ok(asset.clone());
    }

    let mut tried = Vec::new();

    if let Some(plugins) = plugins
        && let Some(ext) = extension(name)
    {
        let stem = &name[..name.len() - ext.len()];

        for compiler in plugins.producers(ext) {
            let candidate = format!("{stem}{}", compiler.source);
            if let Some(asset) = assets.get(&candidate) {
                tracing::debug!(%name, %candidate, "resolved through compiler");
                return Ok(asset.clone());
            }
            tried.push(candidate);
        }
    }

    Err(ResolveError::AssetNotFound {
        name: name.to_string(),
        tried,
    })
}

/// Truncated digest over the concatenated hashes of `assets`.
pub(crate) fn fingerprint<'a>(
    assets: impl IntoIterator<Item = &'a Asset>,
    options: &Options,
) -> String {
    let joined: String = assets.into_iter().map(|asset| asset.hash.as_str()).collect();
    let mut digest = options.algorithm.digest(joined);
    digest.truncate(options.hash_length);
    digest
}

/// Served path and root-relative file path for `identifier` with `hash`.
pub(crate) fn output_paths(identifier: &str, hash: &str, options: &Options) -> (String, String) {
    let (dir, base) = split_name(identifier);
    let name = hashed_name(&options.asset_prefix, hash, base);
    let file = join_url([dir, name.as_str()]);
    let output = join_url([options.serve_prefix.as_str(), file.as_str()]);

    (output, file)
}

/// Resolves a normalized identifier against the current assets.
pub(crate) fn resolve(
    identifier: &str,
    request: &ResolveOptions,
    settings: &Settings,
    assets: &BTreeMap<String, Asset>,
) -> Result<Resolution, ResolveError> {
    if escapes_root(identifier) {
        return Err(ResolveError::OutsideRoot(identifier.to_string()));
    }

    let names = match &request.include {
        Some(include) => expand(include, assets)?,
        None => vec![identifier.to_string()],
    };

    if names.is_empty() {
        return Err(ResolveError::NoAssetsDefined(identifier.to_string()));
    }

    let files = names
        .iter()
        .map(|name| lookup(name, assets, Some(&settings.plugins)))
        .collect::<Result<Vec<_>, _>>()?;

    let dependencies = match &request.dependencies {
        Some(dependencies) => expand(dependencies, assets)?
            .iter()
            .map(|name| lookup(name, assets, None))
            .collect::<Result<Vec<_>, _>>()?,
        None => vec![],
    };

    let hash = fingerprint(files.iter().chain(&dependencies), &settings.options);
    let (output, file) = output_paths(identifier, &hash, &settings.options);

    Ok(Resolution {
        output,
        file,
        assets: files,
        dependencies,
    })
}
