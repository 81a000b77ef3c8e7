use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::assets::Assets;
use crate::core::HashAlgorithm;
use crate::error::ConfigError;
use crate::plugin::{Attributes, Plugins};

/// Options recognized by the manager.
///
/// Every field has a default, so a partial JSON or TOML document can be
/// deserialized into this struct by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Leading segment of every compiled filename, `{prefix}-{hash}-{name}`.
    pub asset_prefix: String,
    /// Digest used for file hashes and fingerprints.
    pub algorithm: HashAlgorithm,
    /// Number of hex characters kept in a fingerprint.
    pub hash_length: usize,
    /// URL path the asset root is served from.
    pub serve_prefix: String,
    /// External prefix (e.g. a CDN origin) prepended by [`Assets::url`].
    pub url_prefix: Option<String>,
    /// Run registered compressors on compiled output.
    pub compress: bool,
    /// Wrap compiled JavaScript in an immediately invoked function.
    pub wrap_javascript: bool,
    /// Tag every file of a bundle separately instead of concatenating them.
    pub separate_bundles: bool,
    /// Filename of the hash cache, stored in the asset root.
    pub manifest: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            asset_prefix: "asset".to_string(),
            algorithm: HashAlgorithm::Md5,
            hash_length: 32,
            serve_prefix: "/".to_string(),
            url_prefix: None,
            compress: false,
            wrap_javascript: false,
            separate_bundles: false,
            manifest: ".asset-manifest.json".to_string(),
        }
    }
}

impl Options {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let max = self.algorithm.hex_len();
        if self.hash_length == 0 || self.hash_length > max {
            return Err(ConfigError::HashLength {
                algorithm: self.algorithm,
                length: self.hash_length,
                max,
            });
        }

        if self.asset_prefix.is_empty() || self.asset_prefix.contains('/') {
            return Err(ConfigError::AssetPrefix(self.asset_prefix.clone()));
        }

        if self.manifest.is_empty() || self.manifest.contains(['/', '\\']) {
            return Err(ConfigError::Manifest(self.manifest.clone()));
        }

        Ok(())
    }
}

/// Immutable state shared by every clone of a manager and by compilations
/// running on the blocking pool.
#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) root: Utf8PathBuf,
    pub(crate) options: Options,
    pub(crate) plugins: Plugins,
}

/// A builder for an [`Assets`] manager.
///
/// ```rust,no_run
/// use fingerprint::Assets;
///
/// let assets = Assets::config("public")
///     .hash_length(8)
///     .compiler("less", "css", |text, _| Ok(text.to_uppercase()))
///     .finish()?;
/// # Ok::<(), fingerprint::ConfigError>(())
/// ```
#[derive(Debug)]
pub struct Config {
    root: Utf8PathBuf,
    options: Options,
    plugins: Plugins,
}

impl Config {
    pub(crate) fn new(root: impl AsRef<Utf8Path>) -> Self {
        let mut plugins = Plugins::default();
        plugins.add_tag("js", Arc::new(crate::tags::script));
        plugins.add_tag("css", Arc::new(crate::tags::stylesheet));

        Self {
            root: root.as_ref().to_path_buf(),
            options: Options::default(),
            plugins,
        }
    }

    /// Replaces all options at once.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn asset_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.asset_prefix = prefix.into();
        self
    }

    pub fn algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.options.algorithm = algorithm;
        self
    }

    pub fn hash_length(mut self, length: usize) -> Self {
        self.options.hash_length = length;
        self
    }

    pub fn serve_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.serve_prefix = prefix.into();
        self
    }

    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.url_prefix = Some(prefix.into());
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.options.compress = compress;
        self
    }

    pub fn wrap_javascript(mut self, wrap: bool) -> Self {
        self.options.wrap_javascript = wrap;
        self
    }

    pub fn separate_bundles(mut self, separate: bool) -> Self {
        self.options.separate_bundles = separate;
        self
    }

    pub fn manifest(mut self, filename: impl Into<String>) -> Self {
        self.options.manifest = filename.into();
        self
    }

    /// Registers a compiler turning `.{source}` files into `.{output}` text.
    ///
    /// Requests for `name.{output}` fall back to `name.{source}` when the
    /// former doesn't exist. Registering the same source extension twice
    /// replaces the earlier compiler.
    pub fn compiler<F>(mut self, source: &str, output: &str, func: F) -> Self
    where
        F: Fn(&str, &Options) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.plugins.add_compiler(source, output, Arc::new(func));
        self
    }

    /// Registers a compressor for compiled `.{ext}` outputs, used only when
    /// [`Options::compress`] is set.
    pub fn compressor<F>(mut self, ext: &str, func: F) -> Self
    where
        F: Fn(&str, &Options) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.plugins.add_compressor(ext, Arc::new(func));
        self
    }

    /// Registers a tag formatter for `.{ext}` outputs, replacing the default
    /// one for `js` and `css`.
    pub fn tag<F>(mut self, ext: &str, func: F) -> Self
    where
        F: Fn(&str, &Options, &Attributes) -> String + Send + Sync + 'static,
    {
        self.plugins.add_tag(ext, Arc::new(func));
        self
    }

    /// Validates the options, then indexes and hashes the asset root.
    pub fn finish(self) -> Result<Assets, ConfigError> {
        self.options.validate()?;

        let root = self
            .root
            .canonicalize_utf8()
            .map_err(|err| ConfigError::Root(self.root.clone(), err))?;

        if !root.is_dir() {
            return Err(ConfigError::NotDirectory(root));
        }

        let assets = Assets::new(Settings {
            root,
            options: self.options,
            plugins: self.plugins,
        });

        assets.reindex();

        Ok(assets)
    }
}
