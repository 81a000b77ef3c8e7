use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tokio::sync::{broadcast, oneshot};

use crate::config::{Config, Settings};
use crate::core::{Asset, Event, join_url, lock, mtime, to_key};
use crate::error::{CompileError, IndexError, ResolveError};
use crate::index::{self, Index};
use crate::manifest;
use crate::resolve::{self, ResolveOptions};

pub(crate) type Waiter = oneshot::Sender<Result<(), CompileError>>;

/// A resolved identifier waiting to be compiled on first request.
#[derive(Debug, Clone)]
pub struct PendingAsset {
    pub(crate) identifier: String,
    pub(crate) output: String,
    pub(crate) file: String,
    pub(crate) assets: Vec<Asset>,
    pub(crate) dependencies: Vec<Asset>,
    pub(crate) options: ResolveOptions,
}

impl PendingAsset {
    /// Normalized identifier, e.g. `styles/main.css`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Served path, e.g. `/styles/asset-1a2b3c-main.css`.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Files concatenated into the output, in order.
    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    /// Files that only contribute to the fingerprint.
    pub fn dependencies(&self) -> &[Asset] {
        &self.dependencies
    }
}

#[derive(Debug, Default)]
pub(crate) struct Pending {
    pub(crate) entries: HashMap<String, PendingAsset>,
    /// Served path -> identifier.
    pub(crate) outputs: HashMap<String, String>,
}

pub(crate) struct Shared {
    pub(crate) settings: Arc<Settings>,
    pub(crate) index: Mutex<Index>,
    pub(crate) pending: Mutex<Pending>,
    /// Served path -> requests waiting for its compilation to finish. A key
    /// is present exactly while that compilation runs.
    pub(crate) inflight: Mutex<HashMap<String, Vec<Waiter>>>,
    pub(crate) events: broadcast::Sender<Event>,
}

/// What [`Assets::refresh`] did with a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// Compiled output, the manifest, or a path outside the root.
    Ignored,
    /// A directory changed, everything was indexed again.
    Reindexed,
    /// The file was added or its hash recomputed.
    Updated(String),
    /// The file, or a directory of files, no longer exists.
    Removed(String),
}

/// The asset manager.
///
/// `Assets` is a cheap handle: clones share the same index, resolved entries
/// and in-flight compilations.
#[derive(Clone)]
pub struct Assets {
    pub(crate) shared: Arc<Shared>,
}

impl Assets {
    /// Starts configuring a manager for the directory `root`.
    pub fn config(root: impl AsRef<Utf8Path>) -> Config {
        Config::new(root)
    }

    pub(crate) fn new(settings: Settings) -> Self {
        let (events, _) = broadcast::channel(64);

        Self {
            shared: Arc::new(Shared {
                settings: Arc::new(settings),
                index: Mutex::new(Index::default()),
                pending: Mutex::new(Pending::default()),
                inflight: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.shared.settings.root
    }

    pub fn options(&self) -> &crate::Options {
        &self.shared.settings.options
    }

    /// Receives [`Event`]s emitted after the subscription was made.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// The current record for a source file.
    pub fn asset(&self, name: &str) -> Option<Asset> {
        lock(&self.shared.index)
            .assets
            .get(&name.to_lowercase())
            .cloned()
    }

    /// The memoized entry for an identifier, if it was resolved before.
    pub fn pending(&self, identifier: &str) -> Option<PendingAsset> {
        let identifier = resolve::normalize(identifier, &self.shared.settings.plugins);
        lock(&self.shared.pending).entries.get(&identifier).cloned()
    }

    pub(crate) fn pending_for_output(&self, output: &str) -> Option<PendingAsset> {
        let pending = lock(&self.shared.pending);
        let identifier = pending.outputs.get(output)?;
        pending.entries.get(identifier).cloned()
    }

    pub(crate) fn emit(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.shared.events.send(event);
    }

    pub(crate) fn report(&self, err: impl Display) {
        tracing::warn!("{err}");
        self.emit(Event::Error(err.to_string()));
    }

    /// Logs and emits a failed lookup of `identifier`, handing the error back.
    pub(crate) fn failed(&self, identifier: &str, err: ResolveError) -> ResolveError {
        tracing::error!(%identifier, "{err}");
        self.emit(Event::Error(err.to_string()));
        err
    }

    fn manifest_path(&self) -> Utf8PathBuf {
        self.root().join(&self.shared.settings.options.manifest)
    }

    /// Walks the root and rebuilds the index, reusing hashes from the
    /// manifest for files whose modification time didn't change.
    pub fn reindex(&self) {
        let settings = &self.shared.settings;
        let options = &settings.options;

        let (entries, errors) = index::walk(&settings.root);
        for err in errors {
            self.report(err);
        }

        let prefix = &options.asset_prefix;
        let (sources, compiled) = index::partition(entries, prefix, &options.manifest);

        let path = self.manifest_path();
        let cached = manifest::load(&path).unwrap_or_else(|err| {
            tracing::warn!("{err}");
            manifest::Manifest::new()
        });

        let rehashed = manifest::rehash(&settings.root, sources, &cached, options.algorithm);
        for err in rehashed.errors {
            self.report(err);
        }

        tracing::info!(
            assets = rehashed.assets.len(),
            compiled = compiled.len(),
            "indexed {}",
            settings.root
        );

        if rehashed.outdated
            && let Err(err) = manifest::save(&path, &rehashed.assets)
        {
            self.report(err);
        }

        let mut current = lock(&self.shared.index);
        current.assets = rehashed.assets;
        current.merge_compiled(compiled, &settings.root);
    }

    /// Brings the record for a single changed path up to date and persists
    /// the manifest. `path` may be absolute or relative to the root.
    pub fn refresh(&self, path: impl AsRef<Utf8Path>) -> Refresh {
        let settings = &self.shared.settings;
        let options = &settings.options;
        let path = path.as_ref();

        let relative = match path.is_absolute() {
            true => match path.strip_prefix(&settings.root) {
                Ok(relative) => relative,
                Err(_) => return Refresh::Ignored,
            },
            false => path,
        };

        let inside = relative
            .components()
            .all(|c| matches!(c, Utf8Component::Normal(_)));
        if !inside {
            return Refresh::Ignored;
        }

        let original = to_key(relative);
        let prefix = &options.asset_prefix;
        if original.is_empty() || index::is_ignored(prefix, &options.manifest, &original) {
            return Refresh::Ignored;
        }

        let absolute = settings.root.join(relative);
        let name = original.to_lowercase();

        let refresh = match fs::metadata(&absolute) {
            Ok(meta) if meta.is_dir() => {
                self.reindex();
                self.emit(Event::Change(name));
                return Refresh::Reindexed;
            }
            Ok(meta) => match options.algorithm.digest_file(&absolute) {
                Ok(hash) => {
                    let asset = Asset {
                        name: name.clone(),
                        mtime: mtime(&meta),
                        hash,
                        path: original,
                    };
                    lock(&self.shared.index).assets.insert(name.clone(), asset);
                    Refresh::Updated(name.clone())
                }
                Err(err) => {
                    self.report(IndexError::Hash(absolute, err));
                    return Refresh::Ignored;
                }
            },
            Err(_) => {
                let nested = format!("{name}/");
                lock(&self.shared.index)
                    .assets
                    .retain(|key, _| key != &name && !key.starts_with(&nested));
                Refresh::Removed(name.clone())
            }
        };

        let saved = manifest::save(&self.manifest_path(), &lock(&self.shared.index).assets);
        if let Err(err) = saved {
            self.report(err);
        }

        tracing::info!(%name, "asset changed");
        self.emit(Event::Change(name));

        refresh
    }

    /// Resolves an identifier to its fingerprinted output path.
    ///
    /// Calling this again for a known identifier merges the given options
    /// over the stored ones and resolves against the current index, so the
    /// path follows content changes picked up by [`Assets::refresh`].
    pub fn resolve(
        &self,
        identifier: &str,
        options: ResolveOptions,
    ) -> Result<String, ResolveError> {
        let settings = &self.shared.settings;
        let identifier = resolve::normalize(identifier, &settings.plugins);

        let request = match options.force {
            true => options,
            false => match lock(&self.shared.pending).entries.get(&identifier) {
                Some(previous) => options.merge_over(&previous.options),
                None => options,
            },
        };

        let resolution = {
            let index = lock(&self.shared.index);
            resolve::resolve(&identifier, &request, settings, &index.assets)
        }
        .map_err(|err| self.failed(&identifier, err))?;

        let stale = lock(&self.shared.index).take_stale(&identifier, &resolution.file);
        for file in stale {
            match fs::remove_file(settings.root.join(&file)) {
                Ok(()) => tracing::debug!(%file, "removed stale output"),
                Err(err) => tracing::debug!(%file, "couldn't remove stale output: {err}"),
            }
        }

        let entry = PendingAsset {
            identifier: identifier.clone(),
            output: resolution.output.clone(),
            file: resolution.file,
            assets: resolution.assets,
            dependencies: resolution.dependencies,
            options: ResolveOptions {
                force: false,
                ..request
            },
        };

        let mut pending = lock(&self.shared.pending);
        if let Some(old) = pending.entries.insert(identifier.clone(), entry)
            && old.output != resolution.output
        {
            pending.outputs.remove(&old.output);
        }
        pending.outputs.insert(resolution.output.clone(), identifier);

        Ok(resolution.output)
    }

    /// Like [`Assets::resolve`], with the external URL prefix applied. The
    /// prefix from `options` wins over the configured one.
    pub fn url(&self, identifier: &str, options: ResolveOptions) -> Result<String, ResolveError> {
        let prefix = options
            .url_prefix
            .clone()
            .or_else(|| self.shared.settings.options.url_prefix.clone());

        let path = self.resolve(identifier, options)?;

        Ok(match prefix {
            Some(prefix) => join_url([prefix.as_str(), path.as_str()]),
            None => path,
        })
    }
}

impl std::fmt::Debug for Assets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assets")
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    use super::*;
    use crate::HashAlgorithm;

    pub(crate) fn fixture(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, text) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
        dir
    }

    pub(crate) fn root(dir: &TempDir) -> &Utf8Path {
        Utf8Path::from_path(dir.path()).unwrap()
    }

    fn touch(path: impl AsRef<std::path::Path>, secs: u64) {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn jquery() -> TempDir {
        fixture(&[
            ("jquery.js", "window.jQuery = {};\n"),
            ("style.css", "body {}\n"),
        ])
    }

    #[test]
    fn test_resolve_jquery() {
        let dir = jquery();
        let assets = Assets::config(root(&dir))
            .algorithm(HashAlgorithm::Md5)
            .hash_length(6)
            .finish()
            .unwrap();

        assert_eq!(
            assets.resolve("jquery.js", ResolveOptions::new()).unwrap(),
            "/asset-82470a-jquery.js"
        );
        assert_eq!(
            assets.resolve("JQuery.js", ResolveOptions::new()).unwrap(),
            "/asset-82470a-jquery.js"
        );
    }

    #[test]
    fn test_index_writes_manifest() {
        let dir = jquery();
        Assets::config(root(&dir)).finish().unwrap();

        let cached = manifest::load(&root(&dir).join(".asset-manifest.json")).unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached["jquery.js"].hash, "9e973e7c932c7f421beab8c3ef2d4c06");
    }

    #[test]
    fn test_manifest_hit_reuses_hash() {
        let dir = jquery();
        touch(dir.path().join("jquery.js"), 1_000);

        let manifest = serde_json::json!({
            "jquery.js": { "name": "jquery.js", "modificationTime": 1_000_000, "hash": "0123" }
        });
        let path = dir.path().join(".asset-manifest.json");
        fs::write(path, manifest.to_string()).unwrap();

        let assets = Assets::config(root(&dir)).finish().unwrap();
        assert_eq!(assets.asset("jquery.js").unwrap().hash, "0123");

        touch(dir.path().join("jquery.js"), 2_000);
        let assets = Assets::config(root(&dir)).finish().unwrap();
        assert_eq!(
            assets.asset("jquery.js").unwrap().hash,
            "9e973e7c932c7f421beab8c3ef2d4c06"
        );
    }

    #[test]
    fn test_corrupt_manifest_is_ignored() {
        let dir = jquery();
        fs::write(dir.path().join(".asset-manifest.json"), "][").unwrap();

        let assets = Assets::config(root(&dir)).finish().unwrap();
        assert!(assets.asset("jquery.js").is_some());
        assert!(assets.asset(".asset-manifest.json").is_none());
    }

    #[test]
    fn test_mtime_change_keeps_path() {
        let dir = jquery();
        let assets = Assets::config(root(&dir)).finish().unwrap();
        let before = assets.resolve("jquery.js", ResolveOptions::new()).unwrap();

        touch(dir.path().join("jquery.js"), 5_000);
        assets.refresh("jquery.js");

        let after = assets.resolve("jquery.js", ResolveOptions::new()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_content_change_changes_path() {
        let dir = jquery();
        let assets = Assets::config(root(&dir)).finish().unwrap();
        let before = assets.resolve("jquery.js", ResolveOptions::new()).unwrap();

        fs::write(dir.path().join("jquery.js"), "window.jQuery = null;\n").unwrap();
        assert_eq!(
            assets.refresh(root(&dir).join("jquery.js")),
            Refresh::Updated("jquery.js".into())
        );

        let after = assets.resolve("jquery.js", ResolveOptions::new()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_bundle_include_glob() {
        let dir = fixture(&[("b.js", "b"), ("a.js", "a"), ("c.css", "c")]);
        let assets = Assets::config(root(&dir)).finish().unwrap();

        let options = ResolveOptions::new().include(["a.js", "*.js"]);
        let path = assets.resolve("bundle.js", options).unwrap();

        let pending = assets.pending("bundle.js").unwrap();
        let names: Vec<_> = pending.assets().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a.js", "b.js"]);
        assert_eq!(pending.output(), path);
        assert!(path.ends_with("-bundle.js"));
    }

    #[test]
    fn test_repeated_resolve_merges_options() {
        let dir = fixture(&[("a.js", "a"), ("b.js", "b"), ("dep.txt", "d")]);
        let assets = Assets::config(root(&dir)).finish().unwrap();

        let first = assets
            .resolve("all.js", ResolveOptions::new().include(["*.js"]))
            .unwrap();
        let second = assets
            .resolve("all.js", ResolveOptions::new().dependencies(["dep.txt"]))
            .unwrap();
        let third = assets.resolve("all.js", ResolveOptions::new()).unwrap();

        assert_ne!(first, second);
        assert_eq!(second, third);

        let pending = assets.pending("all.js").unwrap();
        assert_eq!(pending.assets().len(), 2);
        assert_eq!(pending.dependencies().len(), 1);
        assert!(assets.pending_for_output(&first).is_none());
        assert!(assets.pending_for_output(&third).is_some());
    }

    #[test]
    fn test_force_replaces_options() {
        let dir = fixture(&[("a.js", "a"), ("b.js", "b")]);
        let assets = Assets::config(root(&dir)).finish().unwrap();

        assets
            .resolve("all.js", ResolveOptions::new().include(["a.js", "b.js"]))
            .unwrap();
        assets
            .resolve("all.js", ResolveOptions::new().include(["b.js"]).force())
            .unwrap();

        let pending = assets.pending("all.js").unwrap();
        assert_eq!(pending.assets().len(), 1);
    }

    #[test]
    fn test_missing_asset() {
        let dir = jquery();
        let assets = Assets::config(root(&dir))
            .compiler("less", "css", |text, _| Ok(text.to_string()))
            .finish()
            .unwrap();

        let mut events = assets.subscribe();

        let err = assets.resolve("foo.css", ResolveOptions::new()).unwrap_err();
        match &err {
            ResolveError::AssetNotFound { name, .. } => assert_eq!(name, "foo.css"),
            other => panic!("expected a missing asset, got {other:?}"),
        }
        assert!(err.to_string().contains("could not be found"));
        assert_eq!(events.try_recv().unwrap(), Event::Error(err.to_string()));
    }

    #[test]
    fn test_compiler_fallback_and_remap() {
        let dir = fixture(&[("foo.less", "@a: 1;")]);
        let assets = Assets::config(root(&dir))
            .compiler("less", "css", |text, _| Ok(text.to_string()))
            .finish()
            .unwrap();

        let css = assets.resolve("foo.css", ResolveOptions::new()).unwrap();
        let less = assets.resolve("foo.less", ResolveOptions::new()).unwrap();

        assert!(css.ends_with("-foo.css"));
        assert_eq!(css, less);
    }

    #[test]
    fn test_stale_outputs_are_removed() {
        let dir = fixture(&[
            ("jquery.js", "window.jQuery = {};\n"),
            ("asset-deadbe-jquery.js", "old"),
            ("asset-82470a-jquery.js", "current"),
        ]);
        let assets = Assets::config(root(&dir)).hash_length(6).finish().unwrap();
        assert!(assets.asset("asset-deadbe-jquery.js").is_none());

        assets.resolve("jquery.js", ResolveOptions::new()).unwrap();

        assert!(!dir.path().join("asset-deadbe-jquery.js").exists());
        assert!(dir.path().join("asset-82470a-jquery.js").exists());
    }

    #[test]
    fn test_url_prefix() {
        let dir = jquery();
        let assets = Assets::config(root(&dir))
            .hash_length(6)
            .url_prefix("https://cdn.example.com/")
            .finish()
            .unwrap();

        assert_eq!(
            assets.url("jquery.js", ResolveOptions::new()).unwrap(),
            "https://cdn.example.com/asset-82470a-jquery.js"
        );
        let local = ResolveOptions::new().url_prefix("//static.local");
        assert_eq!(
            assets.url("jquery.js", local).unwrap(),
            "//static.local/asset-82470a-jquery.js"
        );
        assert_eq!(
            assets.resolve("jquery.js", ResolveOptions::new()).unwrap(),
            "/asset-82470a-jquery.js"
        );
    }

    #[test]
    fn test_refresh_added_and_removed() {
        let dir = jquery();
        let assets = Assets::config(root(&dir)).finish().unwrap();
        let mut events = assets.subscribe();

        fs::write(dir.path().join("New.js"), "new").unwrap();
        assert_eq!(assets.refresh("New.js"), Refresh::Updated("new.js".into()));
        assert_eq!(events.try_recv().unwrap(), Event::Change("new.js".into()));
        assert_eq!(assets.asset("new.js").unwrap().path, "New.js");

        fs::remove_file(dir.path().join("New.js")).unwrap();
        assert_eq!(assets.refresh("New.js"), Refresh::Removed("new.js".into()));
        assert!(assets.asset("new.js").is_none());

        let cached = manifest::load(&root(&dir).join(".asset-manifest.json")).unwrap();
        assert!(!cached.contains_key("new.js"));
    }

    #[test]
    fn test_refresh_ignores_outputs_and_manifest() {
        let dir = jquery();
        let assets = Assets::config(root(&dir)).finish().unwrap();

        assert_eq!(assets.refresh("asset-00ff-jquery.js"), Refresh::Ignored);
        assert_eq!(assets.refresh(".asset-manifest.json"), Refresh::Ignored);
        assert_eq!(assets.refresh("/somewhere/else.js"), Refresh::Ignored);
    }

    #[test]
    fn test_parent_paths_stay_outside() {
        let dir = fixture(&[("root/app.js", "app"), ("outside.js", "secret")]);
        let assets = Assets::config(root(&dir).join("root")).finish().unwrap();
        let mut events = assets.subscribe();

        assert_eq!(assets.refresh("../outside.js"), Refresh::Ignored);
        assert_eq!(assets.refresh("js/../../outside.js"), Refresh::Ignored);
        assert!(assets.asset("../outside.js").is_none());

        let err = assets
            .resolve("../outside.js", ResolveOptions::new())
            .unwrap_err();
        assert!(matches!(err, ResolveError::OutsideRoot(_)));
        assert_eq!(events.try_recv().unwrap(), Event::Error(err.to_string()));
    }

    #[test]
    fn test_unwritable_manifest_is_reported() {
        let dir = jquery();
        fs::create_dir(dir.path().join(".asset-manifest.json")).unwrap();

        let assets = Assets::config(root(&dir)).finish().unwrap();
        assert!(assets.asset("jquery.js").is_some());

        let mut events = assets.subscribe();
        assets.reindex();
        match events.try_recv().unwrap() {
            Event::Error(message) => assert!(message.contains("Couldn't write the manifest")),
            other => panic!("expected an error, got {other:?}"),
        }

        fs::write(dir.path().join("new.js"), "new").unwrap();
        assert_eq!(assets.refresh("new.js"), Refresh::Updated("new.js".into()));
        assert!(matches!(events.try_recv().unwrap(), Event::Error(_)));
        assert_eq!(events.try_recv().unwrap(), Event::Change("new.js".into()));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entry_is_reported() {
        let dir = jquery();
        let assets = Assets::config(root(&dir)).finish().unwrap();
        let mut events = assets.subscribe();

        let link = dir.path().join("dangling.js");
        std::os::unix::fs::symlink(dir.path().join("missing.js"), link).unwrap();
        assets.reindex();

        match events.try_recv().unwrap() {
            Event::Error(message) => assert!(message.contains("Couldn't read metadata")),
            other => panic!("expected an error, got {other:?}"),
        }
        assert!(assets.asset("jquery.js").is_some());
    }

    #[test]
    fn test_reindex_keeps_registered_outputs() {
        let dir = jquery();
        let assets = Assets::config(root(&dir)).hash_length(6).finish().unwrap();

        fs::write(dir.path().join("asset-82470a-jquery.js"), "current").unwrap();
        lock(&assets.shared.index).add_compiled("asset", "asset-82470a-jquery.js");
        lock(&assets.shared.index).add_compiled("asset", "asset-0000ff-jquery.js");
        assets.reindex();

        let index = lock(&assets.shared.index);
        let files = &index.compiled["jquery.js"];
        assert!(files.contains("asset-82470a-jquery.js"));
        assert!(!files.contains("asset-0000ff-jquery.js"));
    }

    #[test]
    fn test_refresh_directory() {
        let dir = jquery();
        let assets = Assets::config(root(&dir)).finish().unwrap();

        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/a.js"), "a").unwrap();
        fs::write(dir.path().join("lib/b.js"), "b").unwrap();

        assert_eq!(assets.refresh("lib"), Refresh::Reindexed);
        assert!(assets.asset("lib/a.js").is_some());

        fs::remove_dir_all(dir.path().join("lib")).unwrap();
        assert_eq!(assets.refresh("lib"), Refresh::Removed("lib".into()));
        assert!(assets.asset("lib/b.js").is_none());
        assert!(assets.asset("jquery.js").is_some());
    }
}
