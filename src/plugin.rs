//! Compiler, compressor and tag formatter plugins.
//!
//! Plugins are plain closures registered on a [`Config`](crate::Config) by
//! file extension. The manager only orchestrates them: it decides which
//! plugin applies to which file and in what order they run.

#[cfg(feature = "grass")]
mod scss;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use crate::Options;

#[cfg(feature = "grass")]
pub use scss::sass;

/// Attributes rendered into a tag, in key order.
pub type Attributes = BTreeMap<String, String>;

pub(crate) type CompileFn = Arc<dyn Fn(&str, &Options) -> anyhow::Result<String> + Send + Sync>;
pub(crate) type CompressFn =
    Arc<dyn Fn(&str, &Options) -> anyhow::Result<Vec<u8>> + Send + Sync>;
pub(crate) type TagFn = Arc<dyn Fn(&str, &Options, &Attributes) -> String + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Compiler {
    pub(crate) source: String,
    pub(crate) output: String,
    pub(crate) func: CompileFn,
}

impl Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Compiler(.{} -> .{})", self.source, self.output)
    }
}

/// Registries owned by a manager.
#[derive(Clone, Default)]
pub(crate) struct Plugins {
    compilers: HashMap<String, Compiler>,
    /// Output extension -> source extensions able to produce it, in
    /// registration order.
    producers: HashMap<String, Vec<String>>,
    compressors: HashMap<String, CompressFn>,
    tags: HashMap<String, TagFn>,
}

fn normalize(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

impl Plugins {
    pub(crate) fn add_compiler(&mut self, source: &str, output: &str, func: CompileFn) {
        let source = normalize(source);
        let output = normalize(output);

        if let Some(old) = self.compilers.get(&source)
            && let Some(list) = self.producers.get_mut(&old.output)
        {
            list.retain(|ext| ext != &source);
        }

        let list = self.producers.entry(output.clone()).or_default();
        if !list.contains(&source) {
            list.push(source.clone());
        }

        self.compilers.insert(
            source.clone(),
            Compiler {
                source,
                output,
                func,
            },
        );
    }

    pub(crate) fn add_compressor(&mut self, ext: &str, func: CompressFn) {
        self.compressors.insert(normalize(ext), func);
    }

    pub(crate) fn add_tag(&mut self, ext: &str, func: TagFn) {
        self.tags.insert(normalize(ext), func);
    }

    pub(crate) fn compiler(&self, ext: &str) -> Option<&Compiler> {
        self.compilers.get(ext)
    }

    /// Compilers whose output has the extension `ext`.
    pub(crate) fn producers(&self, ext: &str) -> impl Iterator<Item = &Compiler> {
        self.producers
            .get(ext)
            .into_iter()
            .flatten()
            .filter_map(|source| self.compilers.get(source))
    }

    pub(crate) fn compressor(&self, ext: &str) -> Option<&CompressFn> {
        self.compressors.get(ext)
    }

    pub(crate) fn tag(&self, ext: &str) -> Option<&TagFn> {
        self.tags.get(ext)
    }
}

impl Debug for Plugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut compressors: Vec<_> = self.compressors.keys().collect();
        let mut tags: Vec<_> = self.tags.keys().collect();
        compressors.sort();
        tags.sort();

        f.debug_struct("Plugins")
            .field("compilers", &self.compilers.values().collect::<Vec<_>>())
            .field("compressors", &compressors)
            .field("tags", &tags)
            .finish()
    }
}
