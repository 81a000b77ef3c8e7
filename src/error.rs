use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::core::HashAlgorithm;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Hash length must be between 1 and {max} for {algorithm}, got {length}")]
    HashLength {
        algorithm: HashAlgorithm,
        length: usize,
        max: usize,
    },

    #[error("Asset prefix {0:?} must be non-empty and must not contain '/'")]
    AssetPrefix(String),

    #[error("Manifest filename {0:?} must be a plain, non-empty filename")]
    Manifest(String),

    #[error("Couldn't open the asset directory '{0}'.\n{1}")]
    Root(Utf8PathBuf, std::io::Error),

    #[error("Asset root '{0}' is not a directory")]
    NotDirectory(Utf8PathBuf),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No assets were defined for \"{0}\"")]
    NoAssetsDefined(String),

    #[error("No assets matched \"{0}\"")]
    NoMatches(String),

    #[error("The asset \"{name}\" could not be found{}", tried_note(.tried))]
    AssetNotFound { name: String, tried: Vec<String> },

    #[error("Invalid glob pattern \"{0}\".\n{1}")]
    Pattern(String, #[source] glob::PatternError),

    #[error("Unable to create an HTML tag for type \".{0}\"")]
    NoTagFormatter(String),

    #[error("The asset \"{0}\" points outside the asset directory")]
    OutsideRoot(String),
}

fn tried_note(tried: &[String]) -> String {
    if tried.is_empty() {
        String::new()
    } else {
        format!(" (also tried {})", tried.join(", "))
    }
}

/// Problems met while walking and hashing the asset directory. These never
/// abort indexing, they are reported as [`Event::Error`](crate::Event).
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't walk the asset directory.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't read metadata of '{0}'.\n{1}")]
    Metadata(Utf8PathBuf, std::io::Error),

    #[error("Couldn't hash '{0}'.\n{1}")]
    Hash(Utf8PathBuf, std::io::Error),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Couldn't read the manifest '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse the manifest '{0}'.\n{1}")]
    Parse(Utf8PathBuf, serde_json::Error),

    #[error("Couldn't serialize the manifest.\n{0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Couldn't write the manifest '{0}'.\n{1}")]
    Write(Utf8PathBuf, std::io::Error),
}

/// Failure of a single compilation. Every request waiting on the same output
/// receives a clone of the same error.
#[derive(Debug, Error, Clone)]
pub enum CompileError {
    #[error("Couldn't read '{file}' while compiling '{identifier}'.\n{source}")]
    Read {
        identifier: String,
        file: String,
        source: Arc<std::io::Error>,
    },

    #[error("Compiler failed on '{file}' while compiling '{identifier}'.\n{error}")]
    Compiler {
        identifier: String,
        file: String,
        error: Arc<anyhow::Error>,
    },

    #[error("Compressor failed while compiling '{identifier}'.\n{error}")]
    Compressor {
        identifier: String,
        error: Arc<anyhow::Error>,
    },

    #[error("Couldn't write '{path}'.\n{source}")]
    Write {
        path: Utf8PathBuf,
        source: Arc<std::io::Error>,
    },

    #[error("Compilation of '{0}' was interrupted")]
    Interrupted(String),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),
}
