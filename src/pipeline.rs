//! Compilation of a resolved asset into its output file.
//!
//! Constituent files are read in order, each passed through the compiler
//! registered for its extension, and concatenated without a separator. The
//! result is optionally wrapped and compressed, then written next to the
//! sources under its fingerprinted name.
//!
//! Files without a compiler are copied byte for byte, so binary assets such
//! as images pass through untouched. Only compilers and compressors see the
//! data as UTF-8 text.

use std::fs;
use std::io;
use std::sync::Arc;

use camino::Utf8Path;

use crate::assets::PendingAsset;
use crate::config::Settings;
use crate::core::{Asset, extension};
use crate::error::CompileError;

/// Runs every stage for `pending` and returns the bytes to write.
pub(crate) fn compile(
    settings: &Settings,
    pending: &PendingAsset,
) -> Result<Vec<u8>, CompileError> {
    let options = &settings.options;
    let mut code = Vec::new();

    for asset in &pending.assets {
        let data = read(settings, pending, asset)?;

        let compiler = extension(&asset.name).and_then(|ext| settings.plugins.compiler(ext));
        let Some(compiler) = compiler else {
            code.extend_from_slice(&data);
            continue;
        };

        let text = String::from_utf8(data).map_err(|err| CompileError::Read {
            identifier: pending.identifier.clone(),
            file: asset.name.clone(),
            source: Arc::new(io::Error::new(io::ErrorKind::InvalidData, err)),
        })?;

        let compiled = (compiler.func)(&text, options).map_err(|err| CompileError::Compiler {
            identifier: pending.identifier.clone(),
            file: asset.name.clone(),
            error: Arc::new(err),
        })?;

        code.extend_from_slice(compiled.as_bytes());
    }

    let ext = extension(&pending.identifier);

    if ext == Some("js") && options.wrap_javascript {
        code = wrap(&code);
    }

    if options.compress
        && let Some(compressor) = ext.and_then(|ext| settings.plugins.compressor(ext))
    {
        let error = |err| CompileError::Compressor {
            identifier: pending.identifier.clone(),
            error: Arc::new(err),
        };

        let text = std::str::from_utf8(&code).map_err(|err| error(anyhow::Error::new(err)))?;
        return compressor(text, options).map_err(error);
    }

    Ok(code)
}

fn read(
    settings: &Settings,
    pending: &PendingAsset,
    asset: &Asset,
) -> Result<Vec<u8>, CompileError> {
    fs::read(settings.root.join(&asset.path)).map_err(|err| CompileError::Read {
        identifier: pending.identifier.clone(),
        file: asset.name.clone(),
        source: Arc::new(err),
    })
}

fn wrap(code: &[u8]) -> Vec<u8> {
    let mut wrapped = Vec::with_capacity(code.len() + 32);
    wrapped.extend_from_slice(b"(function() {\n");
    wrapped.extend_from_slice(code);
    wrapped.extend_from_slice(b"\n}).call(this);\n");
    wrapped
}

/// Writes `data` to `path` through a sibling temporary file, so a reader
/// never observes a partially written output.
pub(crate) fn write(path: &Utf8Path, data: &[u8]) -> Result<(), CompileError> {
    let error = |err| CompileError::Write {
        path: path.to_path_buf(),
        source: Arc::new(err),
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(error)?;
    }

    // The temporary name keeps the fingerprinted prefix, so the indexer and
    // the watcher both recognize it as compiled output.
    let temp = path.with_file_name(format!("{}.tmp", path.file_name().unwrap_or_default()));

    if let Err(err) = fs::write(&temp, data).and_then(|()| fs::rename(&temp, path)) {
        let _ = fs::remove_file(&temp);
        return Err(error(err));
    }

    Ok(())
}
