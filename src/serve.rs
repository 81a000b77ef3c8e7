//! Compile-on-first-request serving.
//!
//! Concurrent requests for the same output share one compilation: the first
//! request starts it and registers itself, later requests only register, and
//! every registered request is released with the same result once it ends.

use std::time::Instant;

use camino::Utf8PathBuf;
use tokio::sync::oneshot;

use crate::assets::{Assets, PendingAsset};
use crate::core::{Event, lock};
use crate::error::CompileError;
use crate::pipeline;

impl Assets {
    /// Serves a request path such as `/js/asset-1a2b3c-app.js?v=2`.
    ///
    /// Returns `Ok(None)` for paths that no call to [`Assets::resolve`]
    /// produced, so the caller can pass the request on. Otherwise returns
    /// the file on disk once it exists, compiling it first if needed.
    pub async fn serve(&self, request: &str) -> Result<Option<Utf8PathBuf>, CompileError> {
        let path = request.split(['?', '#']).next().unwrap_or_default();

        let Some(pending) = self.pending_for_output(path) else {
            return Ok(None);
        };

        let output = pending.output.clone();
        let file = self.root().join(&pending.file);

        let receiver = {
            let mut inflight = lock(&self.shared.inflight);
            let (sender, receiver) = oneshot::channel();

            match inflight.get_mut(&output) {
                Some(waiters) => {
                    tracing::debug!(%output, "waiting for compilation in progress");
                    waiters.push(sender);
                }
                None => {
                    if file.is_file() {
                        return Ok(Some(file));
                    }

                    inflight.insert(output.clone(), vec![sender]);
                    tokio::spawn(self.clone().compile_and_release(pending));
                }
            }

            receiver
        };

        match receiver.await {
            Ok(result) => result.map(|()| Some(file)),
            Err(_) => Err(CompileError::Interrupted(output)),
        }
    }

    async fn compile_and_release(self, pending: PendingAsset) {
        let settings = self.shared.settings.clone();
        let output = pending.output.clone();
        let file = pending.file.clone();
        let span = tracing::info_span!("compile", identifier = %pending.identifier);

        let result = tokio::task::spawn_blocking(move || -> Result<(), CompileError> {
            let _enter = span.enter();
            let start = Instant::now();

            let data = pipeline::compile(&settings, &pending)?;
            pipeline::write(&settings.root.join(&pending.file), &data)?;

            tracing::info!("compiled {} in {:.2?}", pending.output, start.elapsed());
            Ok(())
        })
        .await
        .unwrap_or_else(|err| {
            tracing::error!(%output, "compilation task failed: {err}");
            Err(CompileError::Interrupted(output.clone()))
        });

        match &result {
            Ok(()) => {
                let prefix = &self.shared.settings.options.asset_prefix;
                lock(&self.shared.index).add_compiled(prefix, &file);
            }
            Err(err) => {
                tracing::error!("{err}");
                self.emit(Event::Error(err.to_string()));
            }
        }

        let mut inflight = lock(&self.shared.inflight);
        for waiter in inflight.remove(&output).unwrap_or_default() {
            // The request may have been dropped meanwhile.
            let _ = waiter.send(result.clone());
        }
    }
}
