//! Process-scoped capture context

use std::sync::Arc;

use tracing::info;

use crate::backend::CaptureBackend;
use crate::error::{CaptureError, Result};

/// Brackets all use of a capture backend.
///
/// Create one per process at startup, before any directory or session, and
/// share the returned `Arc`. Every directory and session keeps a clone, so
/// [`CaptureBackend::shutdown`] runs exactly once, after the last of them is
/// dropped. A second `Platform` for the same backend is allowed only when
/// the backend's `initialize` is idempotent and its `shutdown` leaves the
/// subsystem usable (both hold for the bundled backends).
pub struct Platform<B: CaptureBackend> {
    backend: B,
}

impl<B: CaptureBackend> Platform<B> {
    pub fn init(backend: B) -> Result<Arc<Self>> {
        backend
            .initialize()
            .map_err(CaptureError::ServiceUnavailable)?;
        info!(backend = backend.name(), "Capture platform initialized");
        Ok(Arc::new(Self { backend }))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: CaptureBackend> Drop for Platform<B> {
    fn drop(&mut self) {
        self.backend.shutdown();
        info!(backend = self.backend.name(), "Capture platform shut down");
    }
}
