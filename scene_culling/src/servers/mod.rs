//! Opaque server interfaces consumed by the culling subsystems.
//!
//! The rendering, physics and navigation backends are out of this crate's
//! hands: subsystems only see handles (`Rid`) and the narrow command sets
//! below. Servers are shared as `Arc<Mutex<dyn …>>` so the preview worker
//! thread can reach the rendering server too.

mod rid;
mod rendering;
mod physics;
mod navigation;
pub mod mock;

pub use rid::Rid;
pub use rendering::{RenderingServer, TextureRect};
pub use physics::{BodyMode, BodyParam, CollisionObjectHost, PhysicsServer};
pub use navigation::NavigationServer;

use std::sync::{Arc, Mutex, MutexGuard};
use crate::error::{Error, Result};

/// The three servers a subsystem talks to.
#[derive(Clone)]
pub struct ServerSet {
    pub rendering: Arc<Mutex<dyn RenderingServer>>,
    pub physics: Arc<Mutex<dyn PhysicsServer>>,
    pub navigation: Arc<Mutex<dyn NavigationServer>>,
}

impl ServerSet {
    pub fn new(
        rendering: Arc<Mutex<dyn RenderingServer>>,
        physics: Arc<Mutex<dyn PhysicsServer>>,
        navigation: Arc<Mutex<dyn NavigationServer>>,
    ) -> Self {
        Self { rendering, physics, navigation }
    }

    /// Server set backed by the recording mocks.
    pub fn mock() -> Self {
        Self::new(
            Arc::new(Mutex::new(mock::MockRenderingServer::new())),
            Arc::new(Mutex::new(mock::MockPhysicsServer::new())),
            Arc::new(Mutex::new(mock::MockNavigationServer::new())),
        )
    }
}

/// Lock a shared server, mapping poisoning to `Error::BackendError`.
pub(crate) fn lock<'a, T: ?Sized>(server: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>> {
    server
        .lock()
        .map_err(|_| Error::BackendError(format!("{} lock poisoned", name)))
}
