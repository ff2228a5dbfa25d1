//! Process-scoped accelerator session manager.
//!
//! The physical accelerator is a single resource and concurrent independent
//! initializations race destructively, so exactly one manager owns the
//! virtual device for the process lifetime. Every cache mutation and lookup
//! goes through one mutex; the sessions handed out may run concurrently.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing::{debug, info};

use crate::{
    driver::{ConfiguredGraph, InferenceGraph, TensorShape, VirtualDevice},
    error::AccelError,
};

/// A loaded graph paired with its configured execution resources.
pub struct Session {
    pub graph: Arc<dyn InferenceGraph>,
    pub configured: Arc<dyn ConfiguredGraph>,
    pub input_shape: TensorShape,
}

impl Session {
    pub fn frame_size(&self) -> usize {
        self.input_shape.frame_size()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("input_shape", &self.input_shape)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Inner {
    device: Option<Box<dyn VirtualDevice>>,
    default_session: Option<Arc<Session>>,
    cache: HashMap<PathBuf, Arc<Session>>,
}

#[derive(Default)]
pub struct SessionManager {
    inner: Mutex<Inner>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the virtual device and load the default graph. Idempotent:
    /// a second call returns without touching the device.
    pub fn init<F>(&self, graph_path: &Path, create_device: F) -> Result<(), AccelError>
    where
        F: FnOnce() -> Result<Box<dyn VirtualDevice>, AccelError>,
    {
        let mut inner = self.inner.lock().expect("session manager mutex poisoned");
        if inner.default_session.is_some() {
            return Ok(());
        }

        let device = create_device()?;
        let session = load_session(device.as_ref(), graph_path)?;
        info!(
            graph = %graph_path.display(),
            height = session.input_shape.height,
            width = session.input_shape.width,
            channels = session.input_shape.channels,
            "accelerator initialized"
        );
        inner.cache.insert(graph_path.to_path_buf(), session.clone());
        inner.default_session = Some(session);
        inner.device = Some(device);
        Ok(())
    }

    /// Return the cached session for `graph_path`, loading and caching one
    /// on first use. The cache keeps sessions alive for the process.
    pub fn get_or_create(&self, graph_path: &Path) -> Result<Arc<Session>, AccelError> {
        let mut inner = self.inner.lock().expect("session manager mutex poisoned");
        if let Some(session) = inner.cache.get(graph_path) {
            return Ok(session.clone());
        }
        let device = inner.device.as_ref().ok_or(AccelError::NotInitialized)?;
        let session = load_session(device.as_ref(), graph_path)?;
        debug!(graph = %graph_path.display(), "loaded extra inference graph");
        inner.cache.insert(graph_path.to_path_buf(), session.clone());
        Ok(session)
    }

    pub fn default_session(&self) -> Result<Arc<Session>, AccelError> {
        self.inner
            .lock()
            .expect("session manager mutex poisoned")
            .default_session
            .clone()
            .ok_or(AccelError::NotInitialized)
    }

    pub fn default_shape(&self) -> Result<TensorShape, AccelError> {
        self.default_session().map(|s| s.input_shape)
    }

    pub fn default_frame_size(&self) -> Result<usize, AccelError> {
        self.default_session().map(|s| s.frame_size())
    }

    /// Whether this node should serve low-light enhancement instead of
    /// detection. Read from the environment on every call so a wrapper
    /// script can decide per launch.
    pub fn is_lowlight_only(&self) -> bool {
        std::env::var("LOWLIGHT_ENHANCE").as_deref() == Ok("1")
    }

    /// Drop all cached sessions, then the virtual device.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock().expect("session manager mutex poisoned");
        inner.cache.clear();
        inner.default_session = None;
        inner.device = None;
        info!("accelerator sessions released");
    }
}

fn load_session(device: &dyn VirtualDevice, path: &Path) -> Result<Arc<Session>, AccelError> {
    let graph: Arc<dyn InferenceGraph> = Arc::from(device.load_graph(path)?);
    let configured = graph.configure(1)?;
    let input_shape = graph.input_shape();
    Ok(Arc::new(Session {
        graph,
        configured,
        input_shape,
    }))
}
