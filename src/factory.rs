//! Process-scoped context owning the engine, the handle registry and the set
//! of live sessions.
//!
//! Every operation takes a [`Factory`] explicitly. The exported entry points
//! use the process-wide instance from [`GlobalFactory`]; tests build their own.

use crate::capture::{NullCaptureBackend, VideoCaptureBackend};
use crate::codec::{CodecBackend, NullCodecBackend};
use crate::handle::{HandleId, HandleRegistry};
use crate::result::{Error, Result};
use crate::RUNTIME;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::interceptor::registry::Registry;

/// External collaborators used by sessions.
#[derive(Clone)]
pub struct Backends {
    pub capture: Arc<dyn VideoCaptureBackend>,
    pub codecs: Arc<dyn CodecBackend>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            capture: Arc::new(NullCaptureBackend),
            codecs: Arc::new(NullCodecBackend),
        }
    }
}

/// Engine context shared by all sessions it creates.
pub struct Factory {
    api: API,
    runtime: Handle,
    registry: HandleRegistry,
    backends: Backends,
    sessions: Mutex<HashSet<HandleId>>,
    shut_down: AtomicBool,
}

impl Factory {
    /// Create a factory with its own engine API.
    ///
    /// # Arguments
    /// * `backends` - Capture and codec collaborators
    pub fn new(backends: Backends) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        log::info!("peer connection factory created");
        Ok(Arc::new(Self {
            api,
            runtime: RUNTIME.handle().clone(),
            registry: HandleRegistry::new(),
            backends,
            sessions: Mutex::new(HashSet::new()),
            shut_down: AtomicBool::new(false),
        }))
    }

    pub fn api(&self) -> &API {
        &self.api
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Run a future to completion from synchronous code.
    ///
    /// Works both from host threads and from callbacks running on the
    /// factory's own worker threads.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        match Handle::try_current() {
            Ok(current) => tokio::task::block_in_place(|| current.block_on(future)),
            Err(_) => self.runtime.block_on(future),
        }
    }

    pub fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::InvalidOperation("factory has been shut down".into()));
        }
        Ok(())
    }

    pub(crate) fn add_session(&self, handle: HandleId) {
        self.sessions.lock().insert(handle);
    }

    pub(crate) fn remove_session(&self, handle: HandleId) -> bool {
        self.sessions.lock().remove(&handle)
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Number of live handles of any kind.
    pub fn live_object_count(&self) -> usize {
        self.registry.len()
    }

    /// Log every live object. Returns how many there are.
    pub fn report_live_objects(&self) -> usize {
        let live = self.registry.live_objects();
        for obj in &live {
            log::info!("live object {} #{} (refs: {})", obj.type_name, obj.handle, obj.refs);
        }
        live.len()
    }

    /// Stop the factory. Fails while any session is still alive.
    pub fn shutdown(&self) -> Result<()> {
        let sessions = self.sessions.lock();
        if !sessions.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "{} session(s) still alive",
                sessions.len()
            )));
        }
        self.shut_down.store(true, Ordering::SeqCst);
        log::info!("peer connection factory shut down");
        Ok(())
    }
}

lazy_static! {
    static ref GLOBAL: Mutex<GlobalState> = Mutex::new(GlobalState::default());
}

#[derive(Default)]
struct GlobalState {
    factory: Option<Arc<Factory>>,
    backends: Option<Backends>,
}

/// Process-wide factory used by the exported entry points.
pub struct GlobalFactory;

impl GlobalFactory {
    /// Get the process factory, creating it on first use.
    pub fn instance() -> Result<Arc<Factory>> {
        let mut global = GLOBAL.lock();
        if let Some(factory) = &global.factory {
            return Ok(factory.clone());
        }
        let backends = global.backends.clone().unwrap_or_default();
        let factory = Factory::new(backends).map_err(|e| {
            log::error!("failed to create peer connection factory: {}", e);
            Error::Unknown(format!("factory construction failed: {}", e))
        })?;
        global.factory = Some(factory.clone());
        Ok(factory)
    }

    /// Get the process factory only if it already exists.
    pub fn try_get() -> Option<Arc<Factory>> {
        GLOBAL.lock().factory.clone()
    }

    /// Set the collaborators used when the process factory is created.
    ///
    /// Must be called before the first session is created.
    pub fn install_backends(backends: Backends) -> Result<()> {
        let mut global = GLOBAL.lock();
        if global.factory.is_some() {
            return Err(Error::InvalidOperation("factory already created".into()));
        }
        global.backends = Some(backends);
        Ok(())
    }

    /// Shut down and forget the process factory. A later call to
    /// [`GlobalFactory::instance`] creates a fresh one.
    pub fn shutdown() -> Result<()> {
        let mut global = GLOBAL.lock();
        if let Some(factory) = &global.factory {
            factory.shutdown()?;
        }
        global.factory = None;
        Ok(())
    }
}
