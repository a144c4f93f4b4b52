//! Cog loader - compiles, constructs, attaches and detaches cogs
//!
//! The loader keeps a cache of compiled modules per cog. `load` builds from
//! the cache (compiling on a miss), `reload_source` replaces the cache entry
//! with freshly compiled code, and `restore_module` puts an older module back
//! for rollback. Hooks run on their own task under a timeout so a panicking
//! or hung cog surfaces as an error value instead of taking the host down.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::application::errors::{LoadError, LoadPhase, ReloadSourceError, UnloadError};
use crate::domain::entities::{CogId, CogTemplate};
use crate::plugins::host::{CogHost, Released};
use crate::plugins::trait_def::{Cog, CogModule, CogSource};

/// Shared handle to a live cog instance
pub type CogHandle = Arc<Mutex<Box<dyn Cog>>>;

/// An attached cog together with the module it was built from
#[derive(Clone)]
pub struct LiveCog {
    pub id: CogId,
    pub handle: CogHandle,
    pub module: Arc<dyn CogModule>,
    pub template: CogTemplate,
    /// Process-unique instance number, distinguishes rebuilt instances
    pub instance: u64,
    pub attached_at: DateTime<Utc>,
}

impl std::fmt::Debug for LiveCog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCog")
            .field("id", &self.id)
            .field("template", &self.template.name)
            .field("instance", &self.instance)
            .finish()
    }
}

/// Loader for cogs registered by source
pub struct CogLoader {
    host: Arc<CogHost>,
    sources: RwLock<HashMap<CogId, Arc<dyn CogSource>>>,
    modules: RwLock<HashMap<CogId, Arc<dyn CogModule>>>,
    hook_timeout: Duration,
    next_instance: AtomicU64,
}

impl CogLoader {
    pub fn new(host: Arc<CogHost>, hook_timeout: Duration) -> Self {
        Self {
            host,
            sources: RwLock::new(HashMap::new()),
            modules: RwLock::new(HashMap::new()),
            hook_timeout,
            next_instance: AtomicU64::new(1),
        }
    }

    pub fn host(&self) -> &Arc<CogHost> {
        &self.host
    }

    pub fn hook_timeout(&self) -> Duration {
        self.hook_timeout
    }

    /// Set (or replace) where a cog's code comes from
    pub fn register_source(&self, id: CogId, source: Arc<dyn CogSource>) {
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, source);
    }

    /// Drop the source and cached module of a cog removed from configuration
    pub fn forget(&self, id: &CogId) {
        self.sources.write().unwrap_or_else(|e| e.into_inner()).remove(id);
        self.evict(id);
    }

    pub fn origin(&self, id: &CogId) -> Option<String> {
        self.source(id).map(|s| s.origin())
    }

    /// Template of a cog's current code, compiling it if nothing is cached yet
    pub fn peek_template(&self, id: &CogId) -> Option<CogTemplate> {
        match self.module_for(id) {
            Ok(module) => Some(module.template()),
            Err(e) => {
                tracing::warn!(cog = %id, error = %e, "Could not read cog template");
                None
            }
        }
    }

    pub fn cached_module(&self, id: &CogId) -> Option<Arc<dyn CogModule>> {
        self.modules.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    /// Drop the cached module so the next `load` compiles from the origin
    pub fn evict(&self, id: &CogId) {
        self.modules.write().unwrap_or_else(|e| e.into_inner()).remove(id);
    }

    /// Put a previously working module back in the cache
    pub fn restore_module(&self, id: &CogId, module: Arc<dyn CogModule>) {
        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), module);
    }

    /// Re-read a cog's code from its origin so the next `load` uses it
    ///
    /// On failure the cache is left as it was.
    pub fn reload_source(&self, id: &CogId) -> Result<(), ReloadSourceError> {
        let source = self.source(id).ok_or_else(|| ReloadSourceError {
            id: id.clone(),
            origin: "<unregistered>".to_string(),
            cause: "no source registered for this cog".to_string(),
        })?;

        let module = compile(source.as_ref()).map_err(|cause| ReloadSourceError {
            id: id.clone(),
            origin: source.origin(),
            cause,
        })?;

        tracing::debug!(cog = %id, origin = %source.origin(), "Recompiled cog source");
        self.restore_module(id, module);
        Ok(())
    }

    /// Build and attach a new instance from the cached (or freshly compiled) module
    pub async fn load(&self, id: &CogId) -> Result<LiveCog, LoadError> {
        let module = self.module_for(id)?;
        let template = module.template();

        let instance = catch_unwind(AssertUnwindSafe(|| module.construct()))
            .map_err(panic_message)
            .and_then(|r| r)
            .map_err(|cause| {
                LoadError::new(id.clone(), LoadPhase::Construction, cause)
                    .with_context(format!("constructing `{}` v{}", template.name, template.version))
            })?;

        let live = LiveCog {
            id: id.clone(),
            handle: Arc::new(Mutex::new(instance)),
            module,
            template,
            instance: self.next_instance.fetch_add(1, Ordering::SeqCst),
            attached_at: Utc::now(),
        };
        self.attach(&live).await?;
        Ok(live)
    }

    /// Run the setup hook of an existing instance again (used for rollback)
    pub async fn reattach(&self, live: &LiveCog) -> Result<LiveCog, LoadError> {
        self.attach(live).await?;
        let mut live = live.clone();
        live.attached_at = Utc::now();
        Ok(live)
    }

    /// Run the teardown hook, then release everything the cog registered
    ///
    /// Registrations are released even when teardown fails or times out.
    pub async fn unload(&self, live: &LiveCog) -> Result<Released, UnloadError> {
        let handle = Arc::clone(&live.handle);
        let mut task = tokio::spawn(async move {
            let mut cog = handle.lock().await;
            cog.teardown().await
        });

        let outcome = match tokio::time::timeout(self.hook_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(cause))) => Err(cause),
            Ok(Err(join)) => Err(join_failure(join)),
            Err(_) => {
                // A hung hook must not keep the instance locked
                task.abort();
                Err(format!("teardown hook did not finish within {:?}", self.hook_timeout))
            }
        };

        let released = self.host.release(&live.id);
        match outcome {
            Ok(()) => Ok(released),
            Err(cause) => Err(UnloadError {
                id: live.id.clone(),
                cause,
            }),
        }
    }

    async fn attach(&self, live: &LiveCog) -> Result<(), LoadError> {
        let registrar = self.host.registrar(live.id.clone());
        let revoked = registrar.revocation();
        let handle = Arc::clone(&live.handle);
        let mut task = tokio::spawn(async move {
            let mut registrar = registrar;
            let mut cog = handle.lock().await;
            cog.setup(&mut registrar).await
        });

        let outcome = match tokio::time::timeout(self.hook_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => return Ok(()),
            Ok(Ok(Err(cause))) => cause,
            Ok(Err(join)) => join_failure(join),
            Err(_) => {
                task.abort();
                format!("setup hook did not finish within {:?}", self.hook_timeout)
            }
        };

        // Whatever the hook managed to register before failing goes away with it
        revoked.store(true, Ordering::SeqCst);
        self.host.release(&live.id);

        Err(LoadError::new(live.id.clone(), LoadPhase::SetupHook, outcome)
            .with_context(format!("attaching `{}` (instance #{})", live.template.name, live.instance)))
    }

    fn source(&self, id: &CogId) -> Option<Arc<dyn CogSource>> {
        self.sources.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    fn module_for(&self, id: &CogId) -> Result<Arc<dyn CogModule>, LoadError> {
        if let Some(module) = self.cached_module(id) {
            return Ok(module);
        }

        let source = self.source(id).ok_or_else(|| {
            LoadError::new(id.clone(), LoadPhase::Import, "no source registered for this cog")
        })?;
        let module = compile(source.as_ref()).map_err(|cause| {
            LoadError::new(id.clone(), LoadPhase::Import, cause)
                .with_context(format!("compiling {}", source.origin()))
        })?;

        self.restore_module(id, Arc::clone(&module));
        Ok(module)
    }
}

fn compile(source: &dyn CogSource) -> Result<Arc<dyn CogModule>, String> {
    catch_unwind(AssertUnwindSafe(|| source.compile()))
        .map_err(panic_message)
        .and_then(|r| r)
}

fn join_failure(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        "hook task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("panicked: {}", message)
}
