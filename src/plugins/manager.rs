//! Cog manager - drives load, unload and reload of configured cogs
//!
//! The manager owns the registry and is the only writer to it. Every
//! operation takes a per-cog guard, works on a copy of the record and commits
//! once at the end, so listings never show a half-finished swap. A reload that
//! fails puts the last good code back; only if that also fails does the cog
//! end up `Failed`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::application::errors::{CogError, LoadError, UnloadError};
use crate::domain::entities::{CogId, CogState, CogStatus, CogTemplate, FailureReport, Operation};
use crate::domain::traits::ReportSink;
use crate::plugins::host::{CogHost, Released};
use crate::plugins::loader::{CogLoader, LiveCog};
use crate::plugins::registry::{CogRecord, CogRegistry};
use crate::plugins::resolver::{FuzzyResolver, Resolution, ResolverConfig};
use crate::plugins::trait_def::CogSource;

/// A cog as configuration describes it
#[derive(Clone)]
pub struct CogDefinition {
    pub id: CogId,
    pub enabled: bool,
    pub protected: bool,
    pub source: Arc<dyn CogSource>,
}

impl CogDefinition {
    pub fn new(id: CogId, source: Arc<dyn CogSource>) -> Self {
        Self {
            id,
            enabled: true,
            protected: false,
            source,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }
}

impl std::fmt::Debug for CogDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CogDefinition")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .field("protected", &self.protected)
            .field("origin", &self.source.origin())
            .finish()
    }
}

/// Lifecycle notifications for anything that caches the command surface
#[derive(Debug, Clone, PartialEq)]
pub enum CogEvent {
    Added(CogId),
    Removed(CogId),
    Loaded(CogId),
    Unloaded(CogId),
    Reloaded(CogId),
    RolledBack { id: CogId, reason: String },
    Failed { id: CogId, reason: String },
}

/// How a reload ended
#[derive(Debug, Clone)]
pub enum ReloadOutcome {
    Success,
    /// New code failed; the previous code is running again
    RolledBack { reason: LoadError },
    /// New code failed and so did the previous code; the cog is `Failed`
    Failed { reason: LoadError, rollback: LoadError },
}

/// Record of one reload, handed back to the caller and to the report sink
#[derive(Debug, Clone)]
pub struct ReloadAttempt {
    pub id: CogId,
    /// Template of the instance that was running when the reload started
    pub started_from: CogTemplate,
    pub outcome: ReloadOutcome,
    /// Teardown of the old instance failed; its registrations were released anyway
    pub teardown_error: Option<UnloadError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReloadAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ReloadOutcome::Success)
    }

    /// Success with nothing worth reporting
    pub fn is_clean(&self) -> bool {
        self.is_success() && self.teardown_error.is_none()
    }

    pub fn final_state(&self) -> CogState {
        match self.outcome {
            ReloadOutcome::Failed { .. } => CogState::Failed,
            _ => CogState::Loaded,
        }
    }

    pub fn into_result(self) -> Result<(), CogError> {
        match self.outcome {
            ReloadOutcome::Success => Ok(()),
            ReloadOutcome::RolledBack { reason } => Err(CogError::Load(reason)),
            ReloadOutcome::Failed { reason, rollback } => Err(CogError::RollbackFailure {
                id: self.id,
                reload: reason,
                rollback,
            }),
        }
    }

    fn report(&self) -> FailureReport {
        let (phase, summary, final_state) = match &self.outcome {
            ReloadOutcome::Success => (
                "teardown".to_string(),
                format!("Cog `{}` reloaded but the old instance did not tear down cleanly", self.id),
                CogState::Loaded,
            ),
            ReloadOutcome::RolledBack { reason } => (
                reason.phase.as_str().to_string(),
                format!("Reload failed, rolled back to v{}: {}", self.started_from.version, reason),
                CogState::Loaded,
            ),
            ReloadOutcome::Failed { reason, .. } => (
                reason.phase.as_str().to_string(),
                format!("Reload failed and rollback failed: {}", reason),
                CogState::Failed,
            ),
        };

        let mut report = FailureReport::new(self.id.clone(), Operation::Reload, phase, summary)
            .with_final_state(final_state.as_str())
            .with_detail(format!(
                "Started from `{}` v{} at {}",
                self.started_from.name,
                self.started_from.version,
                self.started_at.to_rfc3339()
            ));
        if let Some(teardown) = &self.teardown_error {
            report = report.with_detail(format!("Teardown: {}", teardown));
        }
        match &self.outcome {
            ReloadOutcome::Success => {}
            ReloadOutcome::RolledBack { reason } => {
                report = report.with_detail(reason.details());
            }
            ReloadOutcome::Failed { reason, rollback } => {
                report = report
                    .with_detail(reason.details())
                    .with_detail("Rollback:")
                    .with_detail(rollback.details());
            }
        }
        report.with_detail(format!("Finished at {}", self.finished_at.to_rfc3339()))
    }
}

/// Result of bringing up every enabled cog at startup
#[derive(Debug, Default)]
pub struct StartupSummary {
    pub loaded: Vec<CogId>,
    pub skipped: Vec<CogId>,
    pub failed: Vec<(CogId, CogError)>,
}

/// Result of applying a new cog list
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConfigChange {
    pub added: Vec<CogId>,
    pub removed: Vec<CogId>,
    pub updated: Vec<CogId>,
    /// Cogs left untouched because an operation was running on them
    pub busy: Vec<CogId>,
}

type InFlightSet = Arc<Mutex<HashSet<CogId>>>;

/// Held for the duration of one operation on a cog
struct OperationGuard {
    set: InFlightSet,
    id: CogId,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.set.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.id);
    }
}

pub struct CogManager {
    registry: tokio::sync::RwLock<CogRegistry>,
    loader: CogLoader,
    in_flight: InFlightSet,
    resolver: RwLock<FuzzyResolver>,
    resolver_config: ResolverConfig,
    reports: Arc<dyn ReportSink>,
    events: broadcast::Sender<CogEvent>,
}

impl CogManager {
    pub fn new(loader: CogLoader, resolver_config: ResolverConfig, reports: Arc<dyn ReportSink>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            registry: tokio::sync::RwLock::new(CogRegistry::new()),
            loader,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            resolver: RwLock::new(FuzzyResolver::new(resolver_config)),
            resolver_config,
            reports,
            events,
        }
    }

    pub fn host(&self) -> &Arc<CogHost> {
        self.loader.host()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CogEvent> {
        self.events.subscribe()
    }

    /// Register a configured cog as `Unloaded`; false if the id is taken
    pub async fn add_cog(&self, definition: CogDefinition) -> bool {
        let mut registry = self.registry.write().await;
        let record = CogRecord::configured(
            definition.id.clone(),
            definition.enabled,
            definition.protected,
            definition.source.origin(),
        );
        if !registry.insert(record) {
            warn!(cog = %definition.id, "Cog is already configured");
            return false;
        }
        self.loader.register_source(definition.id.clone(), definition.source);
        self.rebuild_resolver(&registry);
        debug!(cog = %definition.id, "Cog configured");
        self.notify(CogEvent::Added(definition.id));
        true
    }

    /// Status rows in configuration order
    pub async fn list(&self) -> Vec<CogStatus> {
        self.registry.read().await.statuses()
    }

    pub async fn status(&self, id: &CogId) -> Result<CogStatus, CogError> {
        self.registry.read().await.get(id).map(CogRecord::status)
    }

    pub fn resolve(&self, input: &str) -> Resolution {
        self.resolver.read().unwrap_or_else(|e| e.into_inner()).resolve(input)
    }

    /// Resolve user input to a single cog or fail with suggestions
    pub fn lookup(&self, input: &str) -> Result<CogId, CogError> {
        match self.resolve(input) {
            Resolution::Exact(id) => Ok(id),
            Resolution::Fuzzy { id, key, score } => {
                info!(input, matched = %key, score, cog = %id, "Resolved cog name by similarity");
                Ok(id)
            }
            Resolution::Ambiguous(suggestions) => Err(CogError::NotFound {
                input: input.to_string(),
                suggestions,
            }),
            Resolution::NoMatch => Err(CogError::NotFound {
                input: input.to_string(),
                suggestions: Vec::new(),
            }),
        }
    }

    /// Load an unloaded (or failed) cog from freshly read code
    pub async fn load(&self, id: &CogId) -> Result<CogStatus, CogError> {
        let _guard = self.begin(id).await?;
        let record = self.registry.read().await.get(id)?.clone();
        if record.is_loaded() {
            return Err(CogError::AlreadyLoaded(id.clone()));
        }

        self.loader.evict(id);
        match self.loader.load(id).await {
            Ok(live) => {
                info!(cog = %id, name = %live.template.name, version = %live.template.version, "Cog loaded");
                let status = self.commit(record.loaded(live)).await;
                self.notify(CogEvent::Loaded(id.clone()));
                Ok(status)
            }
            Err(e) => {
                error!(cog = %id, phase = %e.phase, error = %e.cause, "Cog failed to load");
                let report = FailureReport::new(id.clone(), Operation::Load, e.phase.as_str(), e.to_string())
                    .with_detail(e.details())
                    .with_final_state(record.state().as_str());
                self.submit(report).await;
                Err(CogError::Load(e))
            }
        }
    }

    /// Unload a loaded cog; protected cogs refuse
    pub async fn unload(&self, id: &CogId) -> Result<Released, CogError> {
        self.unload_inner(id, false).await
    }

    /// Swap a loaded cog for freshly read code, rolling back on failure
    ///
    /// `Err` is returned only when the reload could not start. A reload that
    /// started always comes back as a [`ReloadAttempt`], successful or not.
    pub async fn reload(&self, id: &CogId) -> Result<ReloadAttempt, CogError> {
        let _guard = self.begin(id).await?;
        let record = self.registry.read().await.get(id)?.clone();
        let Some(previous) = record.instance().cloned() else {
            return Err(CogError::NotLoaded(id.clone()));
        };

        let started_at = Utc::now();
        info!(cog = %id, from_version = %previous.template.version, "Reloading cog");

        let teardown_error = match self.loader.unload(&previous).await {
            Ok(released) => {
                debug!(cog = %id, released = released.total(), "Old instance detached");
                None
            }
            Err(e) => {
                warn!(cog = %id, error = %e.cause, "Old instance failed to tear down; continuing");
                Some(e)
            }
        };

        let fresh = match self.loader.reload_source(id) {
            Ok(()) => self.loader.load(id).await,
            Err(e) => Err(LoadError::from(e)),
        };

        let (next, outcome) = match fresh {
            Ok(live) => {
                info!(cog = %id, version = %live.template.version, instance = live.instance, "Cog reloaded");
                (record.loaded(live), ReloadOutcome::Success)
            }
            Err(reason) => {
                warn!(cog = %id, phase = %reason.phase, error = %reason.cause, "Reload failed, rolling back");
                match self.rollback(&previous).await {
                    Ok(live) => {
                        info!(cog = %id, instance = live.instance, "Rolled back to previous code");
                        (record.loaded(live), ReloadOutcome::RolledBack { reason })
                    }
                    Err(rollback) => {
                        error!(cog = %id, error = %rollback.cause, "Rollback failed; cog is now broken");
                        (record.failed(), ReloadOutcome::Failed { reason, rollback })
                    }
                }
            }
        };
        self.commit(next).await;

        let attempt = ReloadAttempt {
            id: id.clone(),
            started_from: previous.template.clone(),
            outcome,
            teardown_error,
            started_at,
            finished_at: Utc::now(),
        };

        self.notify(match &attempt.outcome {
            ReloadOutcome::Success => CogEvent::Reloaded(id.clone()),
            ReloadOutcome::RolledBack { reason } => CogEvent::RolledBack {
                id: id.clone(),
                reason: reason.to_string(),
            },
            ReloadOutcome::Failed { reason, .. } => CogEvent::Failed {
                id: id.clone(),
                reason: reason.to_string(),
            },
        });
        if !attempt.is_clean() {
            self.submit(attempt.report()).await;
        }
        Ok(attempt)
    }

    /// Load every enabled cog in configuration order, continuing past failures
    pub async fn load_enabled(&self) -> StartupSummary {
        let records: Vec<(CogId, bool)> = self
            .registry
            .read()
            .await
            .list()
            .map(|r| (r.id.clone(), r.enabled))
            .collect();

        let mut summary = StartupSummary::default();
        for (id, enabled) in records {
            if !enabled {
                warn!(cog = %id, "Skipping disabled cog");
                summary.skipped.push(id);
                continue;
            }
            match self.load(&id).await {
                Ok(_) => summary.loaded.push(id),
                Err(CogError::AlreadyLoaded(_)) => summary.loaded.push(id),
                Err(e) => summary.failed.push((id, e)),
            }
        }

        info!(
            loaded = summary.loaded.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Startup load finished"
        );
        summary
    }

    /// Bring the configured set in line with `definitions`
    ///
    /// New ids are added unloaded, vanished ids are unloaded and removed, and
    /// flags of existing ids are updated. Loaded cogs are not reloaded.
    pub async fn apply_config(&self, definitions: Vec<CogDefinition>) -> ConfigChange {
        let mut change = ConfigChange::default();
        let wanted: HashSet<CogId> = definitions.iter().map(|d| d.id.clone()).collect();
        let existing = self.registry.read().await.ids();

        for id in existing.iter().filter(|id| !wanted.contains(*id)) {
            match self.remove(id).await {
                Ok(()) => change.removed.push(id.clone()),
                Err(CogError::ConcurrentReload(_)) => change.busy.push(id.clone()),
                Err(e) => warn!(cog = %id, error = %e, "Could not remove cog"),
            }
        }

        for definition in &definitions {
            if !existing.contains(&definition.id) {
                if self.add_cog(definition.clone()).await {
                    change.added.push(definition.id.clone());
                }
                continue;
            }

            let Ok(_guard) = self.begin(&definition.id).await else {
                change.busy.push(definition.id.clone());
                continue;
            };
            let mut registry = self.registry.write().await;
            let Ok(current) = registry.get(&definition.id) else {
                continue;
            };
            let origin = definition.source.origin();
            if current.enabled == definition.enabled
                && current.protected == definition.protected
                && current.origin == origin
            {
                continue;
            }
            let mut record = current.clone();
            record.enabled = definition.enabled;
            record.protected = definition.protected;
            record.origin = origin;
            registry.commit(record);
            self.loader.register_source(definition.id.clone(), Arc::clone(&definition.source));
            change.updated.push(definition.id.clone());
        }

        let order: Vec<CogId> = definitions.iter().map(|d| d.id.clone()).collect();
        let mut registry = self.registry.write().await;
        registry.reorder(&order);
        self.rebuild_resolver(&registry);

        info!(
            added = change.added.len(),
            removed = change.removed.len(),
            updated = change.updated.len(),
            "Applied cog configuration"
        );
        change
    }

    /// Unload everything in reverse configuration order, protected cogs included
    pub async fn shutdown(&self) {
        let ids = self.registry.read().await.ids();
        for id in ids.iter().rev() {
            if !self.registry.read().await.is_loaded(id) {
                continue;
            }
            if let Err(e) = self.unload_inner(id, true).await {
                warn!(cog = %id, error = %e, "Cog did not shut down cleanly");
            }
        }
        info!("All cogs unloaded");
    }

    async fn unload_inner(&self, id: &CogId, force: bool) -> Result<Released, CogError> {
        let guard = self.begin(id).await?;
        self.unload_guarded(&guard, force).await
    }

    /// Unload under a guard the caller already holds
    async fn unload_guarded(&self, guard: &OperationGuard, force: bool) -> Result<Released, CogError> {
        let id = &guard.id;
        let record = self.registry.read().await.get(id)?.clone();
        if record.protected && !force {
            return Err(CogError::Protected(id.clone()));
        }
        let Some(live) = record.instance().cloned() else {
            return Err(CogError::NotLoaded(id.clone()));
        };

        let result = self.loader.unload(&live).await;
        self.commit(record.unloaded()).await;
        self.notify(CogEvent::Unloaded(id.clone()));

        match result {
            Ok(released) => {
                info!(cog = %id, released = released.total(), "Cog unloaded");
                Ok(released)
            }
            Err(e) => {
                warn!(cog = %id, error = %e.cause, "Cog unloaded with a failing teardown");
                let report = FailureReport::new(id.clone(), Operation::Unload, "teardown", e.to_string())
                    .with_detail(format!("Instance #{} of `{}`", live.instance, live.template.name))
                    .with_final_state(CogState::Unloaded.as_str());
                self.submit(report).await;
                Err(CogError::Unload(e))
            }
        }
    }

    async fn remove(&self, id: &CogId) -> Result<(), CogError> {
        // One guard for both steps so nothing can load the cog in between
        let guard = self.begin(id).await?;
        if self.registry.read().await.is_loaded(id) {
            match self.unload_guarded(&guard, true).await {
                Ok(_) | Err(CogError::Unload(_)) | Err(CogError::NotLoaded(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.registry.write().await.remove(id);
        self.loader.forget(id);
        self.notify(CogEvent::Removed(id.clone()));
        info!(cog = %id, "Cog removed from configuration");
        Ok(())
    }

    /// Bring back the code that was running before a failed reload
    ///
    /// First the previous instance is attached again; if its setup hook now
    /// fails, a fresh instance is built from the same module.
    async fn rollback(&self, previous: &LiveCog) -> Result<LiveCog, LoadError> {
        let id = &previous.id;
        self.loader.host().release(id);
        self.loader.restore_module(id, Arc::clone(&previous.module));

        let reattach_error = match self.loader.reattach(previous).await {
            Ok(live) => return Ok(live),
            Err(e) => e,
        };
        warn!(cog = %id, error = %reattach_error.cause, "Previous instance would not reattach; rebuilding it");

        self.loader.load(id).await.map_err(|e| {
            e.with_context(format!(
                "rebuilding `{}` v{} after the previous instance failed: {}",
                previous.template.name, previous.template.version, reattach_error.cause
            ))
        })
    }

    /// Claim the in-flight slot for `id` after checking it exists
    async fn begin(&self, id: &CogId) -> Result<OperationGuard, CogError> {
        self.registry.read().await.get(id)?;
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(id.clone()) {
            debug!(cog = %id, "Rejected overlapping operation");
            return Err(CogError::ConcurrentReload(id.clone()));
        }
        Ok(OperationGuard {
            set: Arc::clone(&self.in_flight),
            id: id.clone(),
        })
    }

    async fn commit(&self, record: CogRecord) -> CogStatus {
        let status = record.status();
        let mut registry = self.registry.write().await;
        registry.commit(record);
        self.rebuild_resolver(&registry);
        status
    }

    fn rebuild_resolver(&self, registry: &CogRegistry) {
        let mut resolver = FuzzyResolver::new(self.resolver_config);
        for record in registry.list() {
            resolver.add(&record.id, record.template_name());
        }
        *self.resolver.write().unwrap_or_else(|e| e.into_inner()) = resolver;
    }

    async fn submit(&self, report: FailureReport) {
        match self.reports.submit(&report).await {
            Ok(Some(location)) => info!(cog = %report.cog, location = %location, "Failure report written"),
            Ok(None) => {}
            Err(e) => error!(cog = %report.cog, error = %e, "Could not store failure report"),
        }
    }

    fn notify(&self, event: CogEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::application::errors::LoadPhase;
    use crate::domain::entities::{Command, Message};
    use crate::infrastructure::reports::MemoryReportSink;
    use crate::plugins::host::Registrar;
    use crate::plugins::source::{BuiltinSource, FnModule};
    use crate::plugins::trait_def::{Cog, CogModule};

    /// What the "current code" of the test cog does
    #[derive(Clone)]
    enum Behavior {
        Reply(&'static str),
        BrokenSource,
        FailingSetup,
        SlowSetup(&'static str, u64),
        /// Setup succeeds only the first time any instance of this code attaches
        OneShot(&'static str, Arc<AtomicUsize>),
        FailingTeardown(&'static str),
        HangingTeardown(&'static str),
        HangingSetup,
    }

    struct Gadget {
        template: CogTemplate,
        behavior: Behavior,
    }

    fn reply_command(reply: &'static str) -> Command {
        Command::new("gadget").with_handler(move |_| Ok(reply.to_string()))
    }

    #[async_trait]
    impl Cog for Gadget {
        fn template(&self) -> &CogTemplate {
            &self.template
        }

        async fn setup(&mut self, registrar: &mut Registrar) -> Result<(), String> {
            match &self.behavior {
                Behavior::Reply(reply) | Behavior::FailingTeardown(reply) | Behavior::HangingTeardown(reply) => {
                    registrar.add_command(reply_command(*reply)).map_err(|e| e.to_string())
                }
                Behavior::BrokenSource => Err("unreachable".to_string()),
                Behavior::FailingSetup => {
                    registrar.add_command(reply_command("partial")).map_err(|e| e.to_string())?;
                    Err("database unavailable".to_string())
                }
                Behavior::SlowSetup(reply, ms) => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                    registrar.add_command(reply_command(*reply)).map_err(|e| e.to_string())
                }
                Behavior::HangingSetup => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
                Behavior::OneShot(reply, attaches) => {
                    if attaches.fetch_add(1, Ordering::SeqCst) > 0 {
                        return Err("already used".to_string());
                    }
                    registrar.add_command(reply_command(*reply)).map_err(|e| e.to_string())
                }
            }
        }

        async fn teardown(&mut self) -> Result<(), String> {
            match self.behavior {
                Behavior::FailingTeardown(_) => Err("socket already closed".to_string()),
                Behavior::HangingTeardown(_) => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    /// Source whose code can be "edited" between compiles
    fn editable(code: Arc<Mutex<Behavior>>, version: Arc<AtomicUsize>) -> Arc<dyn CogSource> {
        Arc::new(BuiltinSource::new("gadget", move || {
            let behavior = code.lock().unwrap().clone();
            if let Behavior::BrokenSource = behavior {
                return Err("invalid syntax at line 3".to_string());
            }
            let template = CogTemplate::new("gadget")
                .with_version(format!("{}.0.0", version.fetch_add(1, Ordering::SeqCst) + 1));
            let module_template = template.clone();
            Ok(Arc::new(FnModule::new(module_template, move || {
                Ok(Box::new(Gadget {
                    template: template.clone(),
                    behavior: behavior.clone(),
                }) as Box<dyn Cog>)
            })) as Arc<dyn CogModule>)
        }))
    }

    struct Fixture {
        manager: Arc<CogManager>,
        reports: Arc<MemoryReportSink>,
        code: Arc<Mutex<Behavior>>,
        id: CogId,
    }

    impl Fixture {
        fn edit(&self, behavior: Behavior) {
            *self.code.lock().unwrap() = behavior;
        }

        fn invoke(&self) -> Option<String> {
            let command = self.manager.host().find_command("gadget")?;
            let handler = command.handler?;
            handler(Message::from_text("test", "gadget")).ok()
        }

        async fn state(&self) -> CogState {
            self.manager.status(&self.id).await.unwrap().state
        }
    }

    async fn fixture(initial: Behavior) -> Fixture {
        fixture_with_timeout(initial, Duration::from_secs(2)).await
    }

    async fn fixture_with_timeout(initial: Behavior, hook_timeout: Duration) -> Fixture {
        let host = Arc::new(CogHost::new());
        let loader = CogLoader::new(host, hook_timeout);
        let reports = Arc::new(MemoryReportSink::new());
        let manager = Arc::new(CogManager::new(
            loader,
            ResolverConfig::default(),
            Arc::clone(&reports) as Arc<dyn ReportSink>,
        ));
        let code = Arc::new(Mutex::new(initial));
        let id = CogId::new("cogs.gadget", "Gadget");
        manager
            .add_cog(CogDefinition::new(id.clone(), editable(Arc::clone(&code), Arc::new(AtomicUsize::new(0)))))
            .await;
        Fixture { manager, reports, code, id }
    }

    #[tokio::test]
    async fn test_successful_reload_leaves_one_instance() {
        let f = fixture(Behavior::Reply("v1")).await;
        f.manager.load(&f.id).await.unwrap();
        f.edit(Behavior::Reply("v2"));

        let attempt = f.manager.reload(&f.id).await.unwrap();
        assert!(attempt.is_clean());
        assert_eq!(f.invoke().as_deref(), Some("v2"));
        assert_eq!(f.manager.host().registrations_of(&f.id).commands, 1);
        assert_eq!(f.state().await, CogState::Loaded);
        assert!(f.reports.reports().is_empty());
    }

    #[tokio::test]
    async fn test_setup_failure_rolls_back_to_previous_code() {
        let f = fixture(Behavior::Reply("v1")).await;
        f.manager.load(&f.id).await.unwrap();
        let before = f.manager.status(&f.id).await.unwrap();

        f.edit(Behavior::FailingSetup);
        let attempt = f.manager.reload(&f.id).await.unwrap();

        assert!(matches!(attempt.outcome, ReloadOutcome::RolledBack { .. }));
        assert_eq!(f.invoke().as_deref(), Some("v1"));
        let after = f.manager.status(&f.id).await.unwrap();
        assert_eq!(after.state, before.state);
        assert_eq!(after.name, before.name);
        assert_eq!(f.manager.host().registrations_of(&f.id).commands, 1);
        assert_eq!(f.reports.reports().len(), 1);
        assert!(matches!(attempt.into_result(), Err(CogError::Load(_))));
    }

    #[tokio::test]
    async fn test_broken_source_is_import_failure() {
        let f = fixture(Behavior::Reply("v1")).await;
        f.manager.load(&f.id).await.unwrap();

        f.edit(Behavior::BrokenSource);
        let attempt = f.manager.reload(&f.id).await.unwrap();

        match &attempt.outcome {
            ReloadOutcome::RolledBack { reason } => {
                assert_eq!(reason.phase, LoadPhase::Import);
                assert!(reason.cause.contains("invalid syntax"));
            }
            other => panic!("expected rollback, got {:?}", other),
        }
        assert_eq!(f.invoke().as_deref(), Some("v1"));
        let reports = f.reports.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].phase, "import");
    }

    #[tokio::test]
    async fn test_rollback_rebuilds_when_previous_will_not_reattach() {
        let attaches = Arc::new(AtomicUsize::new(0));
        let f = fixture(Behavior::OneShot("v1", Arc::clone(&attaches))).await;
        f.manager.load(&f.id).await.unwrap();

        f.edit(Behavior::BrokenSource);
        let attempt = f.manager.reload(&f.id).await.unwrap();

        match attempt.outcome {
            ReloadOutcome::Failed { ref rollback, .. } => {
                assert!(rollback.cause.contains("already used"));
                assert!(rollback.context.iter().any(|c| c.contains("rebuilding")));
            }
            ref other => panic!("expected rollback failure, got {:?}", other),
        }
        assert_eq!(f.state().await, CogState::Failed);
        assert!(f.invoke().is_none());
        assert_eq!(f.manager.host().registrations_of(&f.id).total(), 0);
        assert_eq!(f.reports.reports()[0].final_state, "failed");
        assert!(matches!(attempt.into_result(), Err(CogError::RollbackFailure { .. })));
    }

    #[tokio::test]
    async fn test_failed_cog_can_be_loaded_again() {
        let attaches = Arc::new(AtomicUsize::new(0));
        let f = fixture(Behavior::OneShot("v1", attaches)).await;
        f.manager.load(&f.id).await.unwrap();
        f.edit(Behavior::BrokenSource);
        f.manager.reload(&f.id).await.unwrap();
        assert_eq!(f.state().await, CogState::Failed);

        assert!(matches!(f.manager.reload(&f.id).await, Err(CogError::NotLoaded(_))));

        f.edit(Behavior::Reply("fixed"));
        f.manager.load(&f.id).await.unwrap();
        assert_eq!(f.invoke().as_deref(), Some("fixed"));
    }

    #[tokio::test]
    async fn test_concurrent_reload_is_rejected() {
        let f = fixture(Behavior::Reply("v1")).await;
        f.manager.load(&f.id).await.unwrap();
        f.edit(Behavior::SlowSetup("v2", 300));

        let manager = Arc::clone(&f.manager);
        let id = f.id.clone();
        let first = tokio::spawn(async move { manager.reload(&id).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(f.manager.reload(&f.id).await, Err(CogError::ConcurrentReload(_))));
        assert!(matches!(f.manager.unload(&f.id).await, Err(CogError::ConcurrentReload(_))));
        // Observers still see the pre-reload record
        assert_eq!(f.state().await, CogState::Loaded);

        let attempt = first.await.unwrap().unwrap();
        assert!(attempt.is_success());
        assert_eq!(f.invoke().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_load_twice_is_already_loaded() {
        let f = fixture(Behavior::Reply("v1")).await;
        f.manager.load(&f.id).await.unwrap();
        f.edit(Behavior::Reply("v2"));

        assert!(matches!(f.manager.load(&f.id).await, Err(CogError::AlreadyLoaded(_))));
        assert_eq!(f.invoke().as_deref(), Some("v1"));
        assert_eq!(f.manager.host().registrations_of(&f.id).commands, 1);
    }

    #[tokio::test]
    async fn test_reload_of_never_loaded_cog() {
        let f = fixture(Behavior::Reply("v1")).await;
        assert!(matches!(f.manager.reload(&f.id).await, Err(CogError::NotLoaded(_))));
        assert_eq!(f.state().await, CogState::Unloaded);
        assert!(f.reports.reports().is_empty());
    }

    #[tokio::test]
    async fn test_unload_then_load() {
        let f = fixture(Behavior::Reply("v1")).await;
        f.manager.load(&f.id).await.unwrap();

        let released = f.manager.unload(&f.id).await.unwrap();
        assert_eq!(released.commands, 1);
        assert_eq!(f.state().await, CogState::Unloaded);
        assert!(f.invoke().is_none());

        f.manager.load(&f.id).await.unwrap();
        assert_eq!(f.state().await, CogState::Loaded);
        assert_eq!(f.invoke().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_teardown_failure_still_reloads() {
        let f = fixture(Behavior::FailingTeardown("v1")).await;
        f.manager.load(&f.id).await.unwrap();
        f.edit(Behavior::Reply("v2"));

        let attempt = f.manager.reload(&f.id).await.unwrap();
        assert!(attempt.is_success());
        assert!(attempt.teardown_error.is_some());
        assert_eq!(f.invoke().as_deref(), Some("v2"));
        assert_eq!(f.reports.reports().len(), 1);
    }

    #[tokio::test]
    async fn test_hung_hooks_time_out_and_roll_back() {
        let f = fixture_with_timeout(Behavior::HangingTeardown("v1"), Duration::from_millis(200)).await;
        f.manager.load(&f.id).await.unwrap();

        f.edit(Behavior::HangingSetup);
        let attempt = f.manager.reload(&f.id).await.unwrap();

        match &attempt.outcome {
            ReloadOutcome::RolledBack { reason } => {
                assert_eq!(reason.phase, LoadPhase::SetupHook);
                assert!(reason.cause.contains("did not finish within"));
            }
            other => panic!("expected rollback, got {:?}", other),
        }
        let teardown = attempt.teardown_error.as_ref().unwrap();
        assert!(teardown.cause.contains("teardown hook did not finish"));
        assert_eq!(f.state().await, CogState::Loaded);
        assert_eq!(f.invoke().as_deref(), Some("v1"));
        assert_eq!(f.reports.reports().len(), 1);
    }

    #[tokio::test]
    async fn test_protected_cog_refuses_unload() {
        let host = Arc::new(CogHost::new());
        let manager = CogManager::new(
            CogLoader::new(host, Duration::from_secs(2)),
            ResolverConfig::default(),
            Arc::new(MemoryReportSink::new()),
        );
        let id = CogId::new("cogs.gadget", "Gadget");
        let code = Arc::new(Mutex::new(Behavior::Reply("v1")));
        manager
            .add_cog(CogDefinition::new(id.clone(), editable(code, Arc::new(AtomicUsize::new(0)))).protected(true))
            .await;
        manager.load(&id).await.unwrap();

        assert!(matches!(manager.unload(&id).await, Err(CogError::Protected(_))));
        manager.shutdown().await;
        assert_eq!(manager.status(&id).await.unwrap().state, CogState::Unloaded);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let f = fixture(Behavior::Reply("v1")).await;
        let mut events = f.manager.subscribe();
        f.manager.load(&f.id).await.unwrap();
        f.edit(Behavior::FailingSetup);
        f.manager.reload(&f.id).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), CogEvent::Loaded(f.id.clone()));
        assert!(matches!(events.recv().await.unwrap(), CogEvent::RolledBack { .. }));
    }

    #[tokio::test]
    async fn test_lookup_uses_template_name_after_load() {
        let f = fixture(Behavior::Reply("v1")).await;
        assert_eq!(f.manager.lookup("Gadget").unwrap(), f.id);
        f.manager.load(&f.id).await.unwrap();
        assert_eq!(f.manager.lookup("gadget").unwrap(), f.id);
        assert!(matches!(
            f.manager.lookup("nothing-like-it"),
            Err(CogError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_startup_skips_disabled_and_survives_failures() {
        let host = Arc::new(CogHost::new());
        let manager = CogManager::new(
            CogLoader::new(host, Duration::from_secs(2)),
            ResolverConfig::default(),
            Arc::new(MemoryReportSink::new()),
        );
        let good = CogId::new("cogs.good", "Good");
        let off = CogId::new("cogs.off", "Off");
        let broken = CogId::new("cogs.broken", "Broken");
        let counter = || Arc::new(AtomicUsize::new(0));
        manager
            .add_cog(CogDefinition::new(broken.clone(), editable(Arc::new(Mutex::new(Behavior::BrokenSource)), counter())))
            .await;
        manager
            .add_cog(CogDefinition::new(good.clone(), editable(Arc::new(Mutex::new(Behavior::Reply("ok"))), counter())))
            .await;
        manager
            .add_cog(
                CogDefinition::new(off.clone(), editable(Arc::new(Mutex::new(Behavior::Reply("x"))), counter()))
                    .enabled(false),
            )
            .await;

        let summary = manager.load_enabled().await;
        assert_eq!(summary.loaded, vec![good]);
        assert_eq!(summary.skipped, vec![off]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, broken);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_removed_cog_cannot_be_loaded_midway() {
        let f = fixture(Behavior::Reply("v1")).await;
        f.manager.load(&f.id).await.unwrap();

        let mut events = f.manager.subscribe();
        let manager = Arc::clone(&f.manager);
        let id = f.id.clone();
        let racer = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if event == CogEvent::Unloaded(id.clone()) {
                    return manager.load(&id).await.err();
                }
            }
            None
        });

        let change = f.manager.apply_config(Vec::new()).await;
        assert_eq!(change.removed, vec![f.id.clone()]);

        let err = racer.await.unwrap();
        assert!(matches!(
            err,
            Some(CogError::ConcurrentReload(_)) | Some(CogError::NotFound { .. })
        ));
        assert!(f.invoke().is_none());
        assert!(f.manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_config_adds_and_removes() {
        let f = fixture(Behavior::Reply("v1")).await;
        f.manager.load(&f.id).await.unwrap();

        let other = CogId::new("cogs.other", "Other");
        let source = editable(Arc::new(Mutex::new(Behavior::Reply("o"))), Arc::new(AtomicUsize::new(0)));
        let change = f.manager.apply_config(vec![CogDefinition::new(other.clone(), source)]).await;

        assert_eq!(change.added, vec![other.clone()]);
        assert_eq!(change.removed, vec![f.id.clone()]);
        assert!(f.invoke().is_none());
        let ids: Vec<CogId> = f.manager.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![other]);
    }
}
