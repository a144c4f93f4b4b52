//! Process-wide registrations contributed by cogs
//!
//! Commands, event listeners and background tasks are all keyed by the cog
//! that registered them so an unload can take every one of them back.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;

use crate::application::errors::CommandError;
use crate::domain::entities::{CogId, Command, CommandRegistry};

/// Event listener callback; receives the event payload
pub type ListenerFn = Arc<dyn Fn(&str) + Send + Sync>;

struct Listener {
    owner: CogId,
    handler: ListenerFn,
}

/// Counts of registrations removed (or held) for one cog
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub commands: usize,
    pub listeners: usize,
    pub tasks: usize,
}

impl Released {
    pub fn total(&self) -> usize {
        self.commands + self.listeners + self.tasks
    }
}

/// Shared registration surface of the running bot
#[derive(Default)]
pub struct CogHost {
    commands: RwLock<CommandRegistry>,
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    tasks: Mutex<HashMap<CogId, Vec<JoinHandle<()>>>>,
}

impl CogHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration handle for one attach of `owner`
    pub fn registrar(self: &Arc<Self>, owner: CogId) -> Registrar {
        Registrar {
            host: Arc::clone(self),
            owner,
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a host-owned command (not tied to any cog)
    pub fn register_builtin(&self, command: Command) -> Result<(), CommandError> {
        let mut command = command;
        command.owner = None;
        self.write_commands().register(command)
    }

    pub fn find_command(&self, name: &str) -> Option<Command> {
        self.read_commands().find(name).cloned()
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.read_commands().find(name).is_some()
    }

    /// Snapshot of every registered command
    pub fn commands(&self) -> Vec<Command> {
        self.read_commands().all().cloned().collect()
    }

    /// Invoke every listener for `event`, returning how many ran
    pub fn emit(&self, event: &str, payload: &str) -> usize {
        let handlers: Vec<ListenerFn> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            listeners
                .get(event)
                .map(|l| l.iter().map(|l| Arc::clone(&l.handler)).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Current registrations held by `owner`
    pub fn registrations_of(&self, owner: &CogId) -> Released {
        let commands = self.read_commands().count_owned_by(owner);
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .flatten()
            .filter(|l| &l.owner == owner)
            .count();
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(owner)
            .map(|t| t.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0);
        Released { commands, listeners, tasks }
    }

    /// Drop everything `owner` registered; aborts its background tasks
    pub fn release(&self, owner: &CogId) -> Released {
        let commands = self.write_commands().remove_owned_by(owner);

        let mut listeners = 0;
        {
            let mut map = self.listeners.write().unwrap_or_else(|e| e.into_inner());
            for list in map.values_mut() {
                let before = list.len();
                list.retain(|l| &l.owner != owner);
                listeners += before - list.len();
            }
            map.retain(|_, list| !list.is_empty());
        }

        let handles = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(owner)
            .unwrap_or_default();
        let tasks = handles.len();
        for handle in handles {
            handle.abort();
        }

        if commands + listeners + tasks > 0 {
            tracing::debug!(cog = %owner, commands, listeners, tasks, "Released cog registrations");
        }
        Released { commands, listeners, tasks }
    }

    fn read_commands(&self) -> std::sync::RwLockReadGuard<'_, CommandRegistry> {
        self.commands.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_commands(&self) -> std::sync::RwLockWriteGuard<'_, CommandRegistry> {
        self.commands.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handed to a cog's setup hook; everything registered here belongs to the cog
pub struct Registrar {
    host: Arc<CogHost>,
    owner: CogId,
    revoked: Arc<AtomicBool>,
}

impl Registrar {
    pub fn owner(&self) -> &CogId {
        &self.owner
    }

    /// Whether another cog (or the host) already provides `name`
    pub fn has_command(&self, name: &str) -> bool {
        self.host.has_command(name)
    }

    pub fn add_command(&mut self, command: Command) -> Result<(), CommandError> {
        if self.is_revoked() {
            return Err(CommandError::ExecutionFailed(format!(
                "registration window for cog `{}` is closed",
                self.owner
            )));
        }
        self.host
            .write_commands()
            .register(command.with_owner(self.owner.clone()))
    }

    pub fn add_listener<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if self.is_revoked() {
            tracing::warn!(cog = %self.owner, "Ignoring listener registered after setup was abandoned");
            return;
        }
        let mut listeners = self.host.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.entry(event.into()).or_default().push(Listener {
            owner: self.owner.clone(),
            handler: Arc::new(handler),
        });
    }

    /// Spawn a background task that lives as long as the cog stays attached
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_revoked() {
            tracing::warn!(cog = %self.owner, "Ignoring task spawned after setup was abandoned");
            return;
        }
        let handle = tokio::spawn(task);
        self.host
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(self.owner.clone())
            .or_default()
            .push(handle);
    }

    /// Token the loader uses to close this registrar after a failed or timed out setup
    pub(crate) fn revocation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.revoked)
    }

    fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }
}
