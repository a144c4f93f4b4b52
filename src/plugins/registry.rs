//! Cog registry - the authoritative record of every configured cog

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::errors::CogError;
use crate::domain::entities::{CogId, CogState, CogStatus, CogTemplate};
use crate::plugins::loader::LiveCog;
use crate::plugins::trait_def::CogModule;

/// Last known good code of a cog, enough to build it again
#[derive(Clone)]
pub struct CogSnapshot {
    pub module: Arc<dyn CogModule>,
    pub template: CogTemplate,
    pub taken_at: DateTime<Utc>,
}

impl CogSnapshot {
    pub fn of(live: &LiveCog) -> Self {
        Self {
            module: Arc::clone(&live.module),
            template: live.template.clone(),
            taken_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for CogSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CogSnapshot")
            .field("template", &self.template.name)
            .field("version", &self.template.version)
            .field("taken_at", &self.taken_at)
            .finish()
    }
}

/// One configured cog
///
/// `instance` is `Some` exactly when `state` is `Loaded`; the constructors
/// below are the only way to move between states.
#[derive(Debug, Clone)]
pub struct CogRecord {
    pub id: CogId,
    pub enabled: bool,
    pub protected: bool,
    pub origin: String,
    state: CogState,
    instance: Option<LiveCog>,
    last_good: Option<CogSnapshot>,
}

impl CogRecord {
    pub fn configured(id: CogId, enabled: bool, protected: bool, origin: impl Into<String>) -> Self {
        Self {
            id,
            enabled,
            protected,
            origin: origin.into(),
            state: CogState::Unloaded,
            instance: None,
            last_good: None,
        }
    }

    pub fn state(&self) -> CogState {
        self.state
    }

    pub fn instance(&self) -> Option<&LiveCog> {
        self.instance.as_ref()
    }

    pub fn last_good(&self) -> Option<&CogSnapshot> {
        self.last_good.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == CogState::Loaded
    }

    /// Record with `live` attached; it becomes the new last good snapshot
    pub fn loaded(mut self, live: LiveCog) -> Self {
        self.last_good = Some(CogSnapshot::of(&live));
        self.instance = Some(live);
        self.state = CogState::Loaded;
        self
    }

    pub fn unloaded(mut self) -> Self {
        self.instance = None;
        self.state = CogState::Unloaded;
        self
    }

    pub fn failed(mut self) -> Self {
        self.instance = None;
        self.state = CogState::Failed;
        self
    }

    /// Template name from the live instance, else from the last good snapshot
    pub fn template_name(&self) -> Option<&str> {
        self.instance
            .as_ref()
            .map(|l| l.template.name.as_str())
            .or_else(|| self.last_good.as_ref().map(|s| s.template.name.as_str()))
    }

    pub fn status(&self) -> CogStatus {
        CogStatus {
            id: self.id.clone(),
            name: self.template_name().map(str::to_string),
            state: self.state,
            enabled: self.enabled,
            protected: self.protected,
            origin: self.origin.clone(),
        }
    }
}

/// Cogs in configuration order
#[derive(Debug, Default)]
pub struct CogRegistry {
    order: Vec<CogId>,
    records: HashMap<CogId, CogRecord>,
}

impl CogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new record; returns false if the id is already present
    pub fn insert(&mut self, record: CogRecord) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.order.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
        true
    }

    pub fn get(&self, id: &CogId) -> Result<&CogRecord, CogError> {
        self.records.get(id).ok_or_else(|| CogError::NotFound {
            input: id.to_string(),
            suggestions: Vec::new(),
        })
    }

    /// Replace the stored record for `record.id` in one step
    pub fn commit(&mut self, record: CogRecord) {
        if !self.records.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &CogId) -> Option<CogRecord> {
        self.order.retain(|o| o != id);
        self.records.remove(id)
    }

    /// Records in configuration order
    pub fn list(&self) -> impl Iterator<Item = &CogRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn statuses(&self) -> Vec<CogStatus> {
        self.list().map(CogRecord::status).collect()
    }

    pub fn ids(&self) -> Vec<CogId> {
        self.order.clone()
    }

    pub fn is_loaded(&self, id: &CogId) -> bool {
        self.records.get(id).map(CogRecord::is_loaded).unwrap_or(false)
    }

    /// Reorder to match `ids`; ids not listed keep their relative order at the end
    pub fn reorder(&mut self, ids: &[CogId]) {
        let mut order: Vec<CogId> = ids
            .iter()
            .filter(|id| self.records.contains_key(*id))
            .cloned()
            .collect();
        for id in &self.order {
            if !order.contains(id) {
                order.push(id.clone());
            }
        }
        self.order = order;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
