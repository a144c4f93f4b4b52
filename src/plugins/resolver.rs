//! Fuzzy cog name resolution
//!
//! Users address cogs by template name, class name or module path, and they
//! make typos. Lookup goes exact key, then case-insensitive key, then a
//! similarity ranking. A fuzzy hit is only acted on when it clears the
//! auto-accept threshold and no other cog scores the same; otherwise the
//! caller gets suggestions.

use std::collections::HashMap;

use difflib::sequencematcher::SequenceMatcher;
use serde::{Deserialize, Serialize};

use crate::domain::entities::CogId;

/// Resolver thresholds, both on the 0.0–1.0 similarity scale
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum similarity for a key to be suggested at all
    pub cutoff: f64,
    /// Minimum similarity for a fuzzy match to be used without asking
    pub auto_accept: f64,
    /// Suggestions returned when nothing is accepted
    pub max_suggestions: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cutoff: 0.6,
            auto_accept: 0.85,
            max_suggestions: 3,
        }
    }
}

/// Outcome of resolving user input
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Exact(CogId),
    Fuzzy { id: CogId, key: String, score: f64 },
    /// Display names of the closest cogs, best first
    Ambiguous(Vec<String>),
    NoMatch,
}

impl Resolution {
    pub fn id(&self) -> Option<&CogId> {
        match self {
            Resolution::Exact(id) | Resolution::Fuzzy { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Lookup table from the many names of a cog to its id
#[derive(Debug, Default)]
pub struct FuzzyResolver {
    config: ResolverConfig,
    /// Insertion-ordered keys; the first cog to claim a key keeps it
    keys: Vec<(String, CogId)>,
    index: HashMap<String, usize>,
    display: HashMap<CogId, String>,
}

impl FuzzyResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Register a cog under its template name, class and module names
    pub fn add(&mut self, id: &CogId, template_name: Option<&str>) {
        let class = id.class();
        let module = id.module();
        let basename = module.rsplit('.').next().unwrap_or(module);
        let display = template_name.unwrap_or(class).to_string();

        let class_lower = class.to_lowercase();
        let candidates = [
            template_name.unwrap_or(""),
            class,
            class_lower.as_str(),
            module,
            basename,
            id.as_str(),
        ];
        for key in candidates {
            if key.is_empty() || self.index.contains_key(key) {
                continue;
            }
            self.index.insert(key.to_string(), self.keys.len());
            self.keys.push((key.to_string(), id.clone()));
        }
        self.display.entry(id.clone()).or_insert(display);
    }

    pub fn display_name(&self, id: &CogId) -> String {
        self.display
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.class().to_string())
    }

    pub fn resolve(&self, input: &str) -> Resolution {
        let input = input.trim();
        if input.is_empty() {
            return Resolution::NoMatch;
        }

        if let Some(&i) = self.index.get(input) {
            return Resolution::Exact(self.keys[i].1.clone());
        }

        if let Some((_, id)) = self.keys.iter().find(|(k, _)| k.eq_ignore_ascii_case(input)) {
            return Resolution::Exact(id.clone());
        }

        let needle = input.to_lowercase();
        let mut scored: Vec<(f64, &str, &CogId)> = self
            .keys
            .iter()
            .map(|(k, id)| (similarity(&needle, &k.to_lowercase()), k.as_str(), id))
            .filter(|(score, _, _)| *score >= self.config.cutoff)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.truncate(5);

        let Some(&(best_score, best_key, best_id)) = scored.first() else {
            return Resolution::NoMatch;
        };

        let tied = scored
            .iter()
            .any(|(score, _, id)| *score == best_score && *id != best_id);
        if best_score >= self.config.auto_accept && !tied {
            return Resolution::Fuzzy {
                id: best_id.clone(),
                key: best_key.to_string(),
                score: best_score,
            };
        }

        let mut suggestions: Vec<String> = Vec::new();
        for (_, _, id) in &scored {
            let name = self.display_name(id);
            if !suggestions.contains(&name) {
                suggestions.push(name);
            }
        }
        suggestions.truncate(self.config.max_suggestions);
        Resolution::Ambiguous(suggestions)
    }
}

/// Ratcliff/Obershelp similarity: twice the matched characters over total length
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    SequenceMatcher::new(&a, &b).ratio() as f64
}
