use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CogId;

/// Management operation a report refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Load,
    Unload,
    Reload,
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Load => "load",
            Operation::Unload => "unload",
            Operation::Reload => "reload",
        }
    }
}

/// Diagnostic record for one failed lifecycle operation
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub id: String,
    pub cog: CogId,
    pub operation: Operation,
    /// Phase that failed (`import`, `setup hook`, `teardown`, ...)
    pub phase: String,
    pub summary: String,
    /// Full context, one entry per line
    pub details: Vec<String>,
    /// Where the cog ended up after the operation
    pub final_state: String,
    pub timestamp: DateTime<Utc>,
}

impl FailureReport {
    pub fn new(cog: CogId, operation: Operation, phase: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cog,
            operation,
            phase: phase.into(),
            summary: summary.into(),
            details: Vec::new(),
            final_state: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.extend(detail.into().lines().map(str::to_string));
        self
    }

    pub fn with_final_state(mut self, state: impl Into<String>) -> Self {
        self.final_state = state.into();
        self
    }

    /// Plain-text rendering written to report files
    pub fn render(&self) -> String {
        let mut out = String::from("--- COG FAILURE REPORT ---\n\n");
        out.push_str(&format!("Report:    {}\n", self.id));
        out.push_str(&format!("Time:      {}\n", self.timestamp.to_rfc3339()));
        out.push_str(&format!("Cog:       {}\n", self.cog));
        out.push_str(&format!("Operation: {}\n", self.operation.as_str()));
        out.push_str(&format!("Phase:     {}\n", self.phase));
        out.push_str(&format!("Final:     {}\n", self.final_state));
        out.push_str(&format!("\n{}\n", self.summary));
        if !self.details.is_empty() {
            out.push_str("\n--- DETAILS ---\n");
            for line in &self.details {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}
