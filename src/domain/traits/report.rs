use async_trait::async_trait;
use crate::application::errors::StorageError;
use crate::domain::entities::FailureReport;

/// Receives failure reports for persistence
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist one report; returns a human-readable location when there is one
    async fn submit(&self, report: &FailureReport) -> Result<Option<String>, StorageError>;
}
