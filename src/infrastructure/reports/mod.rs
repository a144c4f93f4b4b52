//! Failure report sinks

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::errors::StorageError;
use crate::domain::entities::FailureReport;
use crate::domain::traits::ReportSink;

/// Writes one text file per report into a folder
pub struct FileReportSink {
    base_path: PathBuf,
}

impl FileReportSink {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub async fn init(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    /// `error_<timestamp>_<cog>.log`, with the cog id made filename-safe
    pub fn file_name(report: &FailureReport) -> String {
        let cog: String = report
            .cog
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        format!(
            "error_{}_{}.log",
            report.timestamp.format("%Y-%m-%d_%H-%M-%S%.3f"),
            cog
        )
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn submit(&self, report: &FailureReport) -> Result<Option<String>, StorageError> {
        self.init().await?;
        let path = self.base_path.join(Self::file_name(report));
        tokio::fs::write(&path, report.render()).await?;
        Ok(Some(path.display().to_string()))
    }
}

/// Emits reports as structured log events only
#[derive(Default)]
pub struct LogReportSink;

#[async_trait]
impl ReportSink for LogReportSink {
    async fn submit(&self, report: &FailureReport) -> Result<Option<String>, StorageError> {
        let json = serde_json::to_string(report).map_err(|e| StorageError::Serialization(e.to_string()))?;
        tracing::error!(cog = %report.cog, operation = report.operation.as_str(), report = %json, "{}", report.summary);
        Ok(None)
    }
}

/// Keeps reports in memory; used by tests
#[derive(Default)]
pub struct MemoryReportSink {
    reports: Mutex<Vec<FailureReport>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ReportSink for MemoryReportSink {
    async fn submit(&self, report: &FailureReport) -> Result<Option<String>, StorageError> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report.clone());
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{CogId, Operation};

    fn report() -> FailureReport {
        FailureReport::new(CogId::new("cogs.echo", "Echo"), Operation::Reload, "import", "bad yaml")
            .with_detail("line 1\nline 2")
            .with_final_state("loaded")
    }

    #[tokio::test]
    async fn test_file_sink_writes_named_report() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileReportSink::new(dir.path().join("reports"));

        let location = sink.submit(&report()).await.unwrap().unwrap();
        let name = std::path::Path::new(&location).file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("error_"));
        assert!(name.ends_with("_cogs.echo.Echo.log"));

        let content = std::fs::read_to_string(&location).unwrap();
        assert!(content.contains("--- COG FAILURE REPORT ---"));
        assert!(content.contains("bad yaml"));
        assert!(content.contains("line 2"));
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_reports() {
        let sink = MemoryReportSink::new();
        sink.submit(&report()).await.unwrap();
        assert_eq!(sink.reports().len(), 1);
        assert_eq!(sink.reports()[0].phase, "import");
    }
}
