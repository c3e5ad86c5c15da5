use serde::Serialize;
use uuid::Uuid;

use super::Stage;
use crate::errors::BackupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Done,
    Failed,
}

/// Terminal summary of one run, printed as a single JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub run_id: Uuid,
    /// `done` on success, otherwise the stage that failed.
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_bytes: Option<u64>,
    /// Stderr from a dump that succeeded anyway (`warn` policy).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_warnings: Option<String>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Report for a run that was refused before any stage started.
    pub fn rejected(error: &BackupError) -> Self {
        Self {
            status: RunStatus::Failed,
            run_id: Uuid::new_v4(),
            stage: error.stage(),
            error_kind: Some(error.kind()),
            message: Some(error.to_string()),
            image: None,
            tag: None,
            artifact_bytes: None,
            dump_warnings: None,
            elapsed_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Done
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"{:?}","error_kind":"report","message":"{}"}}"#, self.status, e)
        })
    }
}
