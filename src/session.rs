//! Per-run session audit log.
//!
//! Every run appends its conversation and action record to a JSONL file
//! named after the run id, so a failed or escalated run can be replayed
//! after the fact. This is an audit trail, separate from the in-memory
//! conversation history the oracle sees.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::CasePilotResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub ts: i64,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl SessionEntry {
    pub fn now(kind: impl Into<String>) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            kind: kind.into(),
            text: None,
            payload: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

pub struct SessionLog {
    pub session_id: String,
    entries: Vec<SessionEntry>,
    file_path: PathBuf,
}

impl SessionLog {
    pub fn new() -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let dir = data_dir_or_cwd();
        let file_path = dir.join(format!("run_{session_id}.jsonl"));
        Self {
            session_id,
            entries: Vec::new(),
            file_path,
        }
    }

    pub fn push(&mut self, entry: SessionEntry) {
        self.entries.push(entry);
    }

    /// Appends the latest entry to the JSONL file.
    pub fn flush(&self) -> CasePilotResult<()> {
        if let Some(last) = self.entries.last() {
            let line = serde_json::to_string(last)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?;
            writeln!(file, "{}", line)?;
            tracing::debug!(path = %self.file_path.display(), "session entry flushed");
        }
        Ok(())
    }

    pub fn record(&mut self, entry: SessionEntry) {
        self.push(entry);
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "session log flush failed");
        }
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}

fn data_dir_or_cwd() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let dir = base.join("casepilot").join("runs");
        let _ = std::fs::create_dir_all(&dir);
        return dir;
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
