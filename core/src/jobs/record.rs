use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use rand::RngCore;
use rand::rng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::decode::repair_garbled;
use crate::operation::OperationReport;
use crate::operation::SystemTag;

const JOB_TOKEN_BYTES: usize = 18;
pub(crate) const SEED_LOG_LINE: &str = "started";

/// Opaque, unguessable job handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub(crate) fn generate() -> Self {
        let mut buf = [0u8; JOB_TOKEN_BYTES];
        rng().fill_bytes(&mut buf);
        Self(URL_SAFE_NO_PAD.encode(buf))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The principal a job belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOwner {
    pub id: i64,
    pub username: String,
}

impl JobOwner {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Progress percentage for a job in the given state.
///
/// Never 0, and never 100 while the job is still running.
pub(crate) fn progress_percent(terminal: bool, processed: usize, total: usize, lines: usize) -> u8 {
    if terminal {
        return 100;
    }
    if total > 0 {
        let pct = processed.saturating_mul(100) / total;
        return pct.clamp(1, 99) as u8;
    }
    if lines == 0 {
        return 1;
    }
    lines.saturating_mul(5).saturating_add(10).min(95) as u8
}

#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) owner: JobOwner,
    pub(crate) system: SystemTag,
    pub(crate) operation: String,
    pub(crate) status: JobStatus,
    pub(crate) ok: bool,
    pub(crate) message: String,
    pub(crate) error: String,
    pub(crate) progress: u8,
    pub(crate) processed: usize,
    pub(crate) total: usize,
    pub(crate) log_lines: Vec<String>,
    pub(crate) result_text: String,
    pub(crate) result_records: Vec<Value>,
    pub(crate) result_details: Map<String, Value>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        owner: JobOwner,
        system: SystemTag,
        operation: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            system,
            operation,
            status: JobStatus::Running,
            ok: false,
            message: String::new(),
            error: String::new(),
            progress: 1,
            processed: 0,
            total: 0,
            log_lines: vec![SEED_LOG_LINE.to_string()],
            result_text: String::new(),
            result_records: Vec::new(),
            result_details: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Returns `false` when the job is already terminal and nothing changed.
    pub(crate) fn apply_progress(
        &mut self,
        line: &str,
        processed: usize,
        total: usize,
        max_log_lines: usize,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_running() {
            return false;
        }
        let line = line.trim();
        if !line.is_empty() {
            self.push_line(line.to_string(), max_log_lines);
            self.result_text = self.log_lines.join("\n");
        }
        if total > 0 {
            self.total = total;
        }
        self.processed = self.processed.max(processed);
        let pct = progress_percent(false, self.processed, self.total, self.log_lines.len());
        self.progress = self.progress.max(pct);
        self.updated_at = now;
        true
    }

    pub(crate) fn succeed(&mut self, report: OperationReport, max_log_lines: usize, now: DateTime<Utc>) {
        if !self.is_running() {
            return;
        }
        self.status = JobStatus::Success;
        self.ok = true;
        self.error.clear();
        self.message = match report.message.trim() {
            "" => "completed".to_string(),
            message => message.to_string(),
        };

        let log_text = report
            .log_text
            .as_deref()
            .map(|text| repair_garbled(text).trim().to_string())
            .filter(|text| !text.is_empty());
        if let Some(text) = log_text {
            if self.log_lines.len() <= 1 {
                self.log_lines.clear();
                for line in split_log_text(&text) {
                    self.push_line(line, max_log_lines);
                }
            }
            self.result_text = text;
        } else {
            self.result_text = self.log_lines.join("\n");
        }

        self.result_records = report.items;
        self.result_details = report.details;
        if self.processed == 0 && !self.result_records.is_empty() {
            self.processed = self.result_records.len();
        }
        if self.total == 0 && self.processed > 0 {
            self.total = self.processed;
        }
        self.progress = 100;
        self.updated_at = now;
    }

    pub(crate) fn fail(&mut self, message: &str, error: &str, max_log_lines: usize, now: DateTime<Utc>) {
        if !self.is_running() {
            return;
        }
        let error = match error.trim() {
            "" => "execution failed",
            error => error,
        };
        self.status = JobStatus::Failed;
        self.ok = false;
        self.message = match message.trim() {
            "" => "execution failed".to_string(),
            message => message.to_string(),
        };
        self.error = error.to_string();
        self.push_line(format!("failed: {error}"), max_log_lines);
        self.result_text = self.log_lines.join("\n");
        self.progress = 100;
        self.updated_at = now;
    }

    fn push_line(&mut self, line: String, max_log_lines: usize) {
        self.log_lines.push(line);
        if self.log_lines.len() > max_log_lines {
            let excess = self.log_lines.len() - max_log_lines;
            self.log_lines.drain(..excess);
        }
    }

    pub(crate) fn view(&self) -> JobView {
        JobView {
            job_id: self.id.clone(),
            system: self.system,
            operation: self.operation.clone(),
            status: self.status,
            done: self.status.is_terminal(),
            ok: self.ok,
            message: self.message.clone(),
            error: self.error.clone(),
            progress: self.progress,
            processed: self.processed,
            total: self.total,
            log_lines: self.log_lines.clone(),
            result_text: self.result_text.clone(),
            result_records: self.result_records.clone(),
            result_details: self.result_details.clone(),
            created_at: rfc3339(self.created_at),
            updated_at: rfc3339(self.updated_at),
        }
    }
}

fn split_log_text(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Point-in-time copy of a job, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub system: SystemTag,
    pub operation: String,
    pub status: JobStatus,
    pub done: bool,
    pub ok: bool,
    pub message: String,
    pub error: String,
    pub progress: u8,
    pub processed: usize,
    pub total: usize,
    pub log_lines: Vec<String>,
    pub result_text: String,
    pub result_records: Vec<Value>,
    /// Operation-specific extras, e.g. the firewall outcomes of a delete.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub result_details: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}
