use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// Everything the session log knows how to record: entitlement
/// transitions, generation attempts and fallbacks, and cost telemetry.
/// Serialized internally tagged so each JSONL line carries a `type` field
/// and stays greppable.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    GenerationStarted {
        models: Vec<String>,
        partner_language: String,
        ui_language: String,
        same_language: bool,
    },
    ModelAttemptFailed {
        model: String,
        attempt: usize,
        error: String,
    },
    GenerationSucceeded {
        model: String,
        attempt: usize,
    },
    CostUpdate {
        model: String,
        prompt_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    },
    /// The third reply came back no richer than the first two.
    MasterpieceBelowStandard { sentence_counts: Vec<usize> },
    FreePassConsumed { remaining: u32 },
    GrantTimeBoxed {
        kind: String,
        expiry_epoch_ms: i64,
        debug: bool,
    },
    GrantCleared,
    AdRewardPass { free_passes: u32 },
    EntitlementReset,
}

/// Append-only writer for the session's `events.jsonl`: one compact JSON
/// object per line, stamped with the session id and an RFC3339 timestamp.
/// The file handle opens lazily on the first emit and stays open for the
/// session.
#[derive(Debug, Clone)]
pub struct EventWriter {
    session_id: String,
    sink: Arc<Mutex<LogSink>>,
}

#[derive(Debug)]
struct LogSink {
    path: PathBuf,
    file: Option<File>,
}

impl LogSink {
    fn append(&mut self, line: &str) -> Result<()> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("failed opening event log {}", self.path.display()))?;
            self.file = Some(file);
        }
        let file = self.file.as_mut().ok_or_else(|| anyhow!("event log not open"))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            sink: Arc::new(Mutex::new(LogSink {
                path: path.into(),
                file: None,
            })),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, event: &Event) -> Result<()> {
        let mut row = serde_json::to_value(event)?;
        let fields = row
            .as_object_mut()
            .ok_or_else(|| anyhow!("event serialized to a non-object"))?;
        fields.insert(
            "session_id".to_string(),
            Value::String(self.session_id.clone()),
        );
        fields.insert("ts".to_string(), Value::String(timestamp()));

        let line = row.to_string();
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        sink.append(&line)
    }
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
