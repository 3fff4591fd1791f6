use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Simulated work is capped so a bad payload cannot park a worker for hours.
pub const MAX_WAIT_MILLIS: u64 = 10 * 60 * 1000;

fn default_wait_millis() -> u64 {
    1000
}

/// Work a task file can describe, dispatched on its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run a knowledge-base search.
    Search {
        query: String,
        #[serde(default)]
        n_results: Option<usize>,
        #[serde(default)]
        hybrid: bool,
    },
    /// Echo a message back; used to check that workers are alive.
    Ping {
        #[serde(default)]
        message: Option<String>,
    },
    /// Sleep for `millis`.
    Wait {
        #[serde(default = "default_wait_millis")]
        millis: u64,
    },
}

impl TaskKind {
    pub const NAMES: [&'static str; 3] = ["search", "ping", "wait"];

    /// Parse a task payload. Extra keys (like `created_at`) are ignored.
    pub fn parse(payload: &Value) -> Result<Self, TaskError> {
        let Some(object) = payload.as_object() else {
            return Err(TaskError::NotAnObject);
        };
        let task_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(TaskError::MissingType)?;
        if !Self::NAMES.contains(&task_type) {
            return Err(TaskError::UnknownType(task_type.to_string()));
        }
        Self::deserialize(payload).map_err(|e| TaskError::InvalidPayload {
            task_type: task_type.to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TaskError {
    #[error("task payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("task payload must be a JSON object")]
    NotAnObject,

    #[error("task has no string \"type\" field")]
    MissingType,

    #[error("unknown task type: {0}")]
    UnknownType(String),

    #[error("invalid {task_type} task: {reason}")]
    InvalidPayload { task_type: String, reason: String },
}

/// Outcome of processing one task, written under `result` in the completed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    Success { output: Value },
    Error { error: String },
}

impl TaskResult {
    pub fn success(output: Value) -> Self {
        Self::Success { output }
    }

    pub fn error(error: impl ToString) -> Self {
        Self::Error {
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// The file written into `completed/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    /// Original payload; a string holding the raw text if it was not JSON.
    pub task: Value,
    pub result: TaskResult,
    pub completed_at: DateTime<Utc>,
    pub processed_by: String,
}

/// Longest name part (task type, machine) kept in a file name.
pub const MAX_NAME_PART_BYTES: usize = 48;

/// Longest original stem carried into a processing name. Together with the
/// name-part cap this keeps every queue file name under the common 255-byte
/// file system limit.
pub const MAX_STEM_BYTES: usize = 160;

/// Keep `[A-Za-z0-9-]` so names never contain the `__` separator or path
/// characters. Capped at [`MAX_NAME_PART_BYTES`].
pub fn sanitize_name_part(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .take(MAX_NAME_PART_BYTES)
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// `task_<type>_<epoch_ms>.json`
pub fn task_file_name(task_type: &str, epoch_ms: i64) -> String {
    format!("task_{}_{epoch_ms}.json", sanitize_name_part(task_type))
}

/// `<stem>__<machine>__<claim_ms>.json`
///
/// Stems longer than [`MAX_STEM_BYTES`] are cut, so a recovered claim goes
/// back to `todo` under the shortened name.
pub fn processing_file_name(original: &str, machine: &str, claim_ms: i64) -> String {
    let stem = original.strip_suffix(".json").unwrap_or(original);
    format!(
        "{}__{}__{claim_ms}.json",
        truncate_stem(stem),
        sanitize_name_part(machine)
    )
}

fn truncate_stem(stem: &str) -> &str {
    if stem.len() <= MAX_STEM_BYTES {
        return stem;
    }
    let mut end = MAX_STEM_BYTES;
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    &stem[..end]
}

/// A parsed processing filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimName {
    pub original: String,
    pub machine: String,
    pub claim_ms: i64,
}

/// Inverse of [`processing_file_name`]. Splits from the right so a stem that
/// itself contains `__` still round-trips.
pub fn parse_processing_name(name: &str) -> Option<ClaimName> {
    let stem = name.strip_suffix(".json")?;
    let mut parts = stem.rsplitn(3, "__");
    let claim_ms = parts.next()?.parse().ok()?;
    let machine = parts.next()?.to_string();
    let original = parts.next()?;
    if original.is_empty() || machine.is_empty() {
        return None;
    }
    Some(ClaimName {
        original: format!("{original}.json"),
        machine,
        claim_ms,
    })
}
