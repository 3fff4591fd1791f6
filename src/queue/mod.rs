//! File-based distributed task queue.
//!
//! Tasks move `todo → processing → completed` by rename. Every worker that
//! shares the directories races for the same files; the one whose rename
//! succeeds owns the task.

pub mod fs;
pub mod task;
pub mod worker;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use self::fs::{QueueFs, Stage};
use self::task::{
    parse_processing_name, processing_file_name, sanitize_name_part, task_file_name,
    CompletedTask, TaskError, TaskResult,
};

/// Payload of a claimed file.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// Not valid JSON. Kept verbatim so the completed record shows what arrived.
    Malformed { raw: String, error: String },
}

impl Payload {
    fn parse(bytes: &[u8]) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(value) => Payload::Json(value),
            Err(e) => Payload::Malformed {
                raw: String::from_utf8_lossy(bytes).into_owned(),
                error: e.to_string(),
            },
        }
    }

    fn to_record_value(&self) -> Value {
        match self {
            Payload::Json(value) => value.clone(),
            Payload::Malformed { raw, .. } => Value::String(raw.clone()),
        }
    }
}

/// A task this process now owns.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub original_name: String,
    pub processing_name: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub todo: usize,
    pub processing: usize,
    pub completed: usize,
}

#[derive(Clone)]
pub struct TaskQueue {
    fs: Arc<dyn QueueFs>,
    machine: String,
}

const MAX_SUBMIT_ATTEMPTS: usize = 1_000;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl TaskQueue {
    pub fn new(fs: Arc<dyn QueueFs>, machine: &str) -> Self {
        Self {
            fs,
            machine: sanitize_name_part(machine),
        }
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// Claim the first claimable task in `todo`, if any.
    ///
    /// Losing a race to another worker is `Ok(None)` for this round, not an
    /// error. A file that cannot be read or renamed is quarantined into
    /// `completed` with an error result and the next name is tried, so one
    /// bad file never blocks the rest. Only failing to list `todo` is fatal.
    pub fn claim_next(&self) -> Result<Option<ClaimedTask>> {
        let names = self
            .fs
            .list(Stage::Todo)
            .context("Failed to list todo tasks")?;
        for name in &names {
            match self.try_claim(name) {
                Ok(claimed) => return Ok(claimed),
                Err(e) => {
                    tracing::warn!("Skipping unclaimable task {name}: {e:#}");
                    self.quarantine(name, &e);
                }
            }
        }
        Ok(None)
    }

    /// Try to take ownership of one named file in `todo`.
    pub fn try_claim(&self, name: &str) -> Result<Option<ClaimedTask>> {
        let bytes = match self.fs.read(Stage::Todo, name) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Task {name} vanished before read");
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read task {name}")),
        };

        let processing_name = processing_file_name(name, &self.machine, now_ms());
        match self
            .fs
            .rename(Stage::Todo, name, Stage::Processing, &processing_name)
        {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Task {name} claimed by another worker");
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to claim task {name}")),
        }

        tracing::info!("Claimed {name} as {processing_name}");
        Ok(Some(ClaimedTask {
            original_name: name.to_string(),
            processing_name,
            payload: Payload::parse(&bytes),
        }))
    }

    /// Retire a todo file that cannot be claimed: record an error result in
    /// `completed`, then delete the original. If either step fails the file
    /// stays in `todo` and is skipped again next round.
    fn quarantine(&self, name: &str, cause: &anyhow::Error) {
        let task = match self.fs.read(Stage::Todo, name) {
            Ok(bytes) => Payload::parse(&bytes).to_record_value(),
            Err(_) => Value::String(name.to_string()),
        };
        let record = CompletedTask {
            task,
            result: TaskResult::error(format!("task could not be claimed: {cause:#}")),
            completed_at: Utc::now(),
            processed_by: self.machine.clone(),
        };
        let completed_name = processing_file_name(name, &self.machine, now_ms());

        let written = serde_json::to_vec_pretty(&record)
            .map_err(io::Error::from)
            .and_then(|bytes| self.fs.write_atomic(Stage::Completed, &completed_name, &bytes));
        if let Err(e) = written {
            tracing::warn!("Could not quarantine {name}: {e}");
            return;
        }

        match self.fs.remove(Stage::Todo, name) {
            Ok(()) => tracing::warn!("Quarantined {name} as completed/{completed_name}"),
            // Someone else dealt with it first
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let _ = self.fs.remove(Stage::Completed, &completed_name);
            }
            Err(e) => {
                tracing::warn!("Could not remove {name} from todo: {e}");
                let _ = self.fs.remove(Stage::Completed, &completed_name);
            }
        }
    }

    /// Record the result in `completed`, then drop the processing file.
    ///
    /// The completed record is written first so a crash in between leaves a
    /// duplicate, never a lost result.
    pub fn complete(&self, claimed: &ClaimedTask, result: TaskResult) -> Result<CompletedTask> {
        let record = CompletedTask {
            task: claimed.payload.to_record_value(),
            result,
            completed_at: Utc::now(),
            processed_by: self.machine.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;

        self.fs
            .write_atomic(Stage::Completed, &claimed.processing_name, &bytes)
            .with_context(|| format!("Failed to write result for {}", claimed.processing_name))?;

        match self.fs.remove(Stage::Processing, &claimed.processing_name) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Processing file {} already gone (requeued by lease recovery?)",
                    claimed.processing_name
                );
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to remove processing file {}", claimed.processing_name)
                })
            }
        }

        tracing::info!("Completed {}", claimed.original_name);
        Ok(record)
    }

    /// Enqueue a task. The payload must be an object with a string `type`;
    /// `created_at` is filled in when absent. Returns the file name in `todo`.
    pub fn submit(&self, mut payload: Value) -> Result<String> {
        let object = payload.as_object_mut().ok_or(TaskError::NotAnObject)?;
        let task_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(TaskError::MissingType)?
            .to_string();
        object
            .entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let bytes = serde_json::to_vec_pretty(&payload)?;

        // Same type in the same millisecond: bump the stamp until a name is free
        let mut stamp = now_ms();
        for _ in 0..MAX_SUBMIT_ATTEMPTS {
            let name = task_file_name(&task_type, stamp);
            match self.fs.create_new(Stage::Todo, &name, &bytes) {
                Ok(()) => {
                    tracing::info!("Submitted {name}");
                    return Ok(name);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to write task {name}"));
                }
            }
        }
        anyhow::bail!("No free task name for type {task_type} after {MAX_SUBMIT_ATTEMPTS} attempts")
    }

    /// Move claims older than `lease` back into `todo` under their original
    /// names. A zero lease disables recovery. Returns the number requeued.
    pub fn recover_stale(&self, lease: Duration) -> Result<usize> {
        if lease.is_zero() {
            return Ok(0);
        }
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        let now = now_ms();

        let names = self
            .fs
            .list(Stage::Processing)
            .context("Failed to list processing tasks")?;

        let mut requeued = 0;
        for name in names {
            let Some(claim) = parse_processing_name(&name) else {
                tracing::warn!("Ignoring unrecognized processing file {name}");
                continue;
            };
            if now.saturating_sub(claim.claim_ms) <= lease_ms {
                continue;
            }
            match self
                .fs
                .rename(Stage::Processing, &name, Stage::Todo, &claim.original)
            {
                Ok(()) => {
                    tracing::warn!(
                        "Requeued {} abandoned by {} ({}s old)",
                        claim.original,
                        claim.machine,
                        (now - claim.claim_ms) / 1000
                    );
                    requeued += 1;
                }
                // Completed or recovered by someone else in the meantime
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to requeue {name}"));
                }
            }
        }
        Ok(requeued)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        Ok(QueueCounts {
            todo: self.fs.list(Stage::Todo)?.len(),
            processing: self.fs.list(Stage::Processing)?.len(),
            completed: self.fs.list(Stage::Completed)?.len(),
        })
    }

    /// Read back a completed record.
    pub fn completed(&self, processing_name: &str) -> Result<CompletedTask> {
        let bytes = self
            .fs
            .read(Stage::Completed, processing_name)
            .with_context(|| format!("No completed record {processing_name}"))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::fs::MemoryFs;
    use super::task::processing_file_name;
    use super::*;
    use serde_json::json;

    fn queue_pair() -> (TaskQueue, TaskQueue, Arc<MemoryFs>) {
        let fs = Arc::new(MemoryFs::new());
        (
            TaskQueue::new(fs.clone(), "alpha"),
            TaskQueue::new(fs.clone(), "beta"),
            fs,
        )
    }

    /// Passes through to memory, except renames of one name fail the way an
    /// over-long path or a permissions problem would.
    struct StuckFileFs {
        inner: MemoryFs,
        stuck: String,
    }

    impl QueueFs for StuckFileFs {
        fn list(&self, stage: Stage) -> io::Result<Vec<String>> {
            self.inner.list(stage)
        }
        fn read(&self, stage: Stage, name: &str) -> io::Result<Vec<u8>> {
            self.inner.read(stage, name)
        }
        fn write_atomic(&self, stage: Stage, name: &str, contents: &[u8]) -> io::Result<()> {
            self.inner.write_atomic(stage, name, contents)
        }
        fn create_new(&self, stage: Stage, name: &str, contents: &[u8]) -> io::Result<()> {
            self.inner.create_new(stage, name, contents)
        }
        fn rename(&self, from: Stage, from_name: &str, to: Stage, to_name: &str) -> io::Result<()> {
            if from_name == self.stuck {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "File name too long (os error 36)",
                ));
            }
            self.inner.rename(from, from_name, to, to_name)
        }
        fn remove(&self, stage: Stage, name: &str) -> io::Result<()> {
            self.inner.remove(stage, name)
        }
    }

    #[test]
    fn test_claim_empty_queue() {
        let (a, _, _) = queue_pair();
        assert!(a.claim_next().unwrap().is_none());
    }

    #[test]
    fn test_only_one_worker_wins_a_task() {
        let (a, b, fs) = queue_pair();
        let name = a.submit(json!({"type": "ping"})).unwrap();

        // Both workers saw the same listing before either renamed
        let first = a.try_claim(&name).unwrap();
        let second = b.try_claim(&name).unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(fs.list(Stage::Todo).unwrap().is_empty());
        assert_eq!(fs.list(Stage::Processing).unwrap().len(), 1);
    }

    #[test]
    fn test_claims_in_name_order() {
        let (a, _, fs) = queue_pair();
        fs.write_atomic(Stage::Todo, "task_ping_2.json", b"{\"type\":\"ping\"}")
            .unwrap();
        fs.write_atomic(Stage::Todo, "task_ping_1.json", b"{\"type\":\"ping\"}")
            .unwrap();

        let claimed = a.claim_next().unwrap().unwrap();
        assert_eq!(claimed.original_name, "task_ping_1.json");
        assert!(claimed.processing_name.starts_with("task_ping_1__alpha__"));
    }

    #[test]
    fn test_complete_writes_record_then_removes_claim() {
        let (a, _, fs) = queue_pair();
        a.submit(json!({"type": "ping", "message": "hi"})).unwrap();
        let claimed = a.claim_next().unwrap().unwrap();

        let record = a
            .complete(&claimed, TaskResult::success(json!({"pong": "hi"})))
            .unwrap();

        assert!(fs.list(Stage::Processing).unwrap().is_empty());
        assert_eq!(
            fs.list(Stage::Completed).unwrap(),
            vec![claimed.processing_name.clone()]
        );
        assert_eq!(a.completed(&claimed.processing_name).unwrap(), record);
        assert_eq!(record.processed_by, "alpha");
        assert_eq!(record.task["message"], "hi");
        assert!(record.task["created_at"].is_string());
    }

    #[test]
    fn test_malformed_payload_is_still_claimed() {
        let (a, _, fs) = queue_pair();
        fs.write_atomic(Stage::Todo, "task_bad_1.json", b"{not json")
            .unwrap();

        let claimed = a.claim_next().unwrap().unwrap();
        assert!(matches!(claimed.payload, Payload::Malformed { .. }));

        let record = a
            .complete(&claimed, TaskResult::error("bad payload"))
            .unwrap();
        assert_eq!(record.task, Value::String("{not json".into()));
        assert!(fs.list(Stage::Todo).unwrap().is_empty());
    }

    #[test]
    fn test_unclaimable_file_is_quarantined_and_next_task_claimed() {
        let stuck = format!("task_{}_1.json", "a".repeat(215));
        let fs = Arc::new(StuckFileFs {
            inner: MemoryFs::new(),
            stuck: stuck.clone(),
        });
        let queue = TaskQueue::new(fs.clone(), "alpha");
        let long_type = "a".repeat(215);
        fs.write_atomic(Stage::Todo, &stuck, json!({"type": &long_type}).to_string().as_bytes())
            .unwrap();
        fs.write_atomic(Stage::Todo, "task_ping_2.json", b"{\"type\":\"ping\"}")
            .unwrap();

        let claimed = queue.claim_next().unwrap().unwrap();
        assert_eq!(claimed.original_name, "task_ping_2.json");
        assert!(fs.list(Stage::Todo).unwrap().is_empty());

        let completed = fs.list(Stage::Completed).unwrap();
        assert_eq!(completed.len(), 1);
        let record = queue.completed(&completed[0]).unwrap();
        assert_eq!(record.task["type"], long_type.as_str());
        let TaskResult::Error { error } = &record.result else {
            panic!("expected an error result, got {:?}", record.result);
        };
        assert!(error.contains("could not be claimed"), "{error}");
        assert!(error.contains("os error 36"), "{error}");
    }

    #[test]
    fn test_lost_race_is_not_an_error() {
        let (a, _, _) = queue_pair();
        assert!(a.try_claim("task_ping_9.json").unwrap().is_none());
    }

    #[test]
    fn test_submit_validates_type() {
        let (a, _, _) = queue_pair();
        assert!(a.submit(json!({"query": "x"})).is_err());
        assert!(a.submit(json!("ping")).is_err());
    }

    #[test]
    fn test_submit_never_overwrites() {
        let (a, _, fs) = queue_pair();
        let first = a.submit(json!({"type": "ping"})).unwrap();
        let second = a.submit(json!({"type": "ping"})).unwrap();
        assert_ne!(first, second);
        assert_eq!(fs.list(Stage::Todo).unwrap().len(), 2);
    }

    #[test]
    fn test_submit_skips_names_already_taken() {
        let (a, _, fs) = queue_pair();
        let start = now_ms();
        for stamp in start..start + 20 {
            fs.write_atomic(Stage::Todo, &task_file_name("ping", stamp), b"taken")
                .unwrap();
        }

        let name = a.submit(json!({"type": "ping"})).unwrap();

        let todo = fs.list(Stage::Todo).unwrap();
        assert_eq!(todo.len(), 21);
        for other in todo.iter().filter(|n| **n != name) {
            assert_eq!(fs.read(Stage::Todo, other).unwrap(), b"taken");
        }
        let submitted: Value = serde_json::from_slice(&fs.read(Stage::Todo, &name).unwrap()).unwrap();
        assert_eq!(submitted["type"], "ping");
    }

    #[test]
    fn test_recover_stale_requeues_old_claims_only() {
        let (a, _, fs) = queue_pair();
        let old = processing_file_name("task_ping_1.json", "gone-host", 1_000);
        let fresh = processing_file_name("task_ping_2.json", "live-host", now_ms());
        fs.write_atomic(Stage::Processing, &old, b"{\"type\":\"ping\"}")
            .unwrap();
        fs.write_atomic(Stage::Processing, &fresh, b"{\"type\":\"ping\"}")
            .unwrap();

        let requeued = a.recover_stale(Duration::from_secs(60)).unwrap();

        assert_eq!(requeued, 1);
        assert_eq!(fs.list(Stage::Todo).unwrap(), vec!["task_ping_1.json"]);
        assert_eq!(fs.list(Stage::Processing).unwrap(), vec![fresh]);
    }

    #[test]
    fn test_zero_lease_disables_recovery() {
        let (a, _, fs) = queue_pair();
        let old = processing_file_name("task_ping_1.json", "gone-host", 1_000);
        fs.write_atomic(Stage::Processing, &old, b"{}").unwrap();

        assert_eq!(a.recover_stale(Duration::ZERO).unwrap(), 0);
        assert_eq!(fs.list(Stage::Processing).unwrap().len(), 1);
    }

    #[test]
    fn test_counts() {
        let (a, _, _) = queue_pair();
        a.submit(json!({"type": "ping"})).unwrap();
        a.submit(json!({"type": "wait"})).unwrap();
        let claimed = a.claim_next().unwrap().unwrap();
        a.complete(&claimed, TaskResult::success(json!(null))).unwrap();

        assert_eq!(
            a.counts().unwrap(),
            QueueCounts {
                todo: 1,
                processing: 0,
                completed: 1
            }
        );
    }
}
