//! Storage behind the task queue.
//!
//! `LocalFs` maps each stage to a directory under a shared root. Exclusive
//! claims rely on `rename` being atomic, which only holds within a single
//! volume; file-sync tools with eventually-consistent listings can let two
//! hosts both believe they won. `MemoryFs` gives the same semantics in memory.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Todo,
    Processing,
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Todo, Stage::Processing, Stage::Completed];

    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Todo => "todo",
            Stage::Processing => "processing",
            Stage::Completed => "completed",
        }
    }
}

pub trait QueueFs: Send + Sync {
    /// Task files (`*.json`, not hidden) in `stage`, sorted by name.
    fn list(&self, stage: Stage) -> io::Result<Vec<String>>;

    fn read(&self, stage: Stage, name: &str) -> io::Result<Vec<u8>>;

    /// Replace `name` so readers never observe a partially written file.
    fn write_atomic(&self, stage: Stage, name: &str, contents: &[u8]) -> io::Result<()>;

    /// Like `write_atomic`, but fails with `AlreadyExists` instead of
    /// replacing a file that is already there.
    fn create_new(&self, stage: Stage, name: &str, contents: &[u8]) -> io::Result<()>;

    /// Atomic move. Fails with `NotFound` when the source is already gone.
    fn rename(&self, from: Stage, from_name: &str, to: Stage, to_name: &str) -> io::Result<()>;

    fn remove(&self, stage: Stage, name: &str) -> io::Result<()>;
}

fn is_task_file(name: &str) -> bool {
    name.ends_with(".json") && !name.starts_with('.')
}

/// Directories on disk: `<root>/todo`, `<root>/processing`, `<root>/completed`.
pub struct LocalFs {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl LocalFs {
    /// Open a queue root, creating the stage directories if needed.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for stage in Stage::ALL {
            fs::create_dir_all(root.join(stage.dir_name()))?;
        }
        Ok(Self {
            root,
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, stage: Stage, name: &str) -> PathBuf {
        self.root.join(stage.dir_name()).join(name)
    }

    /// Write `contents` to a fresh hidden file in `stage`. The temp name is
    /// short and unique per process, whatever the length of the final name.
    fn write_temp(&self, stage: Stage, contents: &[u8]) -> io::Result<PathBuf> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.path(stage, &format!(".{}-{seq}.tmp", std::process::id()));
        fs::write(&tmp, contents)?;
        Ok(tmp)
    }
}

impl QueueFs for LocalFs {
    fn list(&self, stage: Stage) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root.join(stage.dir_name()))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                if is_task_file(&name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, stage: Stage, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(stage, name))
    }

    fn write_atomic(&self, stage: Stage, name: &str, contents: &[u8]) -> io::Result<()> {
        let tmp = self.write_temp(stage, contents)?;
        if let Err(e) = fs::rename(&tmp, self.path(stage, name)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }

    fn create_new(&self, stage: Stage, name: &str, contents: &[u8]) -> io::Result<()> {
        // A hard link never replaces its target, unlike rename
        let tmp = self.write_temp(stage, contents)?;
        let linked = fs::hard_link(&tmp, self.path(stage, name));
        let _ = fs::remove_file(&tmp);
        linked
    }

    fn rename(&self, from: Stage, from_name: &str, to: Stage, to_name: &str) -> io::Result<()> {
        fs::rename(self.path(from, from_name), self.path(to, to_name))
    }

    fn remove(&self, stage: Stage, name: &str) -> io::Result<()> {
        fs::remove_file(self.path(stage, name))
    }
}

/// In-memory stand-in with the same atomicity guarantees as `LocalFs`.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<(Stage, String), Vec<u8>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(stage: Stage, name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}/{name} not found", stage.dir_name()),
    )
}

impl QueueFs for MemoryFs {
    fn list(&self, stage: Stage) -> io::Result<Vec<String>> {
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|(s, name)| *s == stage && is_task_file(name))
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn read(&self, stage: Stage, name: &str) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .get(&(stage, name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(stage, name))
    }

    fn write_atomic(&self, stage: Stage, name: &str, contents: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .insert((stage, name.to_string()), contents.to_vec());
        Ok(())
    }

    fn create_new(&self, stage: Stage, name: &str, contents: &[u8]) -> io::Result<()> {
        let mut files = self.files.lock();
        let key = (stage, name.to_string());
        if files.contains_key(&key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{}/{name} already exists", stage.dir_name()),
            ));
        }
        files.insert(key, contents.to_vec());
        Ok(())
    }

    fn rename(&self, from: Stage, from_name: &str, to: Stage, to_name: &str) -> io::Result<()> {
        let mut files = self.files.lock();
        let contents = files
            .remove(&(from, from_name.to_string()))
            .ok_or_else(|| not_found(from, from_name))?;
        files.insert((to, to_name.to_string()), contents);
        Ok(())
    }

    fn remove(&self, stage: Stage, name: &str) -> io::Result<()> {
        self.files
            .lock()
            .remove(&(stage, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(stage, name))
    }
}
