//! Persisted run state and the run lock.
//!
//! The record lives at `<dir>/run-state.json` and is rewritten after
//! every transition. A fresh run moves the previous record to
//! `<dir>/runs/<run-id>.json` so past runs stay available for
//! auditing.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, ProvisionResult};
use crate::plan::Plan;

pub const STATE_FILE: &str = "run-state.json";
pub const LOCK_FILE: &str = "run-state.lock";
pub const ARCHIVE_DIR: &str = "runs";

const SYSTEM_STATE_DIR: &str = "/var/lib/alicerce";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Skipped,
    Failed,
}

impl StepStatus {
    /// Whether dependents may run after this step.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Completed,
    Halted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Halted => "halted",
        };
        f.write_str(s)
    }
}

/// Manual follow-up left by a step that completed in degraded mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredAction {
    pub notice: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub label: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred: Option<DeferredAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Set when an earlier success was re-checked on resume.
    #[serde(default)]
    pub reverified: bool,
    /// Dependencies that kept this step from running.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
}

impl StepResult {
    #[must_use]
    pub fn pending(step_id: &str, label: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            label: label.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
            remedy: None,
            deferred: None,
            warnings: Vec::new(),
            reverified: false,
            blocked_by: Vec::new(),
        }
    }

    /// Clear the outcome of an earlier attempt before running again.
    pub fn begin(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.error = None;
        self.remedy = None;
        self.deferred = None;
        self.warnings.clear();
        self.blocked_by.clear();
    }

    pub fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &ProvisionError, remedy: Option<String>) {
        self.error = Some(error.to_string());
        self.remedy = remedy;
        self.finish(StepStatus::Failed);
    }

    pub fn block(&mut self, blocked_by: Vec<String>) {
        self.status = StepStatus::Pending;
        self.blocked_by = blocked_by;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub id: String,
    pub host: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// How many times the plan was started or resumed.
    pub attempts: u32,
    pub steps: Vec<StepResult>,
}

impl RunState {
    /// A fresh record with one pending result per planned step.
    #[must_use]
    pub fn new(host: &str, plan: &Plan<'_>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{host}-{}", now.format("%Y%m%dT%H%M%SZ")),
            host: host.to_string(),
            status: RunStatus::NotStarted,
            created_at: now,
            updated_at: now,
            attempts: 0,
            steps: plan
                .steps()
                .iter()
                .map(|s| StepResult::pending(&s.id, &s.label))
                .collect(),
        }
    }

    #[must_use]
    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|r| r.step_id == step_id)
    }

    /// Align a loaded record with the current plan: keep results of
    /// known steps, add pending results for new ones, drop results of
    /// steps no longer planned, and follow plan order.
    pub fn align_with(&mut self, plan: &Plan<'_>) {
        let mut previous = std::mem::take(&mut self.steps);
        self.steps = plan
            .steps()
            .iter()
            .map(|def| {
                previous
                    .iter()
                    .position(|r| r.step_id == def.id)
                    .map_or_else(
                        || StepResult::pending(&def.id, &def.label),
                        |i| previous.swap_remove(i),
                    )
            })
            .collect();
    }

    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|r| r.status == status).count()
    }

    /// Every step succeeded or was already in place.
    #[must_use]
    pub fn all_done(&self) -> bool {
        self.steps.iter().all(|r| r.status.is_done())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Directory holding the run-state record, its lock and the archive.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    #[must_use]
    pub fn archive_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(ARCHIVE_DIR).join(format!("{run_id}.json"))
    }

    /// The current record, `None` if no run was recorded yet.
    pub fn load(&self) -> ProvisionResult<Option<RunState>> {
        let path = self.state_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No run state at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str(&content)?;
        log::debug!("Loaded run state from {}", path.display());
        Ok(Some(state))
    }

    /// Write the record through a temporary file so a crash never
    /// leaves a truncated record behind.
    pub fn save(&self, state: &RunState) -> ProvisionResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.state_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        fs::rename(&tmp, &path)?;
        log::debug!("Saved run state to {}", path.display());
        Ok(())
    }

    /// Move the current record into the archive.
    pub fn archive(&self, state: &RunState) -> ProvisionResult<PathBuf> {
        let target = self.archive_path(&state.id);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, serde_json::to_string_pretty(state)?)?;
        match fs::remove_file(self.state_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        log::info!("Archived run {} to {}", state.id, target.display());
        Ok(target)
    }

    pub fn lock(&self) -> ProvisionResult<RunLock> {
        fs::create_dir_all(&self.dir)?;
        RunLock::acquire(&self.lock_path())
    }
}

/// Exclusive claim on a run-state record. The OS lock lives as long
/// as the open file, so it is released on drop or when the process dies.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    /// Take an exclusive lock on the lock file and record our pid in
    /// it. The file itself is never removed: the lock is what counts,
    /// its content is only a hint for operators.
    pub fn acquire(path: &Path) -> ProvisionResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(ProvisionError::RunAlreadyInProgress {
                    lock: path.to_path_buf(),
                });
            }
            return Err(e.into());
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        log::debug!("Acquired run lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// System-wide state directory for root, a per-user one otherwise.
#[must_use]
pub fn default_state_dir(is_root: bool) -> PathBuf {
    if is_root {
        return PathBuf::from(SYSTEM_STATE_DIR);
    }
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map_or_else(|| PathBuf::from(".alicerce"), |d| d.join("alicerce"))
}
