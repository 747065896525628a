//! One backup run from a loaded configuration to a final [`BackupRunResult`].
//!
//! ```text
//! Idle -> Validating -> Selecting -> Writing -> Persisting -> Pruning -> Done
//!             |             |           |           |
//!             +-------------+-----------+-----------+--> Failed
//!                           +--> NoChanges
//! ```
//!
//! The watermark is captured when selection starts and committed only after
//! the artifact is complete, so files modified during a run are picked up by
//! the next one. Retention runs last and can only add warnings.

use crate::backup::backup_config::BackupConfig;
use crate::backup::clock::{Clock, SystemClock};
use crate::backup::function_path;
use crate::backup::lock::RunLock;
use crate::backup::output::{ArtifactWriter, BackupArtifact};
use crate::backup::progress::{Heartbeat, LogProgressObserver, WriteProgress};
use crate::backup::result_error::error::{Error, ErrorKind};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::retention::prune;
use crate::backup::state::StatePersister;
use crate::backup::validate::{check_destination_volume, check_source_readable};
use chrono::{DateTime, SubsecRound, Utc};
use function_name::named;
use getset::{CopyGetters, Getters};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Selecting,
    Writing,
    Persisting,
    Pruning,
    Done,
    Failed,
    NoChanges,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    NoChanges,
    Failed,
}

#[derive(Debug, Getters, CopyGetters)]
pub struct BackupRunResult {
    #[getset(get_copy = "pub")]
    status: RunStatus,
    /// Last state reached; for failures, the state the error happened in.
    #[getset(get_copy = "pub")]
    failed_in: Option<RunState>,
    #[getset(get = "pub")]
    artifact: Option<BackupArtifact>,
    #[getset(get = "pub")]
    error: Option<Error>,
    #[getset(get_copy = "pub")]
    files_written: u64,
    #[getset(get_copy = "pub")]
    bytes_written: u64,
    #[getset(get = "pub")]
    deleted: Vec<PathBuf>,
    #[getset(get = "pub")]
    warnings: Vec<Error>,
    /// Watermark committed by this run.
    #[getset(get_copy = "pub")]
    watermark: Option<DateTime<Utc>>,
}

impl BackupRunResult {
    fn failed(state: RunState, error: Error) -> Self {
        Self {
            status: RunStatus::Failed,
            failed_in: Some(state),
            artifact: None,
            error: Some(error),
            files_written: 0,
            bytes_written: 0,
            deleted: Vec::new(),
            warnings: Vec::new(),
            watermark: None,
        }
    }

    fn no_changes() -> Self {
        Self {
            status: RunStatus::NoChanges,
            failed_in: None,
            artifact: None,
            error: None,
            files_written: 0,
            bytes_written: 0,
            deleted: Vec::new(),
            warnings: Vec::new(),
            watermark: None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(Error::kind)
    }

    /// Process exit code: 0 unless the run failed.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success | RunStatus::NoChanges => 0,
            RunStatus::Failed => 1,
        }
    }
}

pub struct Orchestrator {
    config: BackupConfig,
    persister: Box<dyn StatePersister>,
    clock: Arc<dyn Clock>,
    heartbeat: Heartbeat,
    state: RunState,
}

impl Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Rejects an invalid configuration before any run can start.
    pub fn new(config: BackupConfig, persister: Box<dyn StatePersister>) -> Result<Self> {
        let config = config.validated()?;
        config.retained_backups()?;
        let heartbeat = Heartbeat::new(config.heartbeat_interval(), Arc::new(LogProgressObserver));
        Ok(Self {
            config,
            persister,
            clock: Arc::new(SystemClock),
            heartbeat,
            state: RunState::Idle,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn enter(&mut self, state: RunState) {
        info!("Backup run {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Write start time whose archive name is still free. Names have one
    /// second resolution, so a run right after another one waits for the
    /// next second instead of colliding.
    fn free_artifact_time(&self) -> DateTime<Utc> {
        let mut started_at = self.clock.now();
        let Some(naming) = self.config.output().naming() else {
            return started_at;
        };
        let destination = self.config.backup_directory();
        while destination.join(naming.file_name(started_at)).exists() {
            let next_second = started_at.trunc_subsecs(0) + chrono::Duration::seconds(1);
            debug!("{} exists, waiting for {}", naming.file_name(started_at), next_second);
            std::thread::sleep((next_second - self.clock.now()).to_std().unwrap_or_default());
            started_at = self.clock.now().max(next_second);
        }
        started_at
    }

    fn fail(&mut self, error: Error) -> BackupRunResult {
        let failed_in = self.state;
        error!("Backup run failed while {:?}: {}", failed_in, error);
        self.state = RunState::Failed;
        BackupRunResult::failed(failed_in, error)
    }

    /// Executes one run. Never panics on I/O; every failure is reported in
    /// the returned result.
    #[named]
    pub fn run(&mut self) -> BackupRunResult {
        self.state = RunState::Idle;
        let _lock = match RunLock::acquire(self.persister.lock_path()) {
            Ok(lock) => lock,
            Err(e) => return self.fail(e.add_fn_name(function_path!())),
        };

        self.enter(RunState::Validating);
        if let Err(e) = check_source_readable(self.config.source_directory())
            .and_then(|_| check_destination_volume(self.config.backup_directory()))
        {
            return self.fail(e);
        }

        self.enter(RunState::Selecting);
        let watermark = self.clock.now();
        let change_set = match self
            .config
            .change_set_selector()
            .and_then(|selector| selector.select())
        {
            Ok(change_set) => change_set,
            Err(e) => return self.fail(e),
        };
        if change_set.is_empty() {
            info!("No files to back up since {:?}", self.config.last_backup_date());
            self.enter(RunState::NoChanges);
            return BackupRunResult::no_changes();
        }

        self.enter(RunState::Writing);
        let progress = WriteProgress::new(change_set.len() as u64, change_set.total_bytes());
        let started_at = self.free_artifact_time();
        let output = self.config.output();
        let destination = self.config.backup_directory();
        let written = self.heartbeat.run(&progress, || {
            output.write_artifact(&change_set, destination, started_at, &progress)
        });
        let artifact = match written {
            Ok(artifact) => artifact,
            Err(e) => return self.fail(e),
        };
        info!(
            "Wrote {} files, {} bytes to {:?}",
            progress.files_written(),
            progress.bytes_written(),
            artifact.path()
        );

        self.enter(RunState::Persisting);
        if let Err(e) = self.persister.commit(&self.config, watermark) {
            // The artifact is complete and stays; the next run redoes the work.
            let mut result = self.fail(e);
            result.artifact = Some(artifact);
            result.files_written = progress.files_written();
            result.bytes_written = progress.bytes_written();
            return result;
        }
        self.config = self.config.with_last_backup_date(watermark);

        let mut result = BackupRunResult {
            status: RunStatus::Success,
            failed_in: None,
            artifact: Some(artifact),
            error: None,
            files_written: progress.files_written(),
            bytes_written: progress.bytes_written(),
            deleted: Vec::new(),
            warnings: Vec::new(),
            watermark: Some(watermark),
        };

        if let Some(naming) = self.config.output().naming() {
            self.enter(RunState::Pruning);
            match self.config.retained_backups() {
                Ok(keep) => {
                    let report = prune(self.config.backup_directory(), &naming, keep);
                    result.deleted = report.deleted;
                    result.warnings = report.warnings;
                }
                Err(e) => result.warnings.push(e),
            }
            for w in &result.warnings {
                warn!("{w}");
            }
        }

        self.enter(RunState::Done);
        result
    }
}
