pub mod archive;
pub mod mirror;

use crate::backup::change_set::ChangeSet;
use crate::backup::output::archive::{ArchiveConfig, ArchiveNaming};
use crate::backup::output::mirror::MirrorWriter;
use crate::backup::progress::WriteProgress;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddDebugObjectAndFnName;
use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::result;
use validator::{Validate, ValidationErrors};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Archive,
    MirrorSnapshot,
}

/// What a successful write left at the destination.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct BackupArtifact {
    #[getset(get = "pub")]
    path: PathBuf,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    kind: ArtifactKind,
}

impl BackupArtifact {
    pub fn new<P: Into<PathBuf>>(path: P, created_at: DateTime<Utc>, kind: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            created_at,
            kind,
        }
    }
}

/// Output strategy, chosen independently of full or incremental selection.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "Mode")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum OutputConfig {
    /// One timestamped compressed tar per run, pruned by count.
    Archive(ArchiveConfig),
    /// A single tree at the destination, overwritten in place. Files removed
    /// from the source are left in the mirror.
    Mirror,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig::Archive(ArchiveConfig::default())
    }
}

impl Validate for OutputConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            OutputConfig::Archive(archive) => archive.validate(),
            OutputConfig::Mirror => Ok(()),
        }
    }
}

impl OutputConfig {
    /// Naming pattern of retained artifacts, `None` when nothing is pruned.
    pub fn naming(&self) -> Option<ArchiveNaming> {
        match self {
            OutputConfig::Archive(archive) => Some(archive.naming()),
            OutputConfig::Mirror => None,
        }
    }
}

pub trait ArtifactWriter {
    /// Materializes `change_set` under `destination`. `started_at` names the
    /// artifact; `progress` is bumped once per file written.
    fn write_artifact(
        &self,
        change_set: &ChangeSet,
        destination: &Path,
        started_at: DateTime<Utc>,
        progress: &WriteProgress,
    ) -> Result<BackupArtifact>;
}

impl ArtifactWriter for OutputConfig {
    fn write_artifact(
        &self,
        change_set: &ChangeSet,
        destination: &Path,
        started_at: DateTime<Utc>,
        progress: &WriteProgress,
    ) -> Result<BackupArtifact> {
        ensure_destination(destination)
            .and_then(|_| match self {
                OutputConfig::Archive(archive) => {
                    archive.write_artifact(change_set, destination, started_at, progress)
                }
                OutputConfig::Mirror => {
                    MirrorWriter.write_artifact(change_set, destination, started_at, progress)
                }
            })
            .add_debug_object_and_fn_name(self.clone(), "write_artifact")
    }
}

/// The destination is never created; it may have vanished since validation.
fn ensure_destination(destination: &Path) -> Result<()> {
    if destination.is_dir() {
        return Ok(());
    }
    Err(Error::destination_unavailable(
        destination,
        "no longer an accessible directory",
    ))
}
