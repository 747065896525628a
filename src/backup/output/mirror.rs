use crate::backup::change_set::ChangeSet;
use crate::backup::output::{ArtifactKind, ArtifactWriter, BackupArtifact};
use crate::backup::progress::WriteProgress;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::path::Path;

/// Copies each selected file to the same relative path under the destination.
///
/// Existing copies are overwritten; files that disappeared from the source
/// stay in the mirror. A failure mid-run leaves the copies made so far.
#[derive(Clone, Copy, Debug, Default)]
pub struct MirrorWriter;

impl ArtifactWriter for MirrorWriter {
    fn write_artifact(
        &self,
        change_set: &ChangeSet,
        destination: &Path,
        started_at: DateTime<Utc>,
        progress: &WriteProgress,
    ) -> Result<BackupArtifact> {
        tracing::info!("Mirroring {} files to {:?}", change_set.len(), destination);
        for record in change_set.files() {
            let src = change_set.absolute_path(record);
            let dst = destination.join(record.relative_path());
            copy_file(&src, &dst).map_err(|e| Error::write(&dst, e))?;
            tracing::trace!("Copied {:?} -> {:?}", src, dst);
            progress.record_file(record.size_bytes());
        }

        Ok(BackupArtifact::new(
            destination,
            started_at,
            ArtifactKind::MirrorSnapshot,
        ))
    }
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst)?;
    let modified = std::fs::metadata(src)?.modified()?;
    File::options().write(true).open(dst)?.set_modified(modified)?;
    Ok(())
}
