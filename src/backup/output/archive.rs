use crate::backup::change_set::ChangeSet;
use crate::backup::compress::{CompressorBuilder, CompressorConfig};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::output::{ArtifactKind, ArtifactWriter, BackupArtifact};
use crate::backup::progress::WriteProgress;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::validate_valid_archive_prefix;
use chrono::{DateTime, NaiveDateTime, Utc};
use function_name::named;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::Path;
use validator::Validate;

/// Sortable timestamp embedded in archive names, always UTC.
pub static ARCHIVE_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";
static DEFAULT_ARCHIVE_PREFIX: &str = "Backup";
static TAR_FILE_EXT: &str = "tar";
static TMP_FILE_EXT: &str = "tmp";

fn default_prefix() -> String {
    DEFAULT_ARCHIVE_PREFIX.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    #[serde(default = "default_prefix")]
    #[validate(custom(function = validate_valid_archive_prefix))]
    prefix: String,
    #[serde(default)]
    #[validate(nested)]
    compressor: CompressorConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_PREFIX, CompressorConfig::default())
    }
}

impl FileExtProvider for ArchiveConfig {
    fn file_ext(&self) -> Option<&'static str> {
        Some(TAR_FILE_EXT)
    }
}

impl ArchiveConfig {
    pub fn new<S: Into<String>>(prefix: S, compressor: CompressorConfig) -> Self {
        Self {
            prefix: prefix.into(),
            compressor,
        }
    }

    pub fn naming(&self) -> ArchiveNaming {
        let extension = self
            .file_ext()
            .into_iter()
            .chain(self.compressor.file_ext())
            .join(".");
        ArchiveNaming::new(self.prefix.as_str(), extension)
    }

    fn write_tar(&self, change_set: &ChangeSet, tmp_path: &Path, progress: &WriteProgress) -> Result<()> {
        let mut writer = File::create_new(tmp_path)
            .map(BufWriter::new)
            .map_err(Error::from)
            .and_then(|f| self.compressor.build_compressor(f))
            .map(BufWriter::new)
            .map(tar::Builder::new)?;

        for record in change_set.files() {
            let src = change_set.absolute_path(record);
            writer
                .append_path_with_name(&src, record.relative_path())
                .map_err(Error::from)
                .add_msg(format!("Appending {src:?}"))?;
            progress.record_file(record.size_bytes());
        }

        let file = writer
            .into_inner()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        file.sync_all()?;

        Ok(())
    }
}

impl ArtifactWriter for ArchiveConfig {
    #[named]
    fn write_artifact(
        &self,
        change_set: &ChangeSet,
        destination: &Path,
        started_at: DateTime<Utc>,
        progress: &WriteProgress,
    ) -> Result<BackupArtifact> {
        let file_name = self.naming().file_name(started_at);
        let file_path = destination.join(&file_name);
        if file_path.exists() {
            return Err(Error::write(
                &file_path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "archive already exists"),
            ));
        }

        let file_path_tmp = destination.join(format!("{file_name}.{TMP_FILE_EXT}"));
        tracing::info!("Writing {} files to {:?}", change_set.len(), &file_path_tmp);

        self.write_tar(change_set, &file_path_tmp, progress)
            .and_then(|_| std::fs::rename(&file_path_tmp, &file_path).map_err(Error::from))
            .map(|_| BackupArtifact::new(&file_path, started_at, ArtifactKind::Archive))
            .map_err(|mut e| {
                if file_path_tmp.exists() {
                    if let Err(e2) = std::fs::remove_file(&file_path_tmp) {
                        e = e.chain(Error::from(e2).add_msg("Delete tmp file failed."));
                    }
                }
                Error::write(&file_path, e).add_fn_name(function_path!())
            })
    }
}

/// `<prefix>-<yyyyMMdd-HHmmss>.<extension>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveNaming {
    prefix: String,
    extension: String,
}

impl ArchiveNaming {
    pub fn new<S1: Into<String>, S2: Into<String>>(prefix: S1, extension: S2) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn file_name(&self, dt: DateTime<Utc>) -> String {
        format!(
            "{}-{}.{}",
            self.prefix,
            dt.format(ARCHIVE_TIME_FORMAT),
            self.extension
        )
    }

    /// Timestamp encoded in `file_path`, or `None` when the name does not
    /// follow this pattern.
    pub fn date_time_of<P: AsRef<Path>>(&self, file_path: P) -> Option<DateTime<Utc>> {
        let file_name = file_path.as_ref().file_name()?.to_str()?;
        let time_string = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('-')?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?;

        NaiveDateTime::parse_from_str(time_string, ARCHIVE_TIME_FORMAT)
            .ok()
            .map(|dt| dt.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::change_set::{FileRecord, SelectionMode};
    use crate::backup::compress::xz::XzConfig;
    use crate::backup::result_error::error::ErrorKind;
    use chrono::TimeZone;
    use std::io::Read;
    use tempfile::TempDir;

    fn started_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 14, 30, 5).unwrap()
    }

    fn source_fixture() -> (TempDir, ChangeSet) {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("sub")).unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "A").unwrap();
        std::fs::write(temp_dir.path().join("sub/b.txt"), "BB").unwrap();
        let change_set = ChangeSet::new(
            temp_dir.path(),
            SelectionMode::Full,
            vec![
                FileRecord::new("a.txt", started_at(), 1),
                FileRecord::new("sub/b.txt", started_at(), 2),
            ],
        );
        (temp_dir, change_set)
    }

    fn tar_entries<R: Read>(reader: R) -> Vec<String> {
        tar::Archive::new(reader)
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().replace('\\', "/"))
            .sorted()
            .collect()
    }

    #[test]
    fn test_naming_round_trip_and_rejects_foreign_names() {
        let naming = ArchiveNaming::new("Backup", "tar.xz");
        let name = naming.file_name(started_at());
        assert_eq!(name, "Backup-20261018-143005.tar.xz");
        assert_eq!(naming.date_time_of(&name), Some(started_at()));

        assert_eq!(naming.date_time_of("Backup-20261018-143005.tar.xz.tmp"), None);
        assert_eq!(naming.date_time_of("Backup-20261018-143005.tar"), None);
        assert_eq!(naming.date_time_of("Other-20261018-143005.tar.xz"), None);
        assert_eq!(naming.date_time_of("Backup-garbage.tar.xz"), None);
    }

    #[test]
    fn test_names_sort_by_time() {
        let naming = ArchiveNaming::new("Backup", "tar");
        let earlier = naming.file_name(Utc.with_ymd_and_hms(2026, 9, 30, 23, 0, 0).unwrap());
        let later = naming.file_name(started_at());
        assert!(earlier < later);
    }

    #[test]
    fn test_write_xz_archive() {
        let (src, change_set) = source_fixture();
        let dst = TempDir::new().unwrap();
        let config = ArchiveConfig::new("Backup", XzConfig::new(Some(1), Some(1)).into());
        let progress = WriteProgress::new(2, 3);

        let artifact = config
            .write_artifact(&change_set, dst.path(), started_at(), &progress)
            .unwrap();

        assert_eq!(artifact.kind(), ArtifactKind::Archive);
        assert_eq!(artifact.created_at(), started_at());
        assert_eq!(
            artifact.path(),
            &dst.path().join("Backup-20261018-143005.tar.xz")
        );
        assert_eq!(progress.files_written(), 2);
        assert_eq!(progress.bytes_written(), 3);

        let file = File::open(artifact.path()).unwrap();
        let entries = tar_entries(liblzma::read::XzDecoder::new(file));
        assert_eq!(entries, vec!["a.txt", "sub/b.txt"]);
        drop(src);
    }

    #[test]
    fn test_failed_write_leaves_no_artifact() {
        let (src, change_set) = source_fixture();
        std::fs::remove_file(src.path().join("sub/b.txt")).unwrap();
        let dst = TempDir::new().unwrap();
        let config = ArchiveConfig::new("Backup", CompressorConfig::None);

        let error = config
            .write_artifact(&change_set, dst.path(), started_at(), &WriteProgress::new(2, 3))
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Write);
        assert_eq!(std::fs::read_dir(dst.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_existing_archive_is_not_overwritten() {
        let (_src, change_set) = source_fixture();
        let dst = TempDir::new().unwrap();
        let config = ArchiveConfig::new("Backup", CompressorConfig::None);
        let existing = dst.path().join("Backup-20261018-143005.tar");
        std::fs::write(&existing, "keep").unwrap();

        let error = config
            .write_artifact(&change_set, dst.path(), started_at(), &WriteProgress::new(2, 3))
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Write);
        assert_eq!(std::fs::read_to_string(existing).unwrap(), "keep");
    }
}
