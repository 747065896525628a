use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::validate::check_source_readable;

use bon::Builder;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use function_name::named;
use getset::{CopyGetters, Getters};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize};
use walkdir::{DirEntry, WalkDir};

use std::fmt::Formatter;
use std::path::{Path, PathBuf};
use std::result;

/// Exclude pattern matched against paths relative to the source.
///
/// `*` never crosses a path separator; use `**` for that.
#[derive(Clone, Debug, From, Display, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ExcludeGlob {
    glob: Glob,
}

impl ExcludeGlob {
    pub fn new(pattern: &str) -> result::Result<Self, globset::Error> {
        GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map(ExcludeGlob::from)
    }
}

struct ExcludeGlobVisitor;

impl Visitor<'_> for ExcludeGlobVisitor {
    type Value = ExcludeGlob;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a glob pattern")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        ExcludeGlob::new(v).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ExcludeGlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(ExcludeGlobVisitor)
    }
}

pub fn build_exclude_set(globs: &[ExcludeGlob]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    globs.iter().for_each(|g| {
        builder.add(g.glob.clone());
    });
    Ok(builder.build()?)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionMode {
    Full,
    Incremental,
}

/// One file chosen for this run. Relative to the change set's source root.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct FileRecord {
    #[getset(get = "pub")]
    relative_path: PathBuf,
    #[getset(get_copy = "pub")]
    modified_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    size_bytes: u64,
}

impl FileRecord {
    pub fn new<P: Into<PathBuf>>(relative_path: P, modified_at: DateTime<Utc>, size_bytes: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            modified_at,
            size_bytes,
        }
    }
}

#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct ChangeSet {
    #[getset(get = "pub")]
    source_root: PathBuf,
    #[getset(get_copy = "pub")]
    mode: SelectionMode,
    #[getset(get = "pub")]
    files: Vec<FileRecord>,
    #[getset(get_copy = "pub")]
    total_bytes: u64,
}

impl ChangeSet {
    pub fn new<P: Into<PathBuf>>(source_root: P, mode: SelectionMode, files: Vec<FileRecord>) -> Self {
        let total_bytes = files.iter().map(FileRecord::size_bytes).sum();
        Self {
            source_root: source_root.into(),
            mode,
            files,
            total_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn absolute_path(&self, record: &FileRecord) -> PathBuf {
        self.source_root.join(&record.relative_path)
    }
}

/// Decides which regular files under `source` go into this run.
///
/// Without a watermark (or with incremental selection off) every regular file
/// is taken. With one, only files modified strictly after it. Symlinks are not
/// followed, `exclude` matches paths relative to `source`, and `skip_dir`
/// (the destination, when nested in the source) is never descended into.
#[derive(Clone, Debug, Builder)]
pub struct ChangeSetSelector {
    #[builder(into)]
    source: PathBuf,
    #[builder(default)]
    incremental: bool,
    last_backup: Option<DateTime<Utc>>,
    #[builder(default = GlobSet::empty())]
    exclude: GlobSet,
    #[builder(into)]
    skip_dir: Option<PathBuf>,
}

impl ChangeSetSelector {
    pub fn mode(&self) -> SelectionMode {
        match (self.incremental, self.last_backup) {
            (true, Some(_)) => SelectionMode::Incremental,
            _ => SelectionMode::Full,
        }
    }

    #[named]
    pub fn select(&self) -> Result<ChangeSet> {
        check_source_readable(&self.source).add_fn_name(function_path!())?;

        let mode = self.mode();
        let watermark = match mode {
            SelectionMode::Incremental => self.last_backup,
            SelectionMode::Full => None,
        };
        tracing::info!(
            "Selecting files under {:?} ({:?}, watermark {:?})",
            self.source,
            mode,
            watermark
        );

        let skip_dir = self
            .skip_dir
            .as_ref()
            .and_then(|d| std::fs::canonicalize(d).ok());

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.source)
            .follow_links(false)
            .into_iter()
            .filter_entry(|de| !is_skipped_dir(de, skip_dir.as_deref()));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.source).to_path_buf();
                Error::source_unavailable(path, e)
            })?;
            if let Some(record) = self.process_dir_entry(&entry, watermark)? {
                files.push(record);
            }
        }

        let change_set = ChangeSet::new(self.source.clone(), mode, files);
        tracing::info!(
            "Selected {} files ({} bytes) under {:?}",
            change_set.len(),
            change_set.total_bytes(),
            self.source
        );
        Ok(change_set)
    }

    fn process_dir_entry(
        &self,
        de: &DirEntry,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<Option<FileRecord>> {
        if !de.file_type().is_file() {
            tracing::trace!("Skipping {:?} not a regular file", de.path());
            return Ok(None);
        }

        let relative_path = de
            .path()
            .strip_prefix(&self.source)
            .map_err(|e| Error::source_unavailable(de.path(), e))?;
        if self.exclude.is_match(relative_path) {
            tracing::trace!("Skipping {:?}, excluded", relative_path);
            return Ok(None);
        }

        let md = de
            .metadata()
            .map_err(|e| Error::source_unavailable(de.path(), e))?;
        let modified_at = md
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| Error::source_unavailable(de.path(), e))?;

        if let Some(watermark) = watermark {
            if modified_at <= watermark {
                tracing::trace!("Skipping {:?}, unchanged since {}", relative_path, watermark);
                return Ok(None);
            }
        }

        tracing::trace!("Including file: {:?}", relative_path);
        Ok(Some(FileRecord::new(relative_path, modified_at, md.len())))
    }
}

fn is_skipped_dir(de: &DirEntry, skip_dir: Option<&Path>) -> bool {
    match skip_dir {
        Some(skip_dir) if de.file_type().is_dir() => std::fs::canonicalize(de.path())
            .map(|p| p == skip_dir)
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::result_error::error::ErrorKind;
    use chrono::TimeZone;
    use itertools::Itertools;
    use std::fs::File;
    use std::time::SystemTime;
    use tempfile::TempDir;

    pub(crate) fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    pub(crate) fn write_file_at(dir: &Path, rel: &str, content: &str, secs: i64) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::from(at(secs)))
            .unwrap();
    }

    fn names(change_set: &ChangeSet) -> Vec<String> {
        change_set
            .files()
            .iter()
            .map(|f| f.relative_path().to_string_lossy().replace('\\', "/"))
            .sorted()
            .collect()
    }

    fn fixture() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        write_file_at(temp_dir.path(), "a.txt", "A", 1);
        write_file_at(temp_dir.path(), "b.txt", "BB", 2);
        write_file_at(temp_dir.path(), "sub/c.txt", "CCC", 3);
        temp_dir
    }

    #[test]
    fn test_full_selection_ignores_watermark() {
        let temp_dir = fixture();
        let change_set = ChangeSetSelector::builder()
            .source(temp_dir.path())
            .incremental(false)
            .last_backup(at(2))
            .build()
            .select()
            .unwrap();

        assert_eq!(change_set.mode(), SelectionMode::Full);
        assert_eq!(names(&change_set), vec!["a.txt", "b.txt", "sub/c.txt"]);
        assert_eq!(change_set.total_bytes(), 6);
        assert_eq!(change_set.len(), 3);
    }

    #[test]
    fn test_incremental_without_watermark_is_full() {
        let temp_dir = fixture();
        let selector = ChangeSetSelector::builder()
            .source(temp_dir.path())
            .incremental(true)
            .build();

        assert_eq!(selector.mode(), SelectionMode::Full);
        assert_eq!(selector.select().unwrap().len(), 3);
    }

    #[test]
    fn test_incremental_is_strictly_after_watermark() {
        let temp_dir = fixture();
        let change_set = ChangeSetSelector::builder()
            .source(temp_dir.path())
            .incremental(true)
            .last_backup(at(2))
            .build()
            .select()
            .unwrap();

        assert_eq!(change_set.mode(), SelectionMode::Incremental);
        // b.txt was modified exactly at the watermark.
        assert_eq!(names(&change_set), vec!["sub/c.txt"]);
    }

    #[test]
    fn test_incremental_scenario_modified_and_added() {
        let temp_dir = fixture();
        write_file_at(temp_dir.path(), "b.txt", "BB changed", 5);
        write_file_at(temp_dir.path(), "d.txt", "D", 4);

        let change_set = ChangeSetSelector::builder()
            .source(temp_dir.path())
            .incremental(true)
            .last_backup(at(3))
            .build()
            .select()
            .unwrap();

        assert_eq!(names(&change_set), vec!["b.txt", "d.txt"]);
    }

    #[test]
    fn test_nothing_changed_is_empty_not_error() {
        let temp_dir = fixture();
        let change_set = ChangeSetSelector::builder()
            .source(temp_dir.path())
            .incremental(true)
            .last_backup(at(100))
            .build()
            .select()
            .unwrap();

        assert!(change_set.is_empty());
        assert_eq!(change_set.total_bytes(), 0);
    }

    #[test]
    fn test_exclude_and_nested_destination() {
        let temp_dir = fixture();
        write_file_at(temp_dir.path(), "backups/Backup-old.tar.xz", "old", 1);
        write_file_at(temp_dir.path(), "cache/x.tmp", "tmp", 1);

        let exclude = build_exclude_set(&[ExcludeGlob::new("cache/**").unwrap()]).unwrap();

        let change_set = ChangeSetSelector::builder()
            .source(temp_dir.path())
            .exclude(exclude)
            .skip_dir(temp_dir.path().join("backups"))
            .build()
            .select()
            .unwrap();

        assert_eq!(names(&change_set), vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn test_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let error = ChangeSetSelector::builder()
            .source(temp_dir.path().join("missing"))
            .build()
            .select()
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SourceUnavailable);
    }

    #[test]
    fn test_exclude_glob_deserialization() {
        let glob: ExcludeGlob = serde_json::from_str("\"*.log\"").unwrap();
        assert_eq!(glob.to_string(), "*.log");
        let set = build_exclude_set(&[glob]).unwrap();
        assert!(set.is_match("app.log"));
        assert!(!set.is_match("logs/app.log"));

        assert!(serde_json::from_str::<ExcludeGlob>("\"[invalid\"").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_regular_files() {
        let temp_dir = fixture();
        std::os::unix::fs::symlink(temp_dir.path().join("a.txt"), temp_dir.path().join("link"))
            .unwrap();

        let change_set = ChangeSetSelector::builder()
            .source(temp_dir.path())
            .build()
            .select()
            .unwrap();
        assert_eq!(change_set.len(), 3);
    }
}
