//! Validation functions for configuration values and the run environment.
//!
//! The `validate_*` functions returning `ValidationError` are wired into
//! `#[validate(custom(...))]` attributes and only look at the value itself.
//! The environment checks (`check_*`) touch the filesystem and run in the
//! orchestrator's validating step.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::NaiveTime;
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::{Component, Path, PathBuf};

pub static TIME_OF_DAY_FORMAT: &str = "%H:%M";

pub fn validate_valid_archive_prefix<S: AsRef<str>>(name: S) -> std::result::Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || !is_sanitized(name) {
        return Err(ValidationError::new("InvalidArchivePrefix").with_message(
            format!("Invalid file name, try sanitizing like {:?}", sanitize(name)).into(),
        ));
    }

    Ok(())
}

pub fn validate_time_of_day<S: AsRef<str>>(time: S) -> std::result::Result<(), ValidationError> {
    let time = time.as_ref();
    NaiveTime::parse_from_str(time, TIME_OF_DAY_FORMAT)
        .map(|_| ())
        .map_err(|e| {
            ValidationError::new("InvalidTime")
                .with_message(format!("Invalid time {time:?}, expected HH:MM: {e}").into())
        })
}

/// Source must be an existing directory whose entries can be listed.
pub fn check_source_readable<P: AsRef<Path>>(src: P) -> Result<()> {
    let src = src.as_ref();
    let md = std::fs::metadata(src).map_err(|e| Error::source_unavailable(src, e))?;
    if !md.is_dir() {
        return Err(Error::source_unavailable(
            src,
            std::io::Error::other("not a directory"),
        ));
    }
    std::fs::read_dir(src)
        .map(|_| ())
        .map_err(|e| Error::source_unavailable(src, e))
}

/// Destination must be an existing, writable directory on an accessible
/// volume.
///
/// A missing destination is never created. An unmounted mount point is usually
/// an empty directory on the root volume, so recreating the destination under
/// it would silently write the backup to the wrong disk.
pub fn check_destination_volume<P: AsRef<Path>>(dst: P) -> Result<()> {
    let dst = dst.as_ref();

    if let Some(root) = volume_root(dst) {
        if !root.exists() {
            return Err(Error::destination_unavailable(
                dst,
                format!("volume {root:?} is not accessible"),
            ));
        }
    }

    match std::fs::metadata(dst) {
        Ok(md) if !md.is_dir() => Err(Error::destination_unavailable(dst, "not a directory")),
        Ok(md) if md.permissions().readonly() => {
            Err(Error::destination_unavailable(dst, "directory is read only"))
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::destination_unavailable(
            dst,
            "does not exist, is the volume mounted?",
        )),
        Err(e) => Err(Error::destination_unavailable(dst, e.to_string())),
    }
}

/// Drive root of a path carrying a prefix (`E:\`, `\\server\share\`).
fn volume_root(path: &Path) -> Option<PathBuf> {
    match path.components().next() {
        Some(Component::Prefix(_)) => Some(
            path.components()
                .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
                .collect(),
        ),
        _ => None,
    }
}
