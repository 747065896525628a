use crate::backup::output::archive::ArchiveNaming;
use crate::backup::result_error::error::Error;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::cmp::Reverse;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default number of archives kept.
pub static DEFAULT_MAX_BACKUPS: usize = 10;

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ItemWithDateTime<R> {
    pub item: R,
    pub date_time: DateTime<Utc>,
}

impl<R> From<(R, DateTime<Utc>)> for ItemWithDateTime<R> {
    fn from(value: (R, DateTime<Utc>)) -> Self {
        Self {
            item: value.0,
            date_time: value.1,
        }
    }
}

/// Outcome of a prune pass. Warnings never fail the run.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub deleted: Vec<PathBuf>,
    pub warnings: Vec<Error>,
}

/// Items beyond the newest `keep`, newest first. Equal timestamps are ordered
/// by item, greatest first.
pub fn get_delete<R, I>(items: I, keep: NonZeroUsize) -> impl Iterator<Item = ItemWithDateTime<R>>
where
    R: Ord,
    I: IntoIterator<Item = ItemWithDateTime<R>>,
{
    items
        .into_iter()
        .sorted_unstable_by(|a, b| {
            Reverse((&a.date_time, &a.item)).cmp(&Reverse((&b.date_time, &b.item)))
        })
        .skip(keep.get())
}

/// Deletes archives matching `naming` in `destination` beyond the newest
/// `max_retained`. Files not matching the pattern are never touched.
pub fn prune(destination: &Path, naming: &ArchiveNaming, max_retained: NonZeroUsize) -> PruneReport {
    let mut report = PruneReport::default();

    let read_dir = match std::fs::read_dir(destination) {
        Ok(read_dir) => read_dir,
        Err(e) => {
            warn!("Listing {:?} for retention failed: {}", destination, e);
            report
                .warnings
                .push(Error::retention_warning(destination, e));
            return report;
        }
    };

    let mut artifacts = Vec::new();
    for entry in read_dir {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                if let Some(dt) = naming.date_time_of(&path) {
                    artifacts.push(ItemWithDateTime::from((path, dt)));
                }
            }
            Err(e) => report
                .warnings
                .push(Error::retention_warning(destination, e)),
        }
    }

    let found = artifacts.len();
    for to_delete in get_delete(artifacts, max_retained) {
        info!("Removing out of retention file {:?}", &to_delete.item);
        match std::fs::remove_file(&to_delete.item) {
            Ok(()) => report.deleted.push(to_delete.item),
            Err(e) => {
                warn!("Removing {:?} failed: {}", &to_delete.item, e);
                report
                    .warnings
                    .push(Error::retention_warning(to_delete.item, e));
            }
        }
    }

    info!(
        "Retention kept {} of {} archives in {:?}, {} warnings",
        found - report.deleted.len(),
        found,
        destination,
        report.warnings.len()
    );
    report
}
