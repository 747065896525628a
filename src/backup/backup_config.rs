use crate::backup::change_set::{build_exclude_set, ChangeSetSelector, ExcludeGlob};
use crate::backup::output::OutputConfig;
use crate::backup::progress::DEFAULT_HEARTBEAT_INTERVAL;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::retention::DEFAULT_MAX_BACKUPS;
use crate::backup::schedule::ScheduleConfig;
use bon::Builder;
use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Serialized name of the watermark, the only field the engine writes back.
pub static LAST_BACKUP_DATE_KEY: &str = "lastBackupDate";

fn default_max_backups() -> usize {
    DEFAULT_MAX_BACKUPS
}

fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

/// Immutable run configuration, loaded once per run.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BackupConfig {
    #[builder(into)]
    #[getset(get = "pub")]
    source_directory: PathBuf,
    #[builder(into)]
    #[getset(get = "pub")]
    backup_directory: PathBuf,
    #[serde(default = "default_max_backups")]
    #[validate(range(min = 1, message = "MaxBackups must be at least 1"))]
    #[builder(default = DEFAULT_MAX_BACKUPS)]
    #[getset(get_copy = "pub")]
    max_backups: usize,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    incremental: bool,
    #[serde(rename = "lastBackupDate")]
    #[getset(get_copy = "pub")]
    last_backup_date: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    #[getset(get = "pub")]
    output: OutputConfig,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    exclude: Vec<ExcludeGlob>,
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL)]
    #[getset(get_copy = "pub")]
    heartbeat_interval: Duration,
    #[validate(nested)]
    #[getset(get = "pub")]
    schedule: Option<ScheduleConfig>,
}

impl BackupConfig {
    /// Validates the schema, turning violations into a configuration error.
    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(Error::from)
            .add_msg("Config validation failed")?;
        Ok(self)
    }

    pub fn retained_backups(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.max_backups).ok_or_else(|| {
            Error::configuration(format!(
                "MaxBackups must be at least 1, got {}",
                self.max_backups
            ))
        })
    }

    /// Copy with a new watermark; everything else unchanged.
    pub fn with_last_backup_date(&self, watermark: DateTime<Utc>) -> Self {
        Self {
            last_backup_date: Some(watermark),
            ..self.clone()
        }
    }

    pub fn change_set_selector(&self) -> Result<ChangeSetSelector> {
        Ok(ChangeSetSelector::builder()
            .source(self.source_directory.clone())
            .incremental(self.incremental)
            .maybe_last_backup(self.last_backup_date)
            .exclude(build_exclude_set(&self.exclude)?)
            .skip_dir(self.backup_directory.clone())
            .build())
    }
}
