//! Configuration store and watermark persistence.
//!
//! The store is read once per run into an immutable [`BackupConfig`]. After a
//! successful run only the `lastBackupDate` field of the stored document is
//! replaced, through a temporary file in the same directory that is renamed
//! over the original once fully written.

use crate::backup::backup_config::{BackupConfig, LAST_BACKUP_DATE_KEY};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub trait StatePersister {
    /// Durably records `watermark` as the last successful backup.
    fn commit(&self, config: &BackupConfig, watermark: DateTime<Utc>) -> Result<()>;

    /// File used to serialize runs sharing this state.
    fn lock_path(&self) -> PathBuf;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(Error::configuration(format!(
                "Unsupported config file extension {path:?}, expected .yml, .yaml or .json"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConfigStore {
    path: PathBuf,
    format: ConfigFormat,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let format = ConfigFormat::from_path(&path)?;
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<BackupConfig> {
        let reader = File::open(&self.path).map(BufReader::new)?;
        let config: BackupConfig = match self.format {
            ConfigFormat::Yaml => serde_yml::from_reader(reader)?,
            ConfigFormat::Json => serde_json::from_reader(reader)?,
        };
        config.validated()
    }

    /// Current document with the watermark replaced. Falls back to the full
    /// serialized config when the store does not exist yet.
    fn updated_document(&self, config: &BackupConfig, watermark: DateTime<Utc>) -> Result<Vec<u8>> {
        let existing = match File::open(&self.path) {
            Ok(f) => Some(BufReader::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match self.format {
            ConfigFormat::Json => {
                let mut doc = match existing {
                    Some(reader) => serde_json::from_reader(reader)?,
                    None => serde_json::to_value(config)?,
                };
                let obj = doc.as_object_mut().ok_or_else(|| {
                    Error::configuration(format!("{:?} is not a JSON object", self.path))
                })?;
                obj.insert(
                    LAST_BACKUP_DATE_KEY.to_string(),
                    serde_json::to_value(watermark)?,
                );
                let mut out = serde_json::to_vec_pretty(&doc)?;
                out.push(b'\n');
                Ok(out)
            }
            ConfigFormat::Yaml => {
                let mut doc = match existing {
                    Some(reader) => serde_yml::from_reader(reader)?,
                    None => serde_yml::to_value(config)?,
                };
                let mapping = doc.as_mapping_mut().ok_or_else(|| {
                    Error::configuration(format!("{:?} is not a YAML mapping", self.path))
                })?;
                mapping.insert(
                    serde_yml::Value::String(LAST_BACKUP_DATE_KEY.to_string()),
                    serde_yml::to_value(watermark)?,
                );
                Ok(serde_yml::to_string(&doc)?.into_bytes())
            }
        }
    }

    fn replace_atomically(&self, content: &[u8]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            writer.write_all(content)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::from(e.error))?;
        Ok(())
    }
}

impl StatePersister for ConfigStore {
    fn commit(&self, config: &BackupConfig, watermark: DateTime<Utc>) -> Result<()> {
        tracing::info!("Recording watermark {} in {:?}", watermark, self.path);
        self.updated_document(config, watermark)
            .and_then(|content| self.replace_atomically(&content))
            .add_msg("Commit watermark")
            .map_err(|e| Error::persist(&self.path, e))
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::ErrorKind;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn watermark() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 2, 30, 0).unwrap()
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path("a.yml").unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path("a.yaml").unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path("a.json").unwrap(), ConfigFormat::Json);
        assert_eq!(
            ConfigFormat::from_path("a.toml").unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_json_commit_only_touches_watermark() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.json");
        std::fs::write(
            &path,
            r#"{"SourceDirectory":"/src","BackupDirectory":"/dst","Schedule":{"Enabled":true,"Frequency":"Daily","Time":"02:30"},"Custom":{"kept":1}}"#,
        )
        .unwrap();
        let store = ConfigStore::new(&path).unwrap();
        let config = store.load().unwrap();

        store.commit(&config, watermark()).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["lastBackupDate"], "2026-10-18T02:30:00Z");
        assert_eq!(doc["Custom"]["kept"], 1);
        assert_eq!(doc["Schedule"]["Time"], "02:30");
        assert!(doc.get("MaxBackups").is_none());

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded, config.with_last_backup_date(watermark()));
        // No temporary files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_yaml_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.yml");
        std::fs::write(&path, "SourceDirectory: /src\nBackupDirectory: /dst\nMaxBackups: 2\n")
            .unwrap();
        let store = ConfigStore::new(&path).unwrap();
        let config = store.load().unwrap();

        store.commit(&config, watermark()).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.last_backup_date(), Some(watermark()));
        assert_eq!(reloaded.max_backups(), 2);
    }

    #[test]
    fn test_commit_creates_missing_store() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("new.json")).unwrap();
        let config = BackupConfig::builder()
            .source_directory("/src")
            .backup_directory("/dst")
            .build();

        store.commit(&config, watermark()).unwrap();
        assert_eq!(store.load().unwrap(), config.with_last_backup_date(watermark()));
    }

    #[test]
    fn test_commit_into_missing_directory_is_persist_error() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("gone/backup.json")).unwrap();
        let config = BackupConfig::builder()
            .source_directory("/src")
            .backup_directory("/dst")
            .build();

        let error = store.commit(&config, watermark()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Persist);
    }

    #[test]
    fn test_corrupt_store_is_left_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let store = ConfigStore::new(&path).unwrap();
        let config = BackupConfig::builder()
            .source_directory("/src")
            .backup_directory("/dst")
            .build();

        assert_eq!(store.commit(&config, watermark()).unwrap_err().kind(), ErrorKind::Persist);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2]");
    }

    #[test]
    fn test_load_rejects_zero_max_backups() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.json");
        std::fs::write(&path, r#"{"SourceDirectory":"/src","BackupDirectory":"/dst","MaxBackups":0}"#)
            .unwrap();
        let error = ConfigStore::new(&path).unwrap().load().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_lock_path_sits_next_to_store() {
        let store = ConfigStore::new("/etc/tree-backup/backup.yml").unwrap();
        assert_eq!(store.lock_path(), PathBuf::from("/etc/tree-backup/backup.yml.lock"));
    }
}
