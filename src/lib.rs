//! # tree-backup
//!
//! Snapshots a source directory tree into a destination directory, either as
//! a timestamped compressed archive or as an in-place mirror.
//!
//! ## Features
//!
//! - **Full or Incremental**: Incremental runs take only files modified after the last successful backup
//! - **Archives**: `tar` streams compressed with XZ (LZMA), written to a temporary file and renamed when complete
//! - **Mirror**: Copies changed files over a single destination tree
//! - **Retention**: Keeps the newest `MaxBackups` archives, never touching other files
//! - **Watermark**: `lastBackupDate` is written back to the config file only after a complete artifact
//! - **Scheduling**: Daily, weekly or hourly triggers for the daemon mode
//!
//! ## Quick Start
//!
//! ```no_run
//! use tree_backup::backup::orchestrator::Orchestrator;
//! use tree_backup::backup::state::ConfigStore;
//!
//! let store = ConfigStore::new("backup.json")?;
//! let mut orchestrator = Orchestrator::new(store.load()?, Box::new(store))?;
//! let result = orchestrator.run();
//! std::process::exit(result.exit_code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
