//! Timestamped backups of live configuration files.
//!
//! Backups live in a dedicated directory next to (or under) the config root
//! and are named `<filename>.<timestamp>[.<seq>].bak`, where the timestamp is
//! the creation epoch second as a fixed-width 10-digit decimal. The fixed
//! width keeps filename recovery unambiguous even for dotted filenames, and
//! the sequence suffix disambiguates two backups of the same file requested
//! within one clock tick; the store offers no locking, so the tie-break is
//! required, not incidental.
use crate::allowlist::AllowedFiles;
use crate::error::FileError;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const BACKUP_NAME_PATTERN: &str = r"^(?P<name>.+)\.(?P<ts>\d{10})(?:\.(?P<seq>\d+))?\.bak$";

/// One stored backup, recovered from its on-disk name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub filename: String,
    /// Creation time, epoch seconds.
    pub timestamp: u64,
    /// Same-second disambiguator; 0 for the first backup in a second.
    pub seq: u32,
    pub path: PathBuf,
}

impl BackupRecord {
    pub fn backup_name(&self) -> String {
        backup_name(&self.filename, self.timestamp, self.seq)
    }
}

fn backup_name(filename: &str, timestamp: u64, seq: u32) -> String {
    if seq == 0 {
        format!("{filename}.{timestamp:010}.bak")
    } else {
        format!("{filename}.{timestamp:010}.{seq}.bak")
    }
}

/// Backup area for a single configuration root.
#[derive(Debug)]
pub struct BackupStore {
    config_root: PathBuf,
    backup_dir: PathBuf,
    name_pattern: Regex,
}

impl BackupStore {
    /// Constructing a store performs no I/O; the backup directory is created
    /// on first write, so a read-only caller can hold a store without
    /// touching the tree.
    pub fn new(config_root: &Path, backup_dir: &Path) -> Result<Self> {
        let name_pattern =
            Regex::new(BACKUP_NAME_PATTERN).context("compile backup name pattern")?;
        Ok(BackupStore {
            config_root: config_root.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
            name_pattern,
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copy the live file's current bytes into the backup area.
    ///
    /// Returns `None` when no live file exists: new files never produce a
    /// backup.
    pub fn create_backup(&self, filename: &str) -> Result<Option<BackupRecord>, FileError> {
        self.create_backup_at(filename, now_epoch_secs())
    }

    fn create_backup_at(
        &self,
        filename: &str,
        timestamp: u64,
    ) -> Result<Option<BackupRecord>, FileError> {
        let live_path = self.config_root.join(filename);
        if !live_path.is_file() {
            return Ok(None);
        }

        fs::create_dir_all(&self.backup_dir).map_err(|source| FileError::Backup {
            path: live_path.clone(),
            source,
        })?;
        let seq = self.next_seq(filename, timestamp)?;
        let record = BackupRecord {
            filename: filename.to_string(),
            timestamp,
            seq,
            path: self.backup_dir.join(backup_name(filename, timestamp, seq)),
        };

        fs::copy(&live_path, &record.path).map_err(|source| FileError::Backup {
            path: live_path.clone(),
            source,
        })?;

        tracing::debug!(backup = %record.path.display(), "backup created");
        Ok(Some(record))
    }

    /// A listing failure here must not default to `seq = 0`: that name may
    /// already be taken, and reusing it would overwrite a same-second backup.
    fn next_seq(&self, filename: &str, timestamp: u64) -> Result<u32, FileError> {
        let records =
            self.list_backups(Some(filename))
                .map_err(|source| FileError::Backup {
                    path: self.config_root.join(filename),
                    source: std::io::Error::other(source),
                })?;
        let existing_max = records
            .into_iter()
            .filter(|record| record.timestamp == timestamp)
            .map(|record| record.seq)
            .max();
        Ok(match existing_max {
            Some(seq) => seq + 1,
            None => 0,
        })
    }

    /// List stored backups newest first, optionally for one filename. A
    /// backup directory that does not exist yet holds no backups.
    pub fn list_backups(&self, filename: Option<&str>) -> Result<Vec<BackupRecord>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let entries = fs::read_dir(&self.backup_dir)
            .with_context(|| format!("read {}", self.backup_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(record) = self.parse_backup_name(&name) else {
                continue;
            };
            if filename.is_some_and(|wanted| wanted != record.filename) {
                continue;
            }
            records.push(record);
        }
        records.sort_by(|a, b| {
            (b.timestamp, b.seq, &b.filename).cmp(&(a.timestamp, a.seq, &a.filename))
        });
        Ok(records)
    }

    /// Copy a backup's bytes back onto its live path.
    ///
    /// The filename recovered from the backup name is re-validated against
    /// the allow-list, and whatever currently lives at the target gets a
    /// fresh safety backup first, so a restore is itself always reversible.
    pub fn restore(&self, allowed: &AllowedFiles, backup_name: &str) -> Result<PathBuf> {
        let record = self
            .parse_backup_name(backup_name)
            .ok_or_else(|| anyhow!("unrecognized backup name '{backup_name}'"))?;
        if !record.path.is_file() {
            return Err(anyhow!("backup not found at {}", record.path.display()));
        }

        let target = allowed.resolve(&record.filename)?;

        if target.is_file() {
            self.create_backup(&record.filename)?;
        }
        fs::copy(&record.path, &target)
            .with_context(|| format!("restore {} onto {}", backup_name, target.display()))?;

        tracing::info!(target = %target.display(), backup = backup_name, "backup restored");
        Ok(target)
    }

    /// Delete backups created before the cutoff (epoch seconds); returns the
    /// number removed. Never touches live files.
    pub fn prune(&self, older_than: u64) -> Result<usize> {
        let mut removed = 0;
        for record in self.list_backups(None)? {
            if record.timestamp < older_than {
                fs::remove_file(&record.path)
                    .with_context(|| format!("remove {}", record.path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn parse_backup_name(&self, name: &str) -> Option<BackupRecord> {
        let captures = self.name_pattern.captures(name)?;
        let filename = captures.name("name")?.as_str().to_string();
        let timestamp: u64 = captures.name("ts")?.as_str().parse().ok()?;
        let seq: u32 = match captures.name("seq") {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some(BackupRecord {
            path: self.backup_dir.join(name),
            filename,
            timestamp,
            seq,
        })
    }
}

pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
