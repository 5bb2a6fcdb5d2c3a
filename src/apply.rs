//! Apply engine: stages or writes generated files under a fixed safety mode.
//!
//! The mode is supplied once per request cycle and never reassigned; the
//! engine holds no other mutable state. Each file is processed independently
//! (best-effort batch, no cross-file atomicity): an I/O failure is recorded
//! in that file's outcome and processing continues.
use crate::allowlist::AllowedFiles;
use crate::backup::BackupStore;
use crate::error::FileError;
use crate::response::GeneratedFileSet;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Safety mode for one request-processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Display proposals only; no I/O of any kind.
    ReadOnly,
    /// Write proposals to the sandbox directory, never the live tree.
    DryRun,
    /// Write to the live tree after per-file confirmation, with backups.
    Apply,
}

impl ApplyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyMode::ReadOnly => "read_only",
            ApplyMode::DryRun => "dry_run",
            ApplyMode::Apply => "apply",
        }
    }
}

/// What happened to a single file in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    Displayed,
    Staged,
    Applied,
    Skipped,
    Rejected,
    Failed,
}

/// Per-file outcome record.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub filename: String,
    pub action: ApplyAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApplyOutcome {
    fn new(filename: &str, action: ApplyAction) -> Self {
        ApplyOutcome {
            filename: filename.to_string(),
            action,
            path: None,
            error: None,
        }
    }

    fn with_path(filename: &str, action: ApplyAction, path: PathBuf) -> Self {
        ApplyOutcome {
            path: Some(path),
            ..Self::new(filename, action)
        }
    }

    fn failed(filename: &str, error: &FileError) -> Self {
        ApplyOutcome {
            error: Some(error.to_string()),
            ..Self::new(filename, ApplyAction::Failed)
        }
    }
}

/// Outcome of one batch, including the advisory post-apply validation.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    pub mode: ApplyMode,
    pub outcomes: Vec<ApplyOutcome>,
    /// Result of the external configuration check after an Apply batch;
    /// `None` when nothing was applied or the check was unavailable. A
    /// failing check is surfaced but never triggers a rollback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_passed: Option<bool>,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.action == ApplyAction::Applied)
            .count()
    }
}

/// Processes one allow-list-filtered batch under the cycle's fixed mode.
pub struct ApplyEngine<'a> {
    mode: ApplyMode,
    allowed: &'a AllowedFiles,
    backups: &'a BackupStore,
    sandbox_dir: &'a Path,
}

impl<'a> ApplyEngine<'a> {
    pub fn new(
        mode: ApplyMode,
        allowed: &'a AllowedFiles,
        backups: &'a BackupStore,
        sandbox_dir: &'a Path,
    ) -> Self {
        ApplyEngine {
            mode,
            allowed,
            backups,
            sandbox_dir,
        }
    }

    /// Process every file in the batch, then (in Apply mode, when at least
    /// one file was written) run the advisory validation hook.
    ///
    /// `confirm` is the synchronous yes/no gate consulted per file in Apply
    /// mode; `validate` is the external configuration check, returning `None`
    /// when unavailable.
    pub fn apply_batch(
        &self,
        files: &GeneratedFileSet,
        confirm: &mut dyn FnMut(&str) -> bool,
        validate: &mut dyn FnMut() -> Option<bool>,
    ) -> ApplyReport {
        let mut outcomes = Vec::with_capacity(files.len());
        for (filename, content) in files.iter() {
            let outcome = self.apply_one(filename, content, confirm);
            tracing::info!(
                file = filename,
                action = ?outcome.action,
                mode = self.mode.as_str(),
                "file processed"
            );
            outcomes.push(outcome);
        }

        let mut report = ApplyReport {
            mode: self.mode,
            outcomes,
            validation_passed: None,
        };
        if self.mode == ApplyMode::Apply && report.applied_count() > 0 {
            report.validation_passed = validate();
        }
        report
    }

    fn apply_one(
        &self,
        filename: &str,
        content: &str,
        confirm: &mut dyn FnMut(&str) -> bool,
    ) -> ApplyOutcome {
        match self.mode {
            ApplyMode::ReadOnly => ApplyOutcome::new(filename, ApplyAction::Displayed),
            ApplyMode::DryRun => self.stage(filename, content),
            ApplyMode::Apply => self.apply_live(filename, content, confirm),
        }
    }

    fn stage(&self, filename: &str, content: &str) -> ApplyOutcome {
        if !self.allowed.is_allowed(filename) {
            return ApplyOutcome::new(filename, ApplyAction::Rejected);
        }
        let staged_path = self.sandbox_dir.join(format!("{filename}.ai.yaml"));
        let write =
            fs::create_dir_all(self.sandbox_dir).and_then(|_| fs::write(&staged_path, content));
        match write {
            Ok(()) => ApplyOutcome::with_path(filename, ApplyAction::Staged, staged_path),
            Err(source) => ApplyOutcome::failed(
                filename,
                &FileError::Write {
                    path: staged_path,
                    source,
                },
            ),
        }
    }

    fn apply_live(
        &self,
        filename: &str,
        content: &str,
        confirm: &mut dyn FnMut(&str) -> bool,
    ) -> ApplyOutcome {
        let live_path = match self.allowed.resolve(filename) {
            Ok(path) => path,
            Err(_) => return ApplyOutcome::new(filename, ApplyAction::Rejected),
        };

        if !confirm(filename) {
            return ApplyOutcome::new(filename, ApplyAction::Skipped);
        }

        // Backup happens only for pre-existing live files, and a backup
        // failure aborts this file before the live path is touched.
        if live_path.is_file() {
            if let Err(err) = self.backups.create_backup(filename) {
                return ApplyOutcome::failed(filename, &err);
            }
        }

        match fs::write(&live_path, content) {
            Ok(()) => ApplyOutcome::with_path(filename, ApplyAction::Applied, live_path),
            Err(source) => ApplyOutcome::failed(
                filename,
                &FileError::Write {
                    path: live_path,
                    source,
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::parse_generated_files;
    use std::time::SystemTime;

    struct Fixture {
        _dir: tempfile::TempDir,
        config_root: PathBuf,
        sandbox_dir: PathBuf,
        allowed: AllowedFiles,
        backups: BackupStore,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config_root = dir.path().join("config");
        let sandbox_dir = dir.path().join("sandbox");
        fs::create_dir_all(&config_root).unwrap();
        let allowed = AllowedFiles::new(&config_root, ["automations.yaml", "scripts.yaml"]);
        let backups = BackupStore::new(&config_root, &dir.path().join("backups")).unwrap();
        Fixture {
            _dir: dir,
            config_root,
            sandbox_dir,
            allowed,
            backups,
        }
    }

    fn batch(pairs: &[(&str, &str)]) -> GeneratedFileSet {
        let text: String = pairs
            .iter()
            .map(|(name, content)| format!("# FILE: {name}\n{content}\n```\n"))
            .collect();
        parse_generated_files(&text)
    }

    fn yes(_: &str) -> bool {
        true
    }

    fn no_validation() -> Option<bool> {
        None
    }

    fn tree_snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>, SystemTime)> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(root).unwrap() {
            let path = entry.unwrap().path();
            let modified = fs::metadata(&path).unwrap().modified().unwrap();
            entries.push((path.clone(), fs::read(&path).unwrap(), modified));
        }
        entries.sort();
        entries
    }

    #[test]
    fn read_only_mode_performs_no_io() {
        let fx = fixture();
        fs::write(fx.config_root.join("scripts.yaml"), "before: 1\n").unwrap();
        let before = tree_snapshot(&fx.config_root);

        let engine = ApplyEngine::new(
            ApplyMode::ReadOnly,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let report = engine.apply_batch(
            &batch(&[("scripts.yaml", "after: 2"), ("secrets.yaml", "x: 1")]),
            &mut yes,
            &mut no_validation,
        );

        assert!(report
            .outcomes
            .iter()
            .all(|o| o.action == ApplyAction::Displayed));
        assert_eq!(tree_snapshot(&fx.config_root), before);
        assert!(!fx.sandbox_dir.exists());
        assert!(!fx.backups.backup_dir().exists());
        assert!(fx.backups.list_backups(None).unwrap().is_empty());
    }

    #[test]
    fn dry_run_stages_one_file_per_input_and_leaves_live_tree_alone() {
        let fx = fixture();
        fs::write(fx.config_root.join("scripts.yaml"), "before: 1\n").unwrap();
        let before = tree_snapshot(&fx.config_root);

        let engine = ApplyEngine::new(
            ApplyMode::DryRun,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let report = engine.apply_batch(
            &batch(&[
                ("scripts.yaml", "after: 2"),
                ("automations.yaml", "- id: a1"),
            ]),
            &mut yes,
            &mut no_validation,
        );

        assert!(report
            .outcomes
            .iter()
            .all(|o| o.action == ApplyAction::Staged));
        assert_eq!(
            fs::read_to_string(fx.sandbox_dir.join("scripts.yaml.ai.yaml")).unwrap(),
            "after: 2"
        );
        assert_eq!(
            fs::read_to_string(fx.sandbox_dir.join("automations.yaml.ai.yaml")).unwrap(),
            "- id: a1"
        );
        assert_eq!(tree_snapshot(&fx.config_root), before);
        assert!(report.validation_passed.is_none());
    }

    #[test]
    fn dry_run_rejects_disallowed_filenames() {
        let fx = fixture();
        let engine = ApplyEngine::new(
            ApplyMode::DryRun,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let report = engine.apply_batch(
            &batch(&[("secrets.yaml", "token: x")]),
            &mut yes,
            &mut no_validation,
        );
        assert_eq!(report.outcomes[0].action, ApplyAction::Rejected);
        assert!(!fx.sandbox_dir.join("secrets.yaml.ai.yaml").exists());
    }

    #[test]
    fn apply_rejects_disallowed_and_continues_with_rest() {
        let fx = fixture();
        let engine = ApplyEngine::new(
            ApplyMode::Apply,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let report = engine.apply_batch(
            &batch(&[("secrets.yaml", "token: x"), ("scripts.yaml", "a: 1")]),
            &mut yes,
            &mut || Some(true),
        );

        assert_eq!(report.outcomes[0].action, ApplyAction::Rejected);
        assert_eq!(report.outcomes[1].action, ApplyAction::Applied);
        // Rejection creates no backup and no write.
        assert!(!fx.config_root.join("secrets.yaml").exists());
        assert!(fx
            .backups
            .list_backups(Some("secrets.yaml"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn apply_backs_up_existing_file_before_overwrite() {
        let fx = fixture();
        fs::write(fx.config_root.join("scripts.yaml"), "old content\n").unwrap();

        let engine = ApplyEngine::new(
            ApplyMode::Apply,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let report = engine.apply_batch(
            &batch(&[("scripts.yaml", "new content")]),
            &mut yes,
            &mut no_validation,
        );

        assert_eq!(report.outcomes[0].action, ApplyAction::Applied);
        assert_eq!(
            fs::read_to_string(fx.config_root.join("scripts.yaml")).unwrap(),
            "new content"
        );
        let backups = fx.backups.list_backups(Some("scripts.yaml")).unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(
            fs::read_to_string(&backups[0].path).unwrap(),
            "old content\n"
        );
    }

    #[test]
    fn apply_of_new_file_creates_no_backup() {
        let fx = fixture();
        let engine = ApplyEngine::new(
            ApplyMode::Apply,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let report = engine.apply_batch(
            &batch(&[("automations.yaml", "- id: a1")]),
            &mut yes,
            &mut no_validation,
        );
        assert_eq!(report.outcomes[0].action, ApplyAction::Applied);
        assert!(fx.backups.list_backups(None).unwrap().is_empty());
    }

    #[test]
    fn declined_confirmation_skips_file() {
        let fx = fixture();
        fs::write(fx.config_root.join("scripts.yaml"), "keep\n").unwrap();

        let engine = ApplyEngine::new(
            ApplyMode::Apply,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let mut decline = |_: &str| false;
        let report = engine.apply_batch(
            &batch(&[("scripts.yaml", "replace")]),
            &mut decline,
            &mut no_validation,
        );

        assert_eq!(report.outcomes[0].action, ApplyAction::Skipped);
        assert_eq!(
            fs::read_to_string(fx.config_root.join("scripts.yaml")).unwrap(),
            "keep\n"
        );
        assert!(fx.backups.list_backups(None).unwrap().is_empty());
    }

    #[test]
    fn validation_hook_runs_once_after_applied_batch() {
        let fx = fixture();
        let engine = ApplyEngine::new(
            ApplyMode::Apply,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let mut calls = 0;
        let report = engine.apply_batch(
            &batch(&[("scripts.yaml", "a: 1"), ("automations.yaml", "- id: x")]),
            &mut yes,
            &mut || {
                calls += 1;
                Some(false)
            },
        );
        assert_eq!(calls, 1);
        // A failing validation is surfaced, and applied files stay applied.
        assert_eq!(report.validation_passed, Some(false));
        assert_eq!(report.applied_count(), 2);
        assert!(fx.config_root.join("scripts.yaml").is_file());
    }

    #[test]
    fn validation_hook_not_run_when_nothing_applied() {
        let fx = fixture();
        let engine = ApplyEngine::new(
            ApplyMode::Apply,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let mut calls = 0;
        let mut decline = |_: &str| false;
        engine.apply_batch(&batch(&[("scripts.yaml", "a: 1")]), &mut decline, &mut || {
            calls += 1;
            Some(true)
        });
        assert_eq!(calls, 0);
    }

    #[test]
    fn write_failure_is_contained_to_one_file() {
        let fx = fixture();
        // Make the live path unwritable by occupying it with a directory.
        fs::create_dir(fx.config_root.join("scripts.yaml")).unwrap();

        let engine = ApplyEngine::new(
            ApplyMode::Apply,
            &fx.allowed,
            &fx.backups,
            &fx.sandbox_dir,
        );
        let report = engine.apply_batch(
            &batch(&[("scripts.yaml", "a: 1"), ("automations.yaml", "- id: x")]),
            &mut yes,
            &mut no_validation,
        );

        assert_eq!(report.outcomes[0].action, ApplyAction::Failed);
        assert!(report.outcomes[0].error.is_some());
        assert_eq!(report.outcomes[1].action, ApplyAction::Applied);
    }
}
