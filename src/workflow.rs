//! Command implementations: one request cycle plus the supporting
//! inspection and backup commands.
use crate::apply::{ApplyAction, ApplyEngine, ApplyReport};
use crate::backup::{now_epoch_secs, BackupStore};
use crate::cli::{
    BackupsArgs, BackupsCommand, CheckArgs, DiffArgs, EntitiesArgs, RunArgs, StatusArgs, TreeArgs,
};
use crate::config::{AgentConfig, ConfigPaths};
use crate::ha::Entity;
use crate::lm;
use crate::prompt::{self, ENTITY_SAMPLE_LIMIT};
use crate::response::parse_generated_files;
use crate::yamlcodec;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

fn agent_config(tree: &TreeArgs, lm_command: Option<String>) -> AgentConfig {
    let paths = ConfigPaths::new(
        &tree.config_root,
        tree.backup_dir.clone(),
        tree.sandbox_dir.clone(),
    );
    AgentConfig::new(paths, &tree.allow, tree.ha_url.clone(), lm_command)
}

/// One full request cycle: context, LM call, parse, filter, apply.
pub fn run_request(args: RunArgs) -> Result<()> {
    let config = agent_config(&args.tree, Some(args.lm.clone()));
    let client = config.ha_client();
    if client.is_none() {
        tracing::warn!("no API token; entity context and post-apply validation unavailable");
    }

    let current = read_current_files(&config.allowed)?;
    let entities = match &client {
        Some(client) => match client.get_entities() {
            Ok(mut entities) => {
                entities.truncate(ENTITY_SAMPLE_LIMIT);
                entities
            }
            Err(err) => {
                tracing::warn!(error = %err, "entity fetch failed, continuing without");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let system_prompt =
        prompt::build_system_prompt(args.mode, &config.allowed, &entities, &current);
    let lm_config = config
        .lm
        .as_ref()
        .ok_or_else(|| anyhow!("no LM command configured"))?;
    let response = lm::chat(lm_config, &system_prompt, &args.request)?;

    let mut files = parse_generated_files(&response);
    if files.is_empty() {
        println!("No file proposals in the response:\n");
        println!("{}", response.trim());
        return Ok(());
    }
    let dropped = files.retain_filenames(|name| config.allowed.is_allowed(name));
    for name in &dropped {
        tracing::warn!(file = name, "proposal dropped, not in the allow-list");
        println!("Dropped proposal for '{name}' (not in the allow-list).");
    }
    if files.is_empty() {
        println!("Every proposal targeted a file outside the allow-list; nothing to do.");
        return Ok(());
    }

    for (name, content) in files.iter() {
        print_proposal(name, content, &config.allowed.config_root().join(name));
    }

    let backups = BackupStore::new(&config.paths.config_root, &config.paths.backup_dir)?;
    let engine = ApplyEngine::new(
        args.mode,
        &config.allowed,
        &backups,
        &config.paths.sandbox_dir,
    );
    let mut confirm = |filename: &str| {
        if args.yes {
            return true;
        }
        confirm_from_stdin(filename)
    };
    let mut validate = || {
        client
            .as_ref()
            .and_then(|client| client.check_config().ok())
    };
    let report = engine.apply_batch(&files, &mut confirm, &mut validate);

    print_report(&report);
    if report.validation_passed == Some(true) {
        if let Some(client) = &client {
            match client.reload_core() {
                Ok(()) => println!("Core configuration reloaded."),
                Err(err) => tracing::warn!(error = %err, "core reload failed"),
            }
        }
    }
    Ok(())
}

fn print_proposal(name: &str, content: &str, live_path: &Path) {
    println!("--- {name} ---");
    println!("{content}");
    match yamlcodec::parse(content) {
        Ok(proposed) => {
            let live = live_path
                .is_file()
                .then(|| fs::read_to_string(live_path).ok())
                .flatten()
                .and_then(|text| yamlcodec::parse(&text).ok());
            if let Some(live) = live {
                let diff = yamlcodec::diff(&live, &proposed);
                println!(
                    "({} changed, {} added, {} removed vs live)",
                    diff.changed.len(),
                    diff.added.len(),
                    diff.removed.len()
                );
            }
        }
        Err(err) => {
            tracing::warn!(file = name, error = %err, "proposal is not valid YAML");
            println!("(warning: proposal is not valid YAML)");
        }
    }
    println!();
}

fn print_report(report: &ApplyReport) {
    for outcome in &report.outcomes {
        let label = action_label(outcome.action);
        match (&outcome.path, &outcome.error) {
            (Some(path), _) => println!("{label:<9} {} -> {}", outcome.filename, path.display()),
            (None, Some(error)) => println!("{label:<9} {} ({error})", outcome.filename),
            (None, None) => println!("{label:<9} {}", outcome.filename),
        }
    }
    match report.validation_passed {
        Some(true) => println!("Configuration check passed."),
        Some(false) => println!(
            "Configuration check FAILED. Applied files are kept; restore from backups if needed."
        ),
        None => {
            if report.applied_count() > 0 {
                println!("Configuration check unavailable.");
            }
        }
    }
}

fn action_label(action: ApplyAction) -> &'static str {
    match action {
        ApplyAction::Displayed => "displayed",
        ApplyAction::Staged => "staged",
        ApplyAction::Applied => "applied",
        ApplyAction::Skipped => "skipped",
        ApplyAction::Rejected => "rejected",
        ApplyAction::Failed => "failed",
    }
}

fn confirm_from_stdin(filename: &str) -> bool {
    print!("Apply {filename} to the live configuration? [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn read_current_files(allowed: &crate::allowlist::AllowedFiles) -> Result<Vec<(String, String)>> {
    let mut current = Vec::new();
    for name in allowed.names() {
        let path = allowed.config_root().join(name);
        if !path.is_file() {
            continue;
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        current.push((name.to_string(), content));
    }
    Ok(current)
}

#[derive(Debug, Serialize)]
struct FileStatus {
    filename: String,
    present: bool,
}

#[derive(Debug, Serialize)]
struct StatusSummary {
    config_root: PathBuf,
    backup_dir: PathBuf,
    sandbox_dir: PathBuf,
    api_token_present: bool,
    allowed_files: Vec<FileStatus>,
    backups: usize,
    staged: Vec<String>,
}

pub fn run_status(args: StatusArgs) -> Result<()> {
    let config = agent_config(&args.tree, None);

    let allowed_files = config
        .allowed
        .names()
        .map(|name| FileStatus {
            filename: name.to_string(),
            present: config.allowed.config_root().join(name).is_file(),
        })
        .collect();

    let backups = BackupStore::new(&config.paths.config_root, &config.paths.backup_dir)?
        .list_backups(None)?
        .len();

    let summary = StatusSummary {
        config_root: config.paths.config_root.clone(),
        backup_dir: config.paths.backup_dir.clone(),
        sandbox_dir: config.paths.sandbox_dir.clone(),
        api_token_present: config.ha_token.is_some(),
        allowed_files,
        backups,
        staged: sandbox_staged(&config.paths.sandbox_dir)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("config root: {}", summary.config_root.display());
    println!("backup dir:  {}", summary.backup_dir.display());
    println!("sandbox dir: {}", summary.sandbox_dir.display());
    println!(
        "api token:   {}",
        if summary.api_token_present {
            "present"
        } else {
            "missing"
        }
    );
    println!("allowed files:");
    for file in &summary.allowed_files {
        let mark = if file.present { "x" } else { " " };
        println!("  [{mark}] {}", file.filename);
    }
    println!("backups: {}", summary.backups);
    if summary.staged.is_empty() {
        println!("staged:  none");
    } else {
        println!("staged:");
        for name in &summary.staged {
            println!("  {name}");
        }
    }
    Ok(())
}

/// Staged proposal filenames in the sandbox, sorted, without the staging
/// suffix.
fn sandbox_staged(sandbox_dir: &Path) -> Result<Vec<String>> {
    if !sandbox_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut staged = Vec::new();
    for entry in
        fs::read_dir(sandbox_dir).with_context(|| format!("read {}", sandbox_dir.display()))?
    {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(original) = name.strip_suffix(".ai.yaml") {
            staged.push(original.to_string());
        }
    }
    staged.sort();
    Ok(staged)
}

pub fn run_entities(args: EntitiesArgs) -> Result<()> {
    let config = agent_config(&args.tree, None);
    let client = config
        .ha_client()
        .ok_or_else(|| anyhow!("no API token in the environment"))?;
    let mut entities = client.get_entities()?;
    if let Some(domain) = &args.domain {
        entities.retain(|entity| entity.domain() == domain);
    }
    entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    for entity in &entities {
        print_entity(entity);
    }
    println!("{} entities", entities.len());
    Ok(())
}

fn print_entity(entity: &Entity) {
    match entity.friendly_name() {
        Some(name) => println!("{:<40} {} ({name})", entity.entity_id, entity.state),
        None => println!("{:<40} {}", entity.entity_id, entity.state),
    }
}

pub fn run_check(args: CheckArgs) -> Result<()> {
    let config = agent_config(&args.tree, None);
    let client = config
        .ha_client()
        .ok_or_else(|| anyhow!("no API token in the environment"))?;
    if client.check_config()? {
        println!("Configuration is valid.");
        Ok(())
    } else {
        Err(anyhow!("configuration check failed"))
    }
}

pub fn run_diff(args: DiffArgs) -> Result<()> {
    let config = agent_config(&args.tree, None);
    let live_path = config.allowed.resolve(&args.file)?;
    let candidate_path = args
        .against
        .unwrap_or_else(|| config.paths.sandbox_dir.join(format!("{}.ai.yaml", args.file)));
    if !candidate_path.is_file() {
        return Err(anyhow!(
            "nothing to compare at {} (stage a proposal with run --mode dry-run first)",
            candidate_path.display()
        ));
    }

    let live = if live_path.is_file() {
        let text = fs::read_to_string(&live_path)
            .with_context(|| format!("read {}", live_path.display()))?;
        yamlcodec::parse(&text)?
    } else {
        yamlcodec::ConfigDocument::Null
    };
    let candidate_text = fs::read_to_string(&candidate_path)
        .with_context(|| format!("read {}", candidate_path.display()))?;
    let candidate = yamlcodec::parse(&candidate_text)?;

    if args.merged {
        print!("{}", yamlcodec::dump(&yamlcodec::merge(&live, &candidate))?);
        return Ok(());
    }

    let diff = yamlcodec::diff(&live, &candidate);
    if diff.is_empty() {
        println!("No structural differences.");
        return Ok(());
    }
    for change in &diff.changed {
        println!(
            "~ {}: {} -> {}",
            change.path,
            yaml_inline(&change.old),
            yaml_inline(&change.new)
        );
    }
    for path in &diff.added {
        println!("+ {path}");
    }
    for path in &diff.removed {
        println!("- {path}");
    }
    Ok(())
}

fn yaml_inline(value: &yamlcodec::ConfigDocument) -> String {
    yamlcodec::dump(value)
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|_| "?".to_string())
}

pub fn run_backups(args: BackupsArgs) -> Result<()> {
    match args.command {
        BackupsCommand::List { file, tree } => {
            let config = agent_config(&tree, None);
            let store = BackupStore::new(&config.paths.config_root, &config.paths.backup_dir)?;
            let records = store.list_backups(file.as_deref())?;
            if records.is_empty() {
                println!("No backups.");
                return Ok(());
            }
            let now = now_epoch_secs();
            for record in &records {
                let age_days = now.saturating_sub(record.timestamp) / 86_400;
                println!("{:<50} {age_days}d old", record.backup_name());
            }
            Ok(())
        }
        BackupsCommand::Restore { backup, tree } => {
            let config = agent_config(&tree, None);
            let store = BackupStore::new(&config.paths.config_root, &config.paths.backup_dir)?;
            let target = store.restore(&config.allowed, &backup)?;
            println!("Restored {backup} -> {}", target.display());
            Ok(())
        }
        BackupsCommand::Prune {
            older_than_days,
            tree,
        } => {
            let config = agent_config(&tree, None);
            let store = BackupStore::new(&config.paths.config_root, &config.paths.backup_dir)?;
            let removed = store.prune(prune_cutoff(now_epoch_secs(), older_than_days))?;
            println!("Removed {removed} backups.");
            Ok(())
        }
    }
}

fn prune_cutoff(now: u64, older_than_days: u64) -> u64 {
    now.saturating_sub(older_than_days.saturating_mul(86_400))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::AllowedFiles;

    #[test]
    fn current_files_cover_only_present_allowed_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("scripts.yaml"), "a: 1\n").unwrap();
        fs::write(dir.path().join("secrets.yaml"), "token: x\n").unwrap();
        let allowed = AllowedFiles::new(dir.path(), ["scripts.yaml", "scenes.yaml"]);

        let current = read_current_files(&allowed).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].0, "scripts.yaml");
        assert_eq!(current[0].1, "a: 1\n");
    }

    #[test]
    fn staged_listing_strips_suffix_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("scripts.yaml.ai.yaml"), "").unwrap();
        fs::write(dir.path().join("automations.yaml.ai.yaml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let staged = sandbox_staged(dir.path()).unwrap();
        assert_eq!(staged, vec!["automations.yaml", "scripts.yaml"]);
    }

    #[test]
    fn missing_sandbox_means_nothing_staged() {
        let dir = tempfile::tempdir().unwrap();
        let staged = sandbox_staged(&dir.path().join("absent")).unwrap();
        assert!(staged.is_empty());
    }

    #[test]
    fn prune_cutoff_saturates_instead_of_wrapping() {
        assert_eq!(prune_cutoff(1_700_000_000, 1), 1_700_000_000 - 86_400);
        assert_eq!(prune_cutoff(1_000, u64::MAX), 0);
    }
}
