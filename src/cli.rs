//! CLI argument parsing for the configuration agent.
//!
//! The CLI stays thin: it names directories, the safety mode, and the LM
//! command, and routes to the workflow without embedding policy.
use crate::apply::ApplyMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint for the configuration agent.
#[derive(Parser, Debug)]
#[command(
    name = "hacop",
    version,
    about = "LM-assisted configuration agent for Home Assistant",
    after_help = "Commands:\n  run <request>        Send a request to the LM and process its proposals\n  status               Summarize the configuration tree, backups, and sandbox\n  entities             List entity states from the core API\n  check                Ask core to check the current configuration\n  diff <file>          Structural diff of a live file against its staged copy\n  backups list         List backups, newest first\n  backups restore      Restore a backup over the live file\n  backups prune        Delete backups older than a cutoff\n\nExamples:\n  hacop run \"turn off all lights at 23:00\" --mode dry-run --lm \"llm -m gpt-4o\"\n  hacop run \"add a morning scene\" --mode apply --lm \"ollama run llama3\"\n  hacop status --json\n  hacop diff automations.yaml\n  hacop backups restore automations.yaml.1756300000.bak",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Status(StatusArgs),
    Entities(EntitiesArgs),
    Check(CheckArgs),
    Diff(DiffArgs),
    Backups(BackupsArgs),
}

/// Directory layout shared by every command.
#[derive(Parser, Debug)]
pub struct TreeArgs {
    /// Live configuration root
    #[arg(long, value_name = "DIR", default_value = crate::config::DEFAULT_CONFIG_ROOT)]
    pub config_root: PathBuf,

    /// Backup directory (default: <config-root>/.ai_backups)
    #[arg(long, value_name = "DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Sandbox directory for staged proposals (default: <config-root>/ai_sandbox)
    #[arg(long, value_name = "DIR")]
    pub sandbox_dir: Option<PathBuf>,

    /// Allowed filename (repeatable; default: the built-in registry)
    #[arg(long = "allow", value_name = "FILE")]
    pub allow: Vec<String>,

    /// Core API base URL
    #[arg(long, value_name = "URL")]
    pub ha_url: Option<String>,
}

/// Process one natural-language request end to end.
#[derive(Parser, Debug)]
#[command(about = "Send a request to the LM and process its file proposals")]
pub struct RunArgs {
    /// The natural-language request
    #[arg(value_name = "REQUEST")]
    pub request: String,

    /// Safety mode for this cycle
    #[arg(long, value_enum, default_value = "read-only")]
    pub mode: ApplyMode,

    /// LM command; the prompt is piped to its stdin
    #[arg(long, value_name = "CMD")]
    pub lm: String,

    /// Answer yes to every confirmation prompt (apply mode)
    #[arg(long)]
    pub yes: bool,

    #[command(flatten)]
    pub tree: TreeArgs,
}

/// Summarize the tree without contacting the LM.
#[derive(Parser, Debug)]
#[command(about = "Summarize the configuration tree, backups, and sandbox")]
pub struct StatusArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub tree: TreeArgs,
}

#[derive(Parser, Debug)]
#[command(about = "List entity states from the core API")]
pub struct EntitiesArgs {
    /// Only show entities in this domain, e.g. light
    #[arg(long, value_name = "DOMAIN")]
    pub domain: Option<String>,

    #[command(flatten)]
    pub tree: TreeArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Ask core to check the current configuration")]
pub struct CheckArgs {
    #[command(flatten)]
    pub tree: TreeArgs,
}

/// Compare a live file against its staged sandbox copy.
#[derive(Parser, Debug)]
#[command(about = "Structural diff of a live file against its staged copy")]
pub struct DiffArgs {
    /// Allowed filename to compare
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Compare against this path instead of the staged sandbox copy
    #[arg(long, value_name = "PATH")]
    pub against: Option<PathBuf>,

    /// Print the merged document instead of the difference listing
    #[arg(long)]
    pub merged: bool,

    #[command(flatten)]
    pub tree: TreeArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Manage timestamped backups of live files")]
pub struct BackupsArgs {
    #[command(subcommand)]
    pub command: BackupsCommand,
}

#[derive(Subcommand, Debug)]
pub enum BackupsCommand {
    /// List backups, newest first
    List {
        /// Only list backups of this filename
        #[arg(long, value_name = "FILE")]
        file: Option<String>,

        #[command(flatten)]
        tree: TreeArgs,
    },
    /// Restore a backup over the live file (the current file is backed up first)
    Restore {
        /// Backup file name as shown by `backups list`
        #[arg(value_name = "BACKUP")]
        backup: String,

        #[command(flatten)]
        tree: TreeArgs,
    },
    /// Delete backups older than the cutoff
    Prune {
        /// Age cutoff in days
        #[arg(long, value_name = "DAYS")]
        older_than_days: u64,

        #[command(flatten)]
        tree: TreeArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        RootArgs::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_read_only() {
        let args = RootArgs::parse_from(["hacop", "run", "do it", "--lm", "cat"]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.mode, ApplyMode::ReadOnly);
                assert!(!run.yes);
                assert_eq!(run.tree.config_root, PathBuf::from("/config"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn allow_flag_is_repeatable() {
        let args = RootArgs::parse_from([
            "hacop",
            "status",
            "--allow",
            "scripts.yaml",
            "--allow",
            "scenes.yaml",
        ]);
        match args.command {
            Command::Status(status) => {
                assert_eq!(status.tree.allow, vec!["scripts.yaml", "scenes.yaml"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn backups_prune_requires_cutoff() {
        let parsed = RootArgs::try_parse_from(["hacop", "backups", "prune"]);
        assert!(parsed.is_err());
        let parsed =
            RootArgs::try_parse_from(["hacop", "backups", "prune", "--older-than-days", "30"]);
        assert!(parsed.is_ok());
    }
}
