use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod allowlist;
mod apply;
mod backup;
mod cli;
mod config;
mod error;
mod ha;
mod lm;
mod prompt;
mod response;
mod workflow;
mod yamlcodec;

use cli::{Command, RootArgs};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = RootArgs::parse();
    match args.command {
        Command::Run(args) => workflow::run_request(args),
        Command::Status(args) => workflow::run_status(args),
        Command::Entities(args) => workflow::run_entities(args),
        Command::Check(args) => workflow::run_check(args),
        Command::Diff(args) => workflow::run_diff(args),
        Command::Backups(args) => workflow::run_backups(args),
    }
}
