//! Runtime configuration assembled once at startup.
//!
//! Everything here is derived from CLI arguments and the environment before
//! the first request is processed; nothing is re-read mid-cycle.
use crate::allowlist::AllowedFiles;
use crate::ha::{HaClient, DEFAULT_HA_URL};
use crate::lm::LmClientConfig;
use std::env;
use std::path::{Path, PathBuf};

/// Token variable injected by the Supervisor when running as an add-on.
pub const TOKEN_ENV_VAR: &str = "SUPERVISOR_TOKEN";

/// Default live configuration root inside the add-on container.
pub const DEFAULT_CONFIG_ROOT: &str = "/config";

/// The three directories one agent instance works with.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_root: PathBuf,
    pub backup_dir: PathBuf,
    pub sandbox_dir: PathBuf,
}

impl ConfigPaths {
    /// Missing directories default to dot-dirs under the configuration root,
    /// keeping everything the agent writes on one volume.
    pub fn new(
        config_root: &Path,
        backup_dir: Option<PathBuf>,
        sandbox_dir: Option<PathBuf>,
    ) -> Self {
        ConfigPaths {
            config_root: config_root.to_path_buf(),
            backup_dir: backup_dir.unwrap_or_else(|| config_root.join(".ai_backups")),
            sandbox_dir: sandbox_dir.unwrap_or_else(|| config_root.join("ai_sandbox")),
        }
    }
}

/// Fully-resolved agent configuration for one invocation.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub paths: ConfigPaths,
    pub allowed: AllowedFiles,
    pub ha_url: String,
    pub ha_token: Option<String>,
    pub lm: Option<LmClientConfig>,
}

impl AgentConfig {
    pub fn new(
        paths: ConfigPaths,
        allow: &[String],
        ha_url: Option<String>,
        lm_command: Option<String>,
    ) -> Self {
        let allowed = if allow.is_empty() {
            AllowedFiles::with_defaults(&paths.config_root)
        } else {
            AllowedFiles::new(&paths.config_root, allow.iter().cloned())
        };
        AgentConfig {
            paths,
            allowed,
            ha_url: ha_url.unwrap_or_else(|| DEFAULT_HA_URL.to_string()),
            ha_token: env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()),
            lm: lm_command.map(|command| LmClientConfig { command }),
        }
    }

    /// A client is only available when the Supervisor token is present; every
    /// caller treats its absence as a degraded-but-working condition.
    pub fn ha_client(&self) -> Option<HaClient> {
        self.ha_token
            .as_deref()
            .map(|token| HaClient::new(&self.ha_url, token))
    }
}
