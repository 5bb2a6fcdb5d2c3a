//! System prompt assembly.
//!
//! The base template ships with the binary; request-specific context (mode,
//! allow-list, entity sample, current file contents) is substituted into
//! named placeholders.
use crate::allowlist::AllowedFiles;
use crate::apply::ApplyMode;
use crate::ha::Entity;

pub const SYSTEM_BASE_MD: &str = include_str!("../prompts/system_base.md");

/// Entities beyond this count are omitted from the prompt.
pub const ENTITY_SAMPLE_LIMIT: usize = 100;

pub fn build_system_prompt(
    mode: ApplyMode,
    allowed: &AllowedFiles,
    entities: &[Entity],
    current_files: &[(String, String)],
) -> String {
    SYSTEM_BASE_MD
        .replace("{mode}", mode.as_str())
        .replace("{mode_instructions}", mode_instructions(mode))
        .replace("{allowed_files}", &render_allowed(allowed))
        .replace("{entities}", &render_entities(entities))
        .replace("{current_config}", &render_current(current_files))
}

fn mode_instructions(mode: ApplyMode) -> &'static str {
    match mode {
        ApplyMode::ReadOnly => {
            "Proposals are displayed to the user only; nothing is written. \
             Explain what each change would do."
        }
        ApplyMode::DryRun => {
            "Proposals are staged to a sandbox for review; the live \
             configuration is not touched."
        }
        ApplyMode::Apply => {
            "Proposals are written to the live configuration after the user \
             confirms each file. Be conservative and keep unrelated sections \
             exactly as they are."
        }
    }
}

fn render_allowed(allowed: &AllowedFiles) -> String {
    allowed
        .names()
        .map(|name| format!("- {name}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_entities(entities: &[Entity]) -> String {
    if entities.is_empty() {
        return "(entity states unavailable)".to_string();
    }
    entities
        .iter()
        .take(ENTITY_SAMPLE_LIMIT)
        .map(|entity| match entity.friendly_name() {
            Some(name) => format!("- {} ({}): {}", entity.entity_id, name, entity.state),
            None => format!("- {}: {}", entity.entity_id, entity.state),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_current(current_files: &[(String, String)]) -> String {
    if current_files.is_empty() {
        return "(no existing files)".to_string();
    }
    current_files
        .iter()
        .map(|(name, content)| format!("### {name}\n\n```yaml\n{}\n```", content.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
