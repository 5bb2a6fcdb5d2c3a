//! Structured-document codec: parse, dump, recursive merge, structural diff.
//!
//! Documents are `serde_yaml::Value` trees. Dumping a document parsed from
//! text this codec produced is idempotent; exact preservation of hand-written
//! formatting or comments from other sources is not guaranteed.
use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};

/// A parsed configuration document tree.
pub type ConfigDocument = Value;

pub fn parse(text: &str) -> Result<ConfigDocument> {
    serde_yaml::from_str(text).context("parse YAML document")
}

pub fn dump(document: &ConfigDocument) -> Result<String> {
    serde_yaml::to_string(document).context("dump YAML document")
}

/// Recursive merge of `update` into `base`.
///
/// Where both sides hold a mapping at the same path, keys from `update` are
/// merged in recursively; for everything else (including sequences, which are
/// replaced wholesale) the update value wins.
pub fn merge(base: &ConfigDocument, update: &ConfigDocument) -> ConfigDocument {
    match (base, update) {
        (Value::Mapping(base_map), Value::Mapping(update_map)) => {
            let mut merged = base_map.clone();
            for (key, update_value) in update_map {
                let next = match merged.get(key) {
                    Some(base_value) => merge(base_value, update_value),
                    None => update_value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Mapping(merged)
        }
        _ => update.clone(),
    }
}

/// One changed leaf value in a structural diff.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedValue {
    pub path: String,
    pub old: Value,
    pub new: Value,
}

/// Order-insensitive structural comparison of two documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuralDiff {
    pub changed: Vec<ChangedValue>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl StructuralDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn diff(old: &ConfigDocument, new: &ConfigDocument) -> StructuralDiff {
    let mut out = StructuralDiff::default();
    diff_value(old, new, "", &mut out);
    out
}

fn diff_value(old: &Value, new: &Value, path: &str, out: &mut StructuralDiff) {
    match (old, new) {
        (Value::Mapping(old_map), Value::Mapping(new_map)) => {
            diff_mapping(old_map, new_map, path, out)
        }
        (Value::Sequence(old_seq), Value::Sequence(new_seq)) => {
            diff_sequence(old_seq, new_seq, path, out)
        }
        _ => {
            if old != new {
                out.changed.push(ChangedValue {
                    path: path.to_string(),
                    old: old.clone(),
                    new: new.clone(),
                });
            }
        }
    }
}

fn diff_mapping(old: &Mapping, new: &Mapping, path: &str, out: &mut StructuralDiff) {
    for (key, old_value) in old {
        let child = child_path(path, key);
        match new.get(key) {
            Some(new_value) => diff_value(old_value, new_value, &child, out),
            None => out.removed.push(child),
        }
    }
    for key in new.keys() {
        if !old.contains_key(key) {
            out.added.push(child_path(path, key));
        }
    }
}

/// Sequences are compared as multisets: each element of `new` consumes an
/// equal element of `old` when one exists; leftovers on either side are
/// reported as added/removed under their own index.
fn diff_sequence(old: &[Value], new: &[Value], path: &str, out: &mut StructuralDiff) {
    let mut matched = vec![false; old.len()];
    for (new_idx, new_value) in new.iter().enumerate() {
        let hit = old
            .iter()
            .enumerate()
            .find(|(old_idx, old_value)| !matched[*old_idx] && *old_value == new_value);
        match hit {
            Some((old_idx, _)) => matched[old_idx] = true,
            None => out.added.push(format!("{path}[{new_idx}]")),
        }
    }
    for (old_idx, was_matched) in matched.iter().enumerate() {
        if !was_matched {
            out.removed.push(format!("{path}[{old_idx}]"));
        }
    }
}

fn child_path(path: &str, key: &Value) -> String {
    let key = key_label(key);
    if path.is_empty() {
        key
    } else {
        format!("{path}.{key}")
    }
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "~".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "?".to_string()),
    }
}
