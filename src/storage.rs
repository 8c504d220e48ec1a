//! Mapping table persistence.
//!
//! The file is a JSON object keyed by emotion. Entries in the file replace the defaults one
//! by one, so a partial file still yields a complete table.

use crate::model::{EffectParameters, EmotionLabel, ParameterTable};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// `<config dir>/moodlight-sync/mappings.json`, when the platform has a config dir.
pub fn default_mappings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("moodlight-sync").join("mappings.json"))
}

pub fn load_table(path: &Path) -> Result<ParameterTable> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read mappings {}", path.display()))?;
    let entries: BTreeMap<EmotionLabel, EffectParameters> = serde_json::from_str(&raw)
        .with_context(|| format!("parse mappings {}", path.display()))?;

    let mut table = ParameterTable::default();
    for (label, params) in entries {
        table
            .set(label, params)
            .with_context(|| format!("mapping for {label} in {}", path.display()))?;
    }
    Ok(table)
}

/// Load from `path` when it exists, otherwise fall back to the defaults.
pub fn load_table_or_default(path: Option<&Path>) -> Result<ParameterTable> {
    match path {
        Some(p) if p.exists() => load_table(p),
        _ => Ok(ParameterTable::default()),
    }
}

pub fn save_table(path: &Path, table: &ParameterTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(table)?;
    std::fs::write(path, json).with_context(|| format!("write mappings {}", path.display()))?;
    Ok(())
}
