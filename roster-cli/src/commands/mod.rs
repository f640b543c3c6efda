//! Subcommands and the helpers they share.

pub mod add;
pub mod init;
pub mod meta;
pub mod metric;
pub mod relayout;
pub mod remove;
pub mod show;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;

use roster_core::Value;
use roster_store::{settings, Applied, DirBackend, RegistryStore};

/// `--root`, or `~/.roster`.
pub fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(root) => Ok(root),
        None => settings::default_root().context("could not determine the store directory"),
    }
}

/// Open an initialised store.
pub fn open(root: &Path) -> Result<RegistryStore<DirBackend>> {
    if !settings::settings_path_at(root).exists() {
        bail!(
            "no store at {}; run `roster init` first",
            root.display()
        );
    }
    let store = RegistryStore::open_at(root)
        .with_context(|| format!("failed to load settings from {}", root.display()))?;
    tracing::debug!(root = %root.display(), layout = %store.layout(), "opened store");
    Ok(store)
}

/// Parse `key=value`; the value is JSON when it parses as JSON, a string otherwise.
pub fn parse_assignment(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_owned(), parse_value(raw)))
}

pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// One-line summary of an update.
pub fn report(what: &str, applied: &Applied) {
    if applied.is_noop() {
        println!("{} {what} (already up to date)", "·".dimmed());
    } else {
        println!(
            "{} {what} ({} path(s) committed)",
            "✓".green(),
            applied.revisions.len()
        );
    }
    if applied.conflict_retries > 0 || applied.unavailable_retries > 0 {
        println!(
            "  {}",
            format!(
                "retries: {} conflict, {} backend",
                applied.conflict_retries, applied.unavailable_retries
            )
            .yellow()
        );
    }
}
