//! `roster show [--json]`

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use roster_core::{Fields, RegistryDocument};

use super::open;

/// Print the registry.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Emit the whole document as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "updated")]
    updated: String,
    #[tabled(rename = "fields")]
    fields: String,
}

impl ShowArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let store = open(root)?;
        let doc = store.load().context("failed to load the registry")?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&doc).context("failed to encode JSON")?
            );
            return Ok(());
        }
        print_document(&doc, &store.layout().to_string());
        Ok(())
    }
}

fn print_document(doc: &RegistryDocument, layout: &str) {
    println!(
        "{} entities, {} archived ({} layout)",
        doc.entities.len().to_string().bold(),
        doc.archive.len(),
        layout
    );
    if !doc.entities.is_empty() {
        let rows: Vec<EntityRow> = doc
            .entities
            .iter()
            .map(|e| EntityRow {
                id: e.id.to_string(),
                created: e.created_at.to_rfc3339(),
                updated: e
                    .updated_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
                fields: compact(&e.fields),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
    for (key, value) in &doc.metadata {
        println!("{} {key} = {value}", "meta".dimmed());
    }
    for (key, value) in &doc.config {
        println!("{} {key} = {value}", "config".dimmed());
    }
}

fn compact(fields: &Fields) -> String {
    if fields.is_empty() {
        return "-".to_string();
    }
    serde_json::to_string(fields).unwrap_or_default()
}
