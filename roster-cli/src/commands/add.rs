//! `roster add <id> [--field key=value]...`

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use roster_core::{Entity, Value};

use super::{open, parse_assignment, report};

/// Add an entity, or refresh it if this version is newer.
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Entity id; also its file name under the distributed layout.
    pub id: String,

    /// Initial field, as key=value (value parsed as JSON, else a string).
    #[arg(long = "field", short = 'f', value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub fields: Vec<(String, Value)>,
}

impl AddArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let store = open(root)?;
        let entity = self
            .fields
            .into_iter()
            .fold(Entity::new(self.id.as_str(), Utc::now()), |e, (k, v)| {
                e.with_field(k, v)
            });
        let applied = store
            .add_entity(entity)
            .with_context(|| format!("failed to add '{}'", self.id))?;
        report(&format!("added '{}'", self.id), &applied);
        Ok(())
    }
}
