//! `roster remove <id>... --reason TEXT`

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use roster_core::EntityId;

use super::{open, report};

/// Move entities to the archive. Unknown ids are skipped.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    #[arg(required = true, value_name = "ID")]
    pub ids: Vec<String>,

    /// Recorded with each tombstone.
    #[arg(long, short = 'r')]
    pub reason: String,
}

impl RemoveArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let store = open(root)?;
        let ids: Vec<EntityId> = self.ids.iter().map(|id| EntityId::from(id.as_str())).collect();
        let applied = store
            .remove_entities(ids, &self.reason)
            .with_context(|| format!("failed to remove {}", self.ids.join(", ")))?;
        report(&format!("removed {}", self.ids.join(", ")), &applied);
        Ok(())
    }
}
