//! `roster metric <id> key=value...`

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use roster_core::{EntityId, Fields, Value};

use super::{open, parse_assignment, report};

/// Merge values into an entity's metrics.
#[derive(Args, Debug)]
pub struct MetricArgs {
    pub id: String,

    /// Metric values, as key=value (value parsed as JSON, else a string).
    #[arg(required = true, value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub values: Vec<(String, Value)>,
}

impl MetricArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let store = open(root)?;
        let patch: Fields = self.values.into_iter().collect();
        let applied = store
            .update_metric(&EntityId::from(self.id.as_str()), patch)
            .with_context(|| format!("failed to update metrics of '{}'", self.id))?;
        report(&format!("updated metrics of '{}'", self.id), &applied);
        Ok(())
    }
}
