//! `roster relayout <layout>`

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use super::super::LayoutArg;
use super::{open, report};

/// Convert the store to another storage layout.
#[derive(Args, Debug)]
pub struct RelayoutArgs {
    /// Target layout: monolithic | distributed.
    pub layout: LayoutArg,
}

impl RelayoutArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let mut store = open(root)?;
        let from = store.layout();
        let applied = store
            .relayout(self.layout.into())
            .with_context(|| format!("failed to convert {from} store to {}", self.layout))?;
        report(&format!("converted {from} → {}", self.layout), &applied);
        Ok(())
    }
}
