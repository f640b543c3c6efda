//! `roster init [--layout monolithic|distributed]`

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use roster_store::{settings, RegistryStore, StoreSettings};

use super::super::LayoutArg;

/// Create the store and write its settings.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Storage layout: monolithic | distributed (default: distributed).
    #[arg(long, value_name = "LAYOUT")]
    pub layout: Option<LayoutArg>,
}

impl InitArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        if settings::settings_path_at(root).exists() {
            let current = settings::load_at(root)
                .with_context(|| format!("failed to read settings under {}", root.display()))?;
            match self.layout {
                Some(layout) if layout.0 != current.layout => bail!(
                    "store at {} already uses the {} layout; use `roster relayout {}` to convert it",
                    root.display(),
                    current.layout,
                    layout
                ),
                _ => {
                    println!("· store at {} already initialised", root.display());
                    return Ok(());
                }
            }
        }

        let mut settings = StoreSettings::default();
        if let Some(layout) = self.layout {
            settings.layout = layout.into();
        }
        let store = RegistryStore::init_at(root, settings)
            .with_context(|| format!("failed to initialise store at {}", root.display()))?;
        println!(
            "✓ Initialised store at {} ({} layout)",
            root.display(),
            store.layout()
        );
        Ok(())
    }
}
