//! `roster meta <field> [value] [--now]`

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use roster_core::{FieldName, FieldRef, Logical, Value};

use super::{open, parse_value, report};

/// Set a metadata scalar, or print it when no value is given.
#[derive(Args, Debug)]
pub struct MetaArgs {
    pub field: String,

    /// New value (parsed as JSON, else a string).
    #[arg(conflicts_with = "now")]
    pub value: Option<String>,

    /// Set the field to the current UTC time.
    #[arg(long)]
    pub now: bool,
}

impl MetaArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let store = open(root)?;
        let field = FieldName::from(self.field.as_str());

        let applied = match (self.value, self.now) {
            (_, true) => store.touch_metadata(&field),
            (Some(raw), false) => store.update_scalar_metadata(&field, parse_value(&raw)),
            (None, false) => {
                let value = store
                    .read_field(&FieldRef::Metadata(field))
                    .with_context(|| format!("failed to read '{}'", self.field))?;
                match value {
                    Logical::Scalar(Some(Value::String(s))) => println!("{s}"),
                    Logical::Scalar(Some(value)) => println!("{value}"),
                    Logical::Scalar(None) => bail!("metadata field '{}' is not set", self.field),
                    other => bail!("unexpected value for '{}': {other:?}", self.field),
                }
                return Ok(());
            }
        }
        .with_context(|| format!("failed to set '{}'", self.field))?;
        report(&format!("set '{}'", self.field), &applied);
        Ok(())
    }
}
