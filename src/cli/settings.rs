use anyhow::Result;

use super::{print_json, GlobalArgs};

pub fn execute(global: &GlobalArgs) -> Result<()> {
    let settings = global.settings()?;
    print_json(&settings)
}
