use std::path::Path;

use anyhow::Result;

use calcium_core::store::Table;

use crate::summary::print_status;

use super::open_context;

pub fn run(config_path: &Path) -> Result<()> {
    let (config, ctx) = open_context(config_path)?;
    let mut counts = Vec::with_capacity(Table::ALL.len());
    for table in Table::ALL {
        counts.push((table, ctx.catalog.count(table)?));
    }
    print_status(&config.store, &counts);
    Ok(())
}
