//! `roster init-store`: schema and role seeding for a fresh store.

use anyhow::{Context, Result};
use clap::Args;

use roster_core::Config;
use roster_sync::pipeline;

/// Arguments for `roster init-store`.
#[derive(Args, Debug)]
pub struct InitStoreArgs {}

impl InitStoreArgs {
    pub fn run(self, config: &Config) -> Result<()> {
        pipeline::init_store(config).with_context(|| {
            format!("failed to initialise store at {}", config.store.path.display())
        })?;
        println!("✓ store ready at {}", config.store.path.display());
        Ok(())
    }
}
