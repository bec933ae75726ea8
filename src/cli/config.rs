//! `keel config`: print the configuration the server would run with

use crate::server::{load_config, DEFAULT_CONFIG};
use anyhow::{Context, Result};
use std::path::Path;

pub fn run(defaults: bool, explicit: Option<&Path>) -> Result<()> {
    if defaults {
        print!("{}", DEFAULT_CONFIG);
        return Ok(());
    }
    let config = load_config(explicit).context("Failed to load configuration")?;
    print!("{}", config.to_toml()?);
    Ok(())
}
