// 📝 Logging - tracing subscriber setup for the binaries

use anyhow::{Context, Result};
use std::str::FromStr;
use tracing::Level;

/// Parse a level name ("info", "DEBUG", ...). Unknown names are an error.
pub fn parse_level(name: &str) -> Result<Level> {
    Level::from_str(name).with_context(|| format!("Invalid log level: {}", name))
}

/// Install the global fmt subscriber. Safe to call twice; the second call is a no-op.
pub fn init(level_name: &str) -> Result<()> {
    let level = parse_level(level_name)?;
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    Ok(())
}
