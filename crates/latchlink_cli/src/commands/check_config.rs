//! Check-config command implementation.

use latchlink_engine::{Correction, EngineConfig, EngineResult};
use std::path::Path;

/// Loads a configuration file and applies the fail-safe floors.
pub fn check(path: &Path) -> EngineResult<(EngineConfig, Vec<Correction>)> {
    let config = EngineConfig::load(path)?;
    Ok(config.sanitized())
}

/// Runs the check-config command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Checking configuration at {:?}", path);
    println!();

    let (config, corrections) = check(path)?;
    if corrections.is_empty() {
        println!("✓ No corrections needed");
    } else {
        println!("Corrections:");
        for c in &corrections {
            println!("  {:<28} {} -> {}", c.field, c.from, c.to);
        }
    }

    println!();
    println!("Effective configuration:");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
