//! Default-config command implementation.

use latchlink_engine::EngineConfig;
use latchlink_protocol::DeviceKind;

/// Prints the default configuration for a device kind as JSON.
pub fn run(device: DeviceKind) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::new(device);
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
