pub mod monitor;
pub mod vm;

use anyhow::Result;
use serde::Serialize;

/// Print a command result to stdout as pretty JSON
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
