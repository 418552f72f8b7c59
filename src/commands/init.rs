use colored::Colorize;

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::output::Format;

pub fn run(coord: &Coordinator, reset_registry: bool, format: Format) -> Result<()> {
    let report = coord.init()?;
    let reset = reset_registry && !report.created_registry;
    if reset {
        coord.reset_registry()?;
    }
    let root = coord.root().display().to_string();
    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({
                "root": root,
                "created_registry": report.created_registry,
                "created_decision_log": report.created_decision_log,
                "registry_reset": reset,
            })
        ),
        Format::Pretty => {
            println!("Initialized coordination directory {}", root.cyan());
            if reset {
                println!("  {}", "registry reset to empty".yellow());
            }
        }
        Format::Minimal => println!("{root}"),
    }
    Ok(())
}
