use colored::Colorize;

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::instance_id::InstanceId;
use crate::output::{self, Format};

pub fn register(
    coord: &Coordinator,
    task: &str,
    agent_type: Option<&str>,
    format: Format,
) -> Result<()> {
    let instance = coord.register_instance(task, agent_type)?;
    match format {
        Format::Pretty => {
            println!("Registered {}", instance.instance_id.to_string().cyan().bold());
            println!("  {} {}", "task:".dimmed(), instance.task.description);
        }
        _ => output::print_instance(&instance, format)?,
    }
    Ok(())
}

pub fn unregister(coord: &Coordinator, id: &InstanceId, format: Format) -> Result<()> {
    let departure = coord.unregister(id)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string(&departure)?),
        Format::Pretty => {
            if departure.was_registered {
                println!("Unregistered {}", id.to_string().cyan());
            } else {
                println!("{} was not registered", id.to_string().dimmed());
            }
            for path in &departure.released_locks {
                println!("  {} {}", "released:".dimmed(), path);
            }
        }
        Format::Minimal => println!("{id}"),
    }
    Ok(())
}

pub fn list(coord: &Coordinator, format: Format) -> Result<()> {
    let instances = coord.list_instances()?;
    output::print_instances(&instances, format)
}

pub fn heartbeat(coord: &Coordinator, id: &InstanceId, format: Format) -> Result<()> {
    let record = coord.heartbeat(id)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string(&record)?),
        Format::Pretty => println!(
            "{} {} {}",
            id.to_string().cyan(),
            record.status.to_string().green(),
            format!("ping #{}", record.ping_count).dimmed()
        ),
        Format::Minimal => println!("{}", record.ping_count),
    }
    Ok(())
}

/// Reap with the configured timeout (`--stale-secs` overrides it upstream).
pub fn reap(coord: &Coordinator, format: Format) -> Result<()> {
    let reaped = coord.reap()?;
    match format {
        Format::Json => println!("{}", serde_json::json!({ "reaped": reaped })),
        Format::Pretty => {
            if reaped.is_empty() {
                println!("{}", "No stale instances.".dimmed());
            } else {
                println!("Reaped {} stale instance(s):", reaped.len().to_string().bold());
                for id in &reaped {
                    println!("  {}", id.to_string().red());
                }
            }
        }
        Format::Minimal => {
            for id in &reaped {
                println!("{id}");
            }
        }
    }
    Ok(())
}
