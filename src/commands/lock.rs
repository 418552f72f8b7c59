use colored::Colorize;

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::instance_id::InstanceId;
use crate::output::{self, Format};
use crate::store::lock_manager::{LockOutcome, ReleaseOutcome};

/// Returns whether the caller holds the lock afterwards.
pub fn acquire(
    coord: &Coordinator,
    id: &InstanceId,
    path: &str,
    reason: Option<&str>,
    format: Format,
) -> Result<bool> {
    let outcome = coord.acquire(id, path, reason.unwrap_or(""))?;
    let kind = match outcome {
        LockOutcome::Acquired(_) => "acquired",
        LockOutcome::AlreadyHeld(_) => "already_held",
        LockOutcome::Conflict(_) => "conflict",
    };
    let record = outcome.record();
    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({
                "acquired": outcome.is_held(),
                "outcome": kind,
                "lock": record,
            })
        ),
        Format::Pretty => match &outcome {
            LockOutcome::Acquired(r) => println!("Locked {}", r.resource_path.green()),
            LockOutcome::AlreadyHeld(r) => {
                println!("Already holding {}", r.resource_path.green())
            }
            LockOutcome::Conflict(r) => println!(
                "{} {} is held by {} (pid {})",
                "Conflict:".red().bold(),
                r.resource_path,
                r.holder_instance_id.to_string().cyan(),
                r.holder_pid
            ),
        },
        Format::Minimal => println!("{kind}"),
    }
    Ok(outcome.is_held())
}

pub fn check(coord: &Coordinator, id: &InstanceId, path: &str, format: Format) -> Result<()> {
    let holder = coord.lock_holder(path)?;
    let held = holder.as_ref().is_some_and(|r| &r.holder_instance_id == id);
    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({ "held": held, "lock": holder })
        ),
        Format::Pretty => match &holder {
            Some(r) if held => println!("You hold {}", r.resource_path.green()),
            Some(r) => println!(
                "{} held by {}",
                r.resource_path,
                r.holder_instance_id.to_string().cyan()
            ),
            None => println!("{}", "Not locked.".dimmed()),
        },
        Format::Minimal => println!("{held}"),
    }
    Ok(())
}

/// Returns `false` only when someone else holds the lock.
pub fn release(coord: &Coordinator, id: &InstanceId, path: &str, format: Format) -> Result<bool> {
    let outcome = coord.release(id, path)?;
    let (kind, record) = match &outcome {
        ReleaseOutcome::Released(r) => ("released", Some(r)),
        ReleaseOutcome::NotLocked => ("not_locked", None),
        ReleaseOutcome::HeldByOther(r) => ("held_by_other", Some(r)),
    };
    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({
                "released": outcome.is_success(),
                "outcome": kind,
                "lock": record,
            })
        ),
        Format::Pretty => match &outcome {
            ReleaseOutcome::Released(r) => println!("Released {}", r.resource_path.green()),
            ReleaseOutcome::NotLocked => println!("{}", "Not locked.".dimmed()),
            ReleaseOutcome::HeldByOther(r) => println!(
                "{} {} is held by {}",
                "Refused:".red().bold(),
                r.resource_path,
                r.holder_instance_id.to_string().cyan()
            ),
        },
        Format::Minimal => println!("{kind}"),
    }
    Ok(outcome.is_success())
}

pub fn release_all(coord: &Coordinator, id: &InstanceId, format: Format) -> Result<()> {
    let released = coord.release_all(id)?;
    print_released(&released, format)
}

pub fn force_release(coord: &Coordinator, path: &str, format: Format) -> Result<()> {
    let removed = coord.force_release(path)?;
    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({ "released": removed.is_some(), "lock": removed })
        ),
        Format::Pretty => match &removed {
            Some(r) => println!(
                "Force-released {} {}",
                r.resource_path.green(),
                format!("(was {})", r.holder_instance_id).dimmed()
            ),
            None => println!("{}", "Not locked.".dimmed()),
        },
        Format::Minimal => println!("{}", removed.is_some()),
    }
    Ok(())
}

pub fn list(coord: &Coordinator, format: Format) -> Result<()> {
    let locks = coord.list_locks()?;
    output::print_locks(&locks, format)
}

fn print_released(released: &[String], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::json!({ "released": released })),
        Format::Pretty => {
            if released.is_empty() {
                println!("{}", "No locks held.".dimmed());
            }
            for path in released {
                println!("Released {}", path.green());
            }
        }
        Format::Minimal => {
            for path in released {
                println!("{path}");
            }
        }
    }
    Ok(())
}
