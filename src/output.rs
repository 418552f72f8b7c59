use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;

use crate::error::Result;
use crate::model::{Decision, Instance, LockRecord, StatusReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        let truncated: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

/// `42s`, `7m`, `3h`, `2d` since `then`.
pub fn age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(then).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

pub fn print_instance(instance: &Instance, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(instance)?),
        Format::Pretty => {
            println!("{}", instance.instance_id.to_string().cyan().bold());
            println!("  {} {}", "task:".dimmed(), instance.task.description);
            if let Some(ref agent_type) = instance.task.agent_type {
                println!("  {} {}", "agent type:".dimmed(), agent_type);
            }
            println!("  {} {}", "pid:".dimmed(), instance.pid);
            println!(
                "  {} {}",
                "registered:".dimmed(),
                instance.registered_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        Format::Minimal => println!("{}", instance.instance_id),
    }
    Ok(())
}

pub fn print_instances(instances: &[Instance], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(instances)?),
        Format::Pretty => {
            if instances.is_empty() {
                println!("{}", "No registered instances.".dimmed());
            }
            for instance in instances {
                print_instance(instance, Format::Pretty)?;
            }
        }
        Format::Minimal => {
            for instance in instances {
                println!(
                    "{} {:>7} {}",
                    instance.instance_id,
                    instance.pid,
                    truncate(&instance.task.description, 40)
                );
            }
        }
    }
    Ok(())
}

pub fn print_locks(locks: &[LockRecord], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(locks)?),
        Format::Pretty => {
            if locks.is_empty() {
                println!("{}", "No locks held.".dimmed());
            }
            let now = Utc::now();
            for lock in locks {
                println!(
                    "{} {} {}",
                    lock.resource_path.green(),
                    format!("[{}]", lock.holder_instance_id).cyan(),
                    format!("{} ago", age(lock.acquired_at, now)).dimmed(),
                );
                if !lock.reason.is_empty() {
                    println!("  {} {}", "reason:".dimmed(), lock.reason);
                }
            }
        }
        Format::Minimal => {
            for lock in locks {
                println!("{} {}", lock.resource_path, lock.holder_instance_id);
            }
        }
    }
    Ok(())
}

pub fn print_decision(decision: &Decision, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(decision)?),
        Format::Pretty => {
            println!(
                "{} {} {}",
                decision.decision_id.bold(),
                format!("[{}]", decision.category).yellow(),
                decision.title
            );
            if !decision.description.is_empty() {
                println!("  {}", decision.description);
            }
            if !decision.scope.is_empty() {
                println!("  {} {}", "scope:".dimmed(), decision.scope);
            }
            println!(
                "  {} {} {}",
                "by:".dimmed(),
                decision.made_by.instance_id,
                decision.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            );
        }
        Format::Minimal => println!("{}", decision.decision_id),
    }
    Ok(())
}

pub fn print_decisions(decisions: &[Decision], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(decisions)?),
        Format::Pretty => {
            if decisions.is_empty() {
                println!("{}", "No decisions logged.".dimmed());
            }
            for decision in decisions {
                print_decision(decision, Format::Pretty)?;
            }
        }
        Format::Minimal => {
            for d in decisions {
                println!("{} {:10} {}", d.decision_id, d.category, truncate(&d.title, 40));
            }
        }
    }
    Ok(())
}

pub fn print_status(report: &StatusReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            println!("{} {}", "Coordination:".bold(), report.root.display());
            println!(
                "  {} active, {} stale, {} locks, {} decisions",
                report.active_count().to_string().green(),
                report.stale_count().to_string().red(),
                report.locks.len(),
                report.decision_count
            );
            for status in &report.instances {
                let state = if status.stale {
                    "stale".red()
                } else {
                    "active".green()
                };
                let seen = status
                    .heartbeat
                    .as_ref()
                    .map(|hb| format!("seen {} ago", age(hb.last_seen, report.generated_at)))
                    .unwrap_or_else(|| "no heartbeat".to_string());
                println!(
                    "  {} {} {} {}",
                    status.instance.instance_id.to_string().cyan(),
                    state,
                    seen.dimmed(),
                    format!("locks={}", status.locks_held).dimmed()
                );
                println!("    {}", truncate(&status.instance.task.description, 60));
            }
            for lock in &report.locks {
                println!(
                    "  {} {} {}",
                    "lock".dimmed(),
                    lock.resource_path.green(),
                    lock.holder_instance_id
                );
            }
            for orphan in &report.orphan_heartbeats {
                println!("  {} {}", "orphan heartbeat".yellow(), orphan);
            }
        }
        Format::Minimal => {
            println!(
                "active={} stale={} locks={} decisions={}",
                report.active_count(),
                report.stale_count(),
                report.locks.len(),
                report.decision_count
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly ten", 11), "exactly ten");
    }

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("Implement authentication", 12), "Implement...");
    }

    #[test]
    fn age_picks_largest_unit() {
        let now = Utc::now();
        assert_eq!(age(now - TimeDelta::seconds(5), now), "5s");
        assert_eq!(age(now - TimeDelta::minutes(7), now), "7m");
        assert_eq!(age(now - TimeDelta::hours(3), now), "3h");
        assert_eq!(age(now - TimeDelta::days(2), now), "2d");
        assert_eq!(age(now + TimeDelta::seconds(30), now), "0s");
    }
}
