use std::path::PathBuf;
use std::time::Duration;

use agentcoord::config::CoordConfig;
use agentcoord::coordinator::Coordinator;
use agentcoord::error::{CoordError, Result};
use agentcoord::instance_id::InstanceId;
use agentcoord::output::Format;
use agentcoord::store::decisions::NewDecision;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Exit status when a lock is held by another instance.
const EXIT_CONFLICT: i32 = 3;

#[derive(Parser)]
#[command(
    name = "agentcoord",
    version,
    about = "File-based coordination for concurrent coding-assistant instances"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Coordination directory (default: discovered from the working directory)
    #[arg(long, global = true, env = "AGENTCOORD_DIR")]
    dir: Option<PathBuf>,
    /// Calling instance id (as printed by `register`)
    #[arg(long, global = true, env = "AGENTCOORD_INSTANCE_ID")]
    instance: Option<String>,
    /// Heartbeat age in seconds after which an instance is stale
    #[arg(long, global = true)]
    stale_secs: Option<u64>,
    /// Report errors but exit 0, for use in hooks
    #[arg(
        long,
        global = true,
        env = "AGENTCOORD_SOFT_FAIL",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    soft_fail: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the coordination directory and empty documents
    Init {
        /// Replace an existing (e.g. corrupt) registry with an empty one
        #[arg(long)]
        reset_registry: bool,
    },
    /// Register this process as a new instance and print its id
    Register {
        /// What this instance is working on
        #[arg(long)]
        task: String,
        /// Free-form agent kind, e.g. "backend"
        #[arg(long)]
        agent_type: Option<String>,
        /// Owning process id (default: this process)
        #[arg(long)]
        pid: Option<u32>,
        /// Instance id prefix
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Remove the calling instance, its heartbeat and its locks
    Unregister,
    /// List registered instances
    List,
    /// Refresh the calling instance's heartbeat
    Heartbeat,
    /// Remove instances whose heartbeat has gone stale
    Reap,
    /// Advisory per-file locks
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
    /// Shared decision log
    Decision {
        #[command(subcommand)]
        action: DecisionAction,
    },
    /// Summary of instances, liveness and locks
    Status,
}

#[derive(Subcommand)]
enum LockAction {
    /// Try to lock a file (exit 3 if another instance holds it)
    Acquire {
        path: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show whether the calling instance holds a file's lock
    Check { path: String },
    /// Release a lock held by the calling instance
    Release { path: String },
    /// Release every lock held by the calling instance
    ReleaseAll,
    /// Remove a lock regardless of holder
    ForceRelease { path: String },
    /// List all held locks
    List,
}

#[derive(Subcommand)]
enum DecisionAction {
    /// Append a decision made by the calling instance
    Log {
        #[arg(long)]
        category: String,
        #[arg(long)]
        title: String,
        #[arg(long, short, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        scope: String,
    },
    /// Read decisions back
    List {
        #[arg(long)]
        category: Option<String>,
        /// Only decisions on or after this UTC date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
        /// Only decisions by this instance id
        #[arg(long)]
        made_by: Option<String>,
        /// Show only the most recent N
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn require_instance(instance: Option<&str>) -> Result<InstanceId> {
    instance
        .filter(|s| !s.trim().is_empty())
        .ok_or(CoordError::MissingInstance)?
        .parse()
}

fn load_config(cli: &Cli, prefix: Option<&str>) -> Result<CoordConfig> {
    let cwd = std::env::current_dir()?;
    let root = agentcoord::repo::find_coordination_dir(cli.dir.as_deref(), &cwd);
    let mut config = CoordConfig::load(&root)?;
    if let Some(secs) = cli.stale_secs {
        config = config.with_stale_after(Duration::from_secs(secs));
    }
    if let Some(prefix) = prefix {
        config = config.with_id_prefix(prefix);
    }
    config.validate()?;
    Ok(config)
}

/// Returns `false` when a lock operation hit another instance's lock.
fn run(cli: Cli, format: Format) -> Result<bool> {
    let prefix = match &cli.command {
        Commands::Register { prefix, .. } => prefix.as_deref(),
        _ => None,
    };
    let config = load_config(&cli, prefix)?;
    let mut coord = Coordinator::open(config)?;
    let instance = cli.instance.as_deref();

    match cli.command {
        Commands::Init { reset_registry } => {
            agentcoord::commands::init::run(&coord, reset_registry, format)?
        }
        Commands::Register {
            task,
            agent_type,
            pid,
            prefix: _,
        } => {
            if let Some(pid) = pid {
                coord = coord.with_pid(pid);
            }
            agentcoord::commands::instance::register(&coord, &task, agent_type.as_deref(), format)?
        }
        Commands::Unregister => {
            agentcoord::commands::instance::unregister(&coord, &require_instance(instance)?, format)?
        }
        Commands::List => agentcoord::commands::instance::list(&coord, format)?,
        Commands::Heartbeat => {
            agentcoord::commands::instance::heartbeat(&coord, &require_instance(instance)?, format)?
        }
        Commands::Reap => agentcoord::commands::instance::reap(&coord, format)?,
        Commands::Lock { action } => match action {
            LockAction::Acquire { path, reason } => {
                let id = require_instance(instance)?;
                return agentcoord::commands::lock::acquire(
                    &coord,
                    &id,
                    &path,
                    reason.as_deref(),
                    format,
                );
            }
            LockAction::Check { path } => {
                let id = require_instance(instance)?;
                agentcoord::commands::lock::check(&coord, &id, &path, format)?
            }
            LockAction::Release { path } => {
                let id = require_instance(instance)?;
                return agentcoord::commands::lock::release(&coord, &id, &path, format);
            }
            LockAction::ReleaseAll => {
                let id = require_instance(instance)?;
                agentcoord::commands::lock::release_all(&coord, &id, format)?
            }
            LockAction::ForceRelease { path } => {
                agentcoord::commands::lock::force_release(&coord, &path, format)?
            }
            LockAction::List => agentcoord::commands::lock::list(&coord, format)?,
        },
        Commands::Decision { action } => match action {
            DecisionAction::Log {
                category,
                title,
                description,
                scope,
            } => {
                let id = require_instance(instance)?;
                let decision = NewDecision {
                    category,
                    title,
                    description,
                    scope,
                };
                agentcoord::commands::decision::log(&coord, &id, decision, format)?
            }
            DecisionAction::List {
                category,
                since,
                made_by,
                limit,
            } => {
                let made_by = made_by.map(|s| s.parse::<InstanceId>()).transpose()?;
                agentcoord::commands::decision::list(
                    &coord, category, since, made_by, limit, format,
                )?
            }
        },
        Commands::Status => agentcoord::commands::status::run(&coord, format)?,
    }
    Ok(true)
}

fn main() {
    agentcoord::logging::init_tracing();
    let cli = Cli::parse();
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    let soft_fail = cli.soft_fail;
    match run(cli, format) {
        Ok(true) => {}
        Ok(false) => std::process::exit(EXIT_CONFLICT),
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            match format {
                Format::Json => {
                    eprintln!(
                        "{}",
                        serde_json::json!({
                            "error": e.code(),
                            "message": e.to_string(),
                            "retryable": e.is_retryable()
                        })
                    );
                }
                _ => eprintln!("error: {e}"),
            }
            if !soft_fail {
                std::process::exit(1);
            }
        }
    }
}
