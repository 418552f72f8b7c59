use tracing_subscriber::EnvFilter;

/// Filter directives for the binary, e.g. `AGENTCOORD_LOG=agentcoord=debug`.
pub const ENV_LOG: &str = "AGENTCOORD_LOG";

const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber. Logs go to stderr; stdout carries output.
///
/// Safe to call more than once (later calls are no-ops).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(std::env::var(ENV_LOG).ok().as_deref()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_warn() {
        assert_eq!(env_filter(None).to_string(), "warn");
        assert_eq!(env_filter(Some("  ")).to_string(), "warn");
    }

    #[test]
    fn uses_given_directives() {
        assert_eq!(env_filter(Some("debug")).to_string(), "debug");
    }
}
