use std::path::{Path, PathBuf};

use git2::Repository;

/// Coordination directory relative to the project root.
pub const COORDINATION_DIR: &str = ".claude/coordination";

pub const ENV_DIR: &str = "AGENTCOORD_DIR";

/// Resolve the coordination directory for a CLI invocation.
///
/// Order: explicit directory (flag or env), nearest ancestor of `cwd` that
/// already has one, the enclosing git work tree, then `cwd` itself.
pub fn find_coordination_dir(explicit: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(dir) = explicit {
        return if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            cwd.join(dir)
        };
    }
    if let Some(existing) = find_existing(cwd) {
        return existing;
    }
    let project = git_workdir(cwd).unwrap_or_else(|| cwd.to_path_buf());
    project.join(COORDINATION_DIR)
}

/// Walk up from `start` looking for an initialized coordination directory.
pub fn find_existing(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(COORDINATION_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Root of the git work tree containing `path`, if any. Bare repos have none.
pub fn git_workdir(path: &Path) -> Option<PathBuf> {
    let repo = Repository::discover(path).ok()?;
    repo.workdir().map(Path::to_path_buf)
}
