use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{CoordError, Result};

const STEM_MAX_LEN: usize = 48;

/// Normalize a lock resource path to an absolute, lexically clean form.
///
/// Contract:
/// - trim surrounding whitespace, reject empty input
/// - relative paths are resolved against `base` (normally the process cwd)
/// - '.' segments dropped, '..' resolved lexically (never above the root)
/// - duplicate and trailing separators removed
///
/// The filesystem is not consulted, so the file need not exist and symlinks
/// are not resolved.
pub fn normalize_resource_path(input: &str, base: &Path) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CoordError::InvalidPath(
            input.to_string(),
            "path cannot be empty".into(),
        ));
    }

    let raw = Path::new(trimmed);
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else if base.is_absolute() {
        base.join(raw)
    } else {
        return Err(CoordError::InvalidPath(
            input.to_string(),
            format!("base directory '{}' is not absolute", base.display()),
        ));
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if normalized.file_name().is_some() {
                    normalized.pop();
                }
            }
            Component::Normal(segment) => normalized.push(segment),
        }
    }

    Ok(normalized.to_string_lossy().into_owned())
}

/// Deterministic lock-file name for a normalized path:
/// `<sanitized file name>-<16 hex of SHA-256>.json`.
///
/// The stem keeps `locks/` readable; the hash keeps distinct paths with the
/// same file name apart.
pub fn lock_file_name(normalized: &str) -> String {
    let stem: String = Path::new(normalized)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(STEM_MAX_LEN)
        .collect();
    let stem = stem.trim_start_matches('.');
    let stem = if stem.is_empty() { "root" } else { stem };
    format!("{stem}-{}.json", path_digest(normalized))
}

/// First 8 bytes of the SHA-256 of `normalized`, as 16 lowercase hex chars.
fn path_digest(normalized: &str) -> String {
    Sha256::digest(normalized.as_bytes())
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn base() -> &'static Path {
        Path::new("/repo")
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        assert_eq!(
            normalize_resource_path("src/auth.go", base()).unwrap(),
            "/repo/src/auth.go"
        );
    }

    #[test]
    fn lexical_cleanup() {
        let cases = [
            ("/repo/src/./auth.go", "/repo/src/auth.go"),
            ("/repo/src/../src/auth.go", "/repo/src/auth.go"),
            ("/repo//src///auth.go", "/repo/src/auth.go"),
            ("/repo/src/", "/repo/src"),
            ("  /repo/a.rs  ", "/repo/a.rs"),
            ("./a/../b.rs", "/repo/b.rs"),
            ("/../../etc/passwd", "/etc/passwd"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                normalize_resource_path(input, base()).unwrap(),
                expected,
                "input {input:?}"
            );
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(normalize_resource_path("", base()).is_err());
        assert!(normalize_resource_path("   ", base()).is_err());
    }

    #[test]
    fn relative_base_is_rejected() {
        let err = normalize_resource_path("a.rs", Path::new("relative")).unwrap_err();
        assert!(matches!(err, CoordError::InvalidPath(_, _)));
    }

    #[test]
    fn lock_file_name_is_deterministic_and_distinct() {
        let a = lock_file_name("/repo/src/auth.go");
        assert_eq!(a, lock_file_name("/repo/src/auth.go"));
        assert!(a.starts_with("auth.go-"));
        assert!(a.ends_with(".json"));

        let b = lock_file_name("/repo/pkg/auth.go");
        assert_ne!(a, b);
    }

    #[test]
    fn lock_file_suffix_is_truncated_sha256() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223...
        assert_eq!(lock_file_name("abc"), "abc-ba7816bf8f01cfea.json");

        let name = lock_file_name("/repo/src/auth.go");
        let suffix = name
            .strip_prefix("auth.go-")
            .and_then(|rest| rest.strip_suffix(".json"))
            .unwrap();
        assert_eq!(suffix.len(), 16);
        assert!(suffix.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }

    #[test]
    fn lock_file_name_sanitizes_stem() {
        let name = lock_file_name("/repo/my file (1).rs");
        assert!(name.starts_with("my_file__1_.rs-"), "{name}");
        assert_eq!(lock_file_name("/").split('-').next(), Some("root"));
        assert!(lock_file_name("/repo/.env").starts_with("env-"));

        let long = format!("/repo/{}", "x".repeat(300));
        assert!(lock_file_name(&long).len() < 80);
    }
}
