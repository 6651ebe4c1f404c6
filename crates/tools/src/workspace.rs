//! Path resolution and atomic writes against a project root.
//!
//! Every file tool and the agent's read-set use `resolve_in_root`, so
//! `./src/a.rs`, `src/a.rs` and `/abs/root/src/a.rs` name the same file.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use hearth_core::ToolError;

/// Resolve `path` against `root`.
///
/// Relative paths are joined onto the root. Existing paths are
/// canonicalized (following symlinks); paths that do not exist yet are
/// normalized lexically, with the longest existing ancestor canonicalized.
pub fn resolve_in_root(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    if let Ok(canonical) = joined.canonicalize() {
        return canonical;
    }

    let normalized = normalize_lexically(&joined);

    // Canonicalize the deepest ancestor that exists so a new file under a
    // symlinked root still compares equal to its siblings.
    let mut existing = normalized.as_path();
    let mut rest = Vec::new();
    while let Some(parent) = existing.parent() {
        if let Some(name) = existing.file_name() {
            rest.push(name.to_os_string());
        }
        existing = parent;
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for name in rest.iter().rev() {
                out.push(name);
            }
            return out;
        }
    }
    normalized
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `path` and reject anything that lands outside `root`.
pub fn resolve_within(root: &Path, path: &str, tool_name: &str) -> Result<PathBuf, ToolError> {
    let root = resolve_in_root(root, ".");
    let resolved = resolve_in_root(&root, path);
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(ToolError::PermissionDenied {
            tool_name: tool_name.into(),
            reason: format!("{path} is outside the project root"),
        })
    }
}

/// Write `content` to `path` via a temp file in the same directory and a
/// rename over the destination. Parent directories are created.
///
/// Readers never observe a half-written file.
pub fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;

    // Keep the original permissions when replacing an existing file
    if let Ok(meta) = std::fs::metadata(path) {
        let _ = std::fs::set_permissions(tmp.path(), meta.permissions());
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_spellings_resolve_identically() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "x").unwrap();

        let a = resolve_in_root(dir.path(), "src/a.rs");
        let b = resolve_in_root(dir.path(), "./src/../src/a.rs");
        let c = resolve_in_root(dir.path(), dir.path().join("src/a.rs"));
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn missing_file_resolves_under_canonical_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let p = resolve_in_root(dir.path(), "new/dir/file.txt");
        assert_eq!(p, root.join("new/dir/file.txt"));
    }

    #[test]
    fn lexical_normalization() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/./c/../d")),
            PathBuf::from("/a/b/d")
        );
    }

    #[test]
    fn escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_within(dir.path(), "inside.txt", "fs.write").is_ok());
        let err = resolve_within(dir.path(), "../outside.txt", "fs.write").unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
        assert!(resolve_within(dir.path(), "/etc/passwd", "fs.read").is_err());
    }

    #[test]
    fn atomic_write_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("deep/nested/file.txt");
        atomic_write(&target, "one").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "one");
        atomic_write(&target, "two").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "two");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(target.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
