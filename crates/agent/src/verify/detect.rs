//! Guess verification commands from project marker files.

use std::path::Path;

use tracing::debug;

pub const NO_COMMANDS_DETECTED: &str = "echo 'No verification commands detected'";

/// Commands for every ecosystem whose marker files are present under `root`.
///
/// Never empty: with no markers the result is a single no-op `echo`.
pub fn detect_commands(root: &Path) -> Vec<String> {
    let mut commands = Vec::new();

    if root.join("pyproject.toml").exists() || root.join("setup.py").exists() {
        if root.join("tests").is_dir() {
            commands.push("python -m pytest --tb=short -q".to_string());
        } else {
            commands.push("python -m compileall -q .".to_string());
        }
    }

    if let Ok(raw) = std::fs::read_to_string(root.join("package.json")) {
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(pkg) => {
                let scripts = pkg.get("scripts").and_then(|s| s.as_object());
                if scripts.is_some_and(|s| s.contains_key("test")) {
                    commands.push("npm test".to_string());
                }
                if scripts.is_some_and(|s| s.contains_key("build")) {
                    commands.push("npm run build".to_string());
                }
            }
            Err(e) => debug!(error = %e, "Ignoring unparseable package.json"),
        }
    }

    if root.join("Package.swift").exists() {
        commands.push("swift build".to_string());
    }
    if root.join("go.mod").exists() {
        commands.push("go build ./...".to_string());
    }
    if root.join("Cargo.toml").exists() {
        commands.push("cargo build".to_string());
    }

    if commands.is_empty() {
        commands.push(NO_COMMANDS_DETECTED.to_string());
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_gets_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_commands(dir.path()), vec![NO_COMMANDS_DETECTED]);
    }

    #[test]
    fn rust_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        assert_eq!(detect_commands(dir.path()), vec!["cargo build"]);
    }

    #[test]
    fn python_with_and_without_tests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "").unwrap();
        assert_eq!(detect_commands(dir.path()), vec!["python -m compileall -q ."]);

        std::fs::create_dir(dir.path().join("tests")).unwrap();
        assert_eq!(detect_commands(dir.path()), vec!["python -m pytest --tb=short -q"]);
    }

    #[test]
    fn node_scripts_and_mixed_markers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"test": "jest", "build": "tsc"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("go.mod"), "module x\n").unwrap();
        assert_eq!(
            detect_commands(dir.path()),
            vec!["npm test", "npm run build", "go build ./..."]
        );
    }

    #[test]
    fn broken_package_json_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{ nope").unwrap();
        std::fs::write(dir.path().join("Package.swift"), "").unwrap();
        assert_eq!(detect_commands(dir.path()), vec!["swift build"]);
    }
}
