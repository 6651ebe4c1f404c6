//! `hearth init`: first-time setup.

use std::path::Path;

use hearth_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_path();
    if write_default_config(&config_path)? {
        println!("Created {}", config_path.display());
        println!("Edit [model] to point at your model server, then run `hearth`.");
    } else {
        println!("Config already exists at {}", config_path.display());
        println!("Edit it manually or delete it and re-run `hearth init`.");
    }
    Ok(())
}

/// Write the default config unless `path` exists. Returns whether it wrote.
pub fn write_default_config(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_once_and_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".hearth").join("config.toml");

        assert!(write_default_config(&path).unwrap());
        assert!(!write_default_config(&path).unwrap());

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_tool_calls, 3);
    }
}
