//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = load_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(get_default_root_folder())
}

/// Create the root folder if missing and return the database path inside it
pub fn ensure_root_folder(root: &PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    Ok(root.join("gatewise.db"))
}

/// Get default configuration file path for the platform
fn load_config_file() -> Result<PathBuf> {
    let config_dir = if cfg!(target_os = "linux") {
        // Try ~/.config/gatewise/config.toml first, then /etc/gatewise/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("gatewise").join("config.toml"));
        let system_config = PathBuf::from("/etc/gatewise/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    } else {
        dirs::config_dir()
            .map(|d| d.join("gatewise").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?
    };

    if config_dir.exists() {
        Ok(config_dir)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {:?}",
            config_dir
        )))
    }
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("gatewise"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/gatewise"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("gatewise"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/gatewise"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("gatewise"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\gatewise"))
    } else {
        PathBuf::from("./gatewise_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_arg_takes_priority() {
        let resolved = resolve_root_folder(Some("/tmp/gw-test"), "GATEWISE_TEST_UNSET").unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/gw-test"));
    }

    #[test]
    fn test_default_is_nonempty() {
        let resolved = resolve_root_folder(None, "GATEWISE_TEST_UNSET_2").unwrap();
        assert!(!resolved.as_os_str().is_empty());
    }
}
