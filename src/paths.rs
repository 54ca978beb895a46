use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directory name under the platform config/data roots
const APP_DIR: &str = "framecache";

/// Files that make the current directory count as a local config dir
const LOCAL_MARKERS: [&str; 2] = ["framecache.json", "framecache.log"];

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI args → ENV var (FRAMECACHE_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var("FRAMECACHE_CONFIG_DIR").ok().map(PathBuf::from));

        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. FRAMECACHE_CONFIG_DIR environment variable
/// 3. Local folder IF framecache.json or framecache.log exists there
/// 4. Platform-specific config directory from dirs-next (default)
///
/// Platform paths:
/// - Linux: ~/.config/framecache/{name}
/// - macOS: ~/Library/Application Support/framecache/{name}
/// - Windows: %APPDATA%\framecache\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Get path to a data file (logs, stats dumps)
///
/// Same priority as `config_file`, falling back to the platform data
/// directory (~/.local/share/framecache on Linux).
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    get_data_dir(config).join(name)
}

/// Ensure that configuration and data directories exist
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = get_config_dir(config);
    let data_dir = get_data_dir(config);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }

    // Only create data_dir if it's different from config_dir
    if data_dir != config_dir && !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }

    Ok(())
}

fn has_local_config_files(dir: &Path) -> bool {
    LOCAL_MARKERS.iter().any(|f| dir.join(f).exists())
}

fn resolve_dir(config: &PathConfig, local_dir: Option<PathBuf>, platform_root: Option<PathBuf>) -> PathBuf {
    // Priority 1: Custom directory from CLI or ENV
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    // Priority 2: Local folder IF config files exist there
    if let Some(dir) = local_dir
        && has_local_config_files(&dir)
    {
        return dir;
    }

    // Priority 3: Platform-specific directory
    if let Some(root) = platform_root {
        return root.join(APP_DIR);
    }

    PathBuf::from(".")
}

fn get_config_dir(config: &PathConfig) -> PathBuf {
    resolve_dir(config, std::env::current_dir().ok(), dirs_next::config_dir())
}

fn get_data_dir(config: &PathConfig) -> PathBuf {
    resolve_dir(config, std::env::current_dir().ok(), dirs_next::data_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };

        assert_eq!(config_file("framecache.json", &config), PathBuf::from("/custom/framecache.json"));
        assert_eq!(data_file("framecache.log", &config), PathBuf::from("/custom/framecache.log"));
    }

    #[test]
    fn test_platform_root_used_without_overrides() {
        let config = PathConfig::default();
        let dir = resolve_dir(&config, None, Some(PathBuf::from("/home/u/.config")));
        assert_eq!(dir, PathBuf::from("/home/u/.config/framecache"));

        assert_eq!(resolve_dir(&config, None, None), PathBuf::from("."));
    }

    #[test]
    fn test_local_files_priority() {
        use std::fs;

        let temp_dir = std::env::temp_dir().join(format!("framecache-paths-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&temp_dir).unwrap();
        let config = PathConfig::default();
        let platform = Some(PathBuf::from("/platform"));

        // No local files: platform default
        let dir = resolve_dir(&config, Some(temp_dir.clone()), platform.clone());
        assert_eq!(dir, PathBuf::from("/platform/framecache"));

        // Local config file present: current directory wins
        fs::write(temp_dir.join("framecache.json"), "{}").unwrap();
        let dir = resolve_dir(&config, Some(temp_dir.clone()), platform);
        assert_eq!(dir, temp_dir);

        let _ = fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn test_ensure_dirs_creates_custom_dir() {
        let temp_dir = std::env::temp_dir().join(format!("framecache-dirs-{}", uuid::Uuid::new_v4()));
        let config = PathConfig {
            config_dir: Some(temp_dir.clone()),
        };

        ensure_dirs(&config).unwrap();
        assert!(temp_dir.is_dir());

        let _ = std::fs::remove_dir_all(&temp_dir);
    }
}
