//! Config resolution: CLI → env → XDG → defaults.

use crate::config::CompilerConfig;
use crate::validate::{validate_config, ValidationError, ValidationResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "FOLIO_CONFIG";

/// Config file name under the XDG config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "path")]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    Xdg(PathBuf),
    Defaults,
}

/// Candidate locations consulted during resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// `--config` argument.
    pub cli: Option<PathBuf>,
    /// Value of [`CONFIG_ENV_VAR`].
    pub env: Option<PathBuf>,
    /// `$XDG_CONFIG_HOME/folio` or the platform equivalent.
    pub xdg_dir: Option<PathBuf>,
}

impl ConfigPaths {
    /// Candidates from the process environment.
    pub fn from_env(cli: Option<PathBuf>) -> Self {
        Self {
            cli,
            env: std::env::var_os(CONFIG_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            xdg_dir: dirs::config_dir().map(|d| d.join("folio")),
        }
    }
}

/// Effective configuration and its origin.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: CompilerConfig,
    pub source: ConfigSource,
}

/// Read and parse a config file.
pub fn load_config_file(path: &Path) -> ValidationResult<CompilerConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ValidationError::IoError(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        ValidationError::ParseError(format!("invalid config {}: {}", path.display(), e))
    })
}

/// Resolve the effective configuration.
///
/// An explicit CLI or env path must exist; a missing XDG file falls through
/// to defaults. The result is always validated.
pub fn resolve_config(paths: &ConfigPaths) -> ValidationResult<ResolvedConfig> {
    let (config, source) = if let Some(path) = &paths.cli {
        (load_config_file(path)?, ConfigSource::Cli(path.clone()))
    } else if let Some(path) = &paths.env {
        (load_config_file(path)?, ConfigSource::Env(path.clone()))
    } else {
        match paths
            .xdg_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
            .filter(|p| p.exists())
        {
            Some(path) => (load_config_file(&path)?, ConfigSource::Xdg(path)),
            None => {
                debug!("no config file found, using defaults");
                (CompilerConfig::default(), ConfigSource::Defaults)
            }
        }
    };

    validate_config(&config)?;
    info!(source = ?source, data_dir = %config.data_dir.display(), "configuration resolved");
    Ok(ResolvedConfig { config, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_cli_beats_env_and_xdg() {
        let dir = TempDir::new().unwrap();
        let cli = write(dir.path(), "cli.json", r#"{"main_table": "from_cli"}"#);
        let env = write(dir.path(), "env.json", r#"{"main_table": "from_env"}"#);
        write(dir.path(), CONFIG_FILE_NAME, r#"{"main_table": "from_xdg"}"#);

        let resolved = resolve_config(&ConfigPaths {
            cli: Some(cli.clone()),
            env: Some(env),
            xdg_dir: Some(dir.path().to_path_buf()),
        })
        .unwrap();
        assert_eq!(resolved.config.main_table, "from_cli");
        assert_eq!(resolved.source, ConfigSource::Cli(cli));
    }

    #[test]
    fn test_env_beats_xdg() {
        let dir = TempDir::new().unwrap();
        let env = write(dir.path(), "env.json", r#"{"main_table": "from_env"}"#);
        write(dir.path(), CONFIG_FILE_NAME, r#"{"main_table": "from_xdg"}"#);

        let resolved = resolve_config(&ConfigPaths {
            cli: None,
            env: Some(env),
            xdg_dir: Some(dir.path().to_path_buf()),
        })
        .unwrap();
        assert_eq!(resolved.config.main_table, "from_env");
    }

    #[test]
    fn test_xdg_then_defaults() {
        let dir = TempDir::new().unwrap();
        let paths = ConfigPaths {
            cli: None,
            env: None,
            xdg_dir: Some(dir.path().to_path_buf()),
        };
        assert_eq!(resolve_config(&paths).unwrap().source, ConfigSource::Defaults);

        write(dir.path(), CONFIG_FILE_NAME, r#"{"sample_limit": 100}"#);
        let resolved = resolve_config(&paths).unwrap();
        assert_eq!(resolved.config.sample_limit, 100);
        assert!(matches!(resolved.source, ConfigSource::Xdg(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = resolve_config(&ConfigPaths {
            cli: Some(PathBuf::from("/nonexistent/folio.json")),
            ..ConfigPaths::default()
        })
        .unwrap_err();
        assert_eq!(err.code(), 10);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        let cli = write(dir.path(), "cli.json", r#"{"parallel_builds": 0}"#);
        let err = resolve_config(&ConfigPaths {
            cli: Some(cli),
            ..ConfigPaths::default()
        })
        .unwrap_err();
        assert!(matches!(err, ValidationError::SemanticError { .. }));
    }
}
