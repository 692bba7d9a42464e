//! Configuration resolution for the CLI.
//!
//! The config file is found with this precedence:
//! 1. `STRATA_CONFIG` (path to a TOML file)
//! 2. `STRATA_DIR/config.toml`
//! 3. `~/.strata/config.toml`
//!
//! A missing file means defaults. `STRATA_DATABASE_PATH` overrides the
//! database path from any source; a relative path from the file is taken
//! relative to the data directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use strata_sdk::StrataConfig;

/// Where the config file and default database live.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
}

/// Environment inputs, captured once so resolution stays testable.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub config: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub home: Option<PathBuf>,
}

impl Env {
    pub fn capture() -> Self {
        Self {
            config: std::env::var_os("STRATA_CONFIG").map(PathBuf::from),
            dir: std::env::var_os("STRATA_DIR").map(PathBuf::from),
            database_path: std::env::var_os("STRATA_DATABASE_PATH").map(PathBuf::from),
            home: dirs::home_dir(),
        }
    }

    pub fn paths(&self) -> Paths {
        let data_dir = self
            .dir
            .clone()
            .unwrap_or_else(|| self.home.clone().unwrap_or_else(|| PathBuf::from(".")).join(".strata"));
        let config_file = self.config.clone().unwrap_or_else(|| data_dir.join("config.toml"));
        Paths { config_file, data_dir }
    }
}

/// Load the effective configuration.
pub fn load() -> Result<(StrataConfig, Paths)> {
    resolve(&Env::capture())
}

pub fn resolve(env: &Env) -> Result<(StrataConfig, Paths)> {
    let paths = env.paths();

    let mut config = if paths.config_file.exists() {
        let text = std::fs::read_to_string(&paths.config_file)
            .with_context(|| format!("Failed to read config file {}", paths.config_file.display()))?;
        StrataConfig::from_toml_str(&text)
            .with_context(|| format!("Failed to parse config file {}", paths.config_file.display()))?
    } else {
        tracing::debug!(path = %paths.config_file.display(), "No config file, using defaults");
        StrataConfig::new(paths.data_dir.join("strata.db"))
    };

    if let Some(path) = &env.database_path {
        config.database_path = path.clone();
    } else if config.database_path.is_relative() {
        config.database_path = paths.data_dir.join(&config.database_path);
    }

    config.validate().context("Invalid configuration")?;
    Ok((config, paths))
}

/// Create the directory holding the database.
pub fn ensure_database_dir(database_path: &Path) -> Result<()> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn env_in(home: &Path) -> Env {
        Env {
            home: Some(home.to_path_buf()),
            ..Env::default()
        }
    }

    #[test]
    fn test_defaults_under_home() {
        let home = tempdir().unwrap();
        let (config, paths) = resolve(&env_in(home.path())).unwrap();

        assert_eq!(paths.data_dir, home.path().join(".strata"));
        assert_eq!(paths.config_file, home.path().join(".strata/config.toml"));
        assert_eq!(config.database_path, home.path().join(".strata/strata.db"));
        assert_eq!(config.fast.ttl_secs, 3600);
    }

    #[test]
    fn test_strata_dir_file_is_read() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "database_path = \"mem.db\"\n[fast]\nmax_items = 25\n",
        )
        .unwrap();

        let env = Env {
            dir: Some(dir.path().to_path_buf()),
            ..Env::default()
        };
        let (config, _) = resolve(&env).unwrap();
        assert_eq!(config.fast.max_items, 25);
        assert_eq!(config.database_path, dir.path().join("mem.db"));
        assert_eq!(config.warm.ttl_secs, 86_400);
    }

    #[test]
    fn test_explicit_config_and_database_override() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        std::fs::write(&file, "[durable]\nmax_versions = 3\n").unwrap();

        let env = Env {
            config: Some(file.clone()),
            database_path: Some(dir.path().join("override.db")),
            ..env_in(dir.path())
        };
        let (config, paths) = resolve(&env).unwrap();
        assert_eq!(paths.config_file, file);
        assert_eq!(config.durable.max_versions, 3);
        assert_eq!(config.database_path, dir.path().join("override.db"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[assembler]\ndedup_threshold = 4.0\n").unwrap();
        let env = Env {
            dir: Some(dir.path().to_path_buf()),
            ..Env::default()
        };
        assert!(resolve(&env).is_err());
    }

    #[test]
    fn test_ensure_database_dir_creates_parent() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("nested/data/strata.db");
        ensure_database_dir(&db).unwrap();
        assert!(db.parent().unwrap().exists());
    }
}
