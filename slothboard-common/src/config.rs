//! Configuration loading
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration for the realtime daemon
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Sqlite database file path
    pub db_path: PathBuf,
    /// Pending commands buffered per channel writer before callers wait
    pub channel_capacity: usize,
    /// Outbound queue depth per subscriber; a subscriber that falls this
    /// far behind is disconnected rather than stalling the writer
    pub subscriber_queue: usize,
    /// Hours before an idle collecting session is reaped (0 disables)
    pub idle_session_max_age_hours: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5730".to_string(),
            db_path: PathBuf::from("slothboard.db"),
            channel_capacity: 256,
            subscriber_queue: 64,
            idle_session_max_age_hours: 24,
        }
    }
}

/// Subset of settings accepted from the TOML config file
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    bind_addr: Option<String>,
    db_path: Option<PathBuf>,
    channel_capacity: Option<usize>,
    subscriber_queue: Option<usize>,
    idle_session_max_age_hours: Option<u64>,
}

impl Config {
    /// Resolve configuration from CLI overrides and an optional file
    pub fn resolve(
        cli_bind_addr: Option<String>,
        cli_db_path: Option<PathBuf>,
        config_file: Option<&Path>,
    ) -> Result<Self> {
        let mut config = Config::default();

        // Priority 3: TOML config file
        if let Some(path) = config_file {
            let file = load_config_file(path)?;
            if let Some(addr) = file.bind_addr {
                config.bind_addr = addr;
            }
            if let Some(db) = file.db_path {
                config.db_path = db;
            }
            if let Some(cap) = file.channel_capacity {
                config.channel_capacity = cap;
            }
            if let Some(queue) = file.subscriber_queue {
                config.subscriber_queue = queue;
            }
            if let Some(hours) = file.idle_session_max_age_hours {
                config.idle_session_max_age_hours = hours;
            }
        }

        // Priority 1/2: CLI args (clap already folds env vars in)
        if let Some(addr) = cli_bind_addr {
            config.bind_addr = addr;
        }
        if let Some(db) = cli_db_path {
            config.db_path = db;
        }

        if config.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be nonzero".into()));
        }
        if config.subscriber_queue == 0 {
            return Err(Error::Config("subscriber_queue must be nonzero".into()));
        }

        Ok(config)
    }
}

fn load_config_file(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("invalid config file: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::resolve(None, None, None).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:5730");
        assert_eq!(config.idle_session_max_age_hours, 24);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind_addr = \"0.0.0.0:9000\"\nchannel_capacity = 32"
        )
        .unwrap();

        let config = Config::resolve(
            Some("127.0.0.1:5999".to_string()),
            None,
            Some(file.path()),
        )
        .unwrap();

        // CLI wins over file for bind_addr; file still applies elsewhere
        assert_eq!(config.bind_addr, "127.0.0.1:5999");
        assert_eq!(config.channel_capacity, 32);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "subscriber_queue = 0").unwrap();

        let err = Config::resolve(None, None, Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
