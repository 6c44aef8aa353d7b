//! Configuration for the CIX driver.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Base directory; the database lives in `<db_base_dir>/db`
    #[serde(default = "default_db_base_dir")]
    pub db_base_dir: PathBuf,

    /// Worker threads draining the request queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-logger directives, e.g. `cix_indexer=debug`
    #[serde(default)]
    pub log_filter: Vec<String>,

    /// Log file; stderr when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Protocol transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Largest scan content accepted (default: 16MB)
    #[serde(default = "default_max_scan_bytes")]
    pub max_scan_bytes: usize,

    /// Address space reserved at startup (default: 64MB)
    #[serde(default = "default_memory_reserve_bytes")]
    pub memory_reserve_bytes: usize,

    /// Parsed trees cached per language per zone
    #[serde(default = "default_langlib_capacity")]
    pub langlib_capacity: usize,

    /// Lower CPU and I/O priority at startup
    #[serde(default = "default_lower_priority")]
    pub lower_priority: bool,
}

/// Where protocol frames are exchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Frames on stdin/stdout
    #[default]
    Stdio,
    /// TCP at `address` (`host:port`): dial out, or accept a single
    /// connection when `listen` is set
    Tcp {
        address: String,
        #[serde(default)]
        listen: bool,
    },
}

fn default_db_base_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cix")
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, 4)
}

fn default_max_scan_bytes() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_memory_reserve_bytes() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_langlib_capacity() -> usize {
    256
}

fn default_lower_priority() -> bool {
    true
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            db_base_dir: default_db_base_dir(),
            workers: default_workers(),
            log_filter: Vec::new(),
            log_file: None,
            transport: TransportConfig::default(),
            max_scan_bytes: default_max_scan_bytes(),
            memory_reserve_bytes: default_memory_reserve_bytes(),
            langlib_capacity: default_langlib_capacity(),
            lower_priority: default_lower_priority(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|e| CoreError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// The database root
    pub fn db_root(&self) -> PathBuf {
        self.db_base_dir.join("db")
    }

    /// Combined `EnvFilter` directive string, `info` when none are set.
    pub fn filter_directives(&self) -> String {
        if self.log_filter.is_empty() {
            "info".to_string()
        } else {
            self.log_filter.join(",")
        }
    }

    /// Reject settings the driver cannot start with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.workers == 0 {
            return Err(CoreError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.max_scan_bytes == 0 {
            return Err(CoreError::InvalidConfig(
                "max_scan_bytes must be positive".into(),
            ));
        }
        if let TransportConfig::Tcp { address, .. } = &self.transport {
            validate_address(address)?;
        }
        Ok(())
    }
}

/// Check that `address` has the shape `host:port`.
///
/// Host names are not resolved.
pub fn validate_address(address: &str) -> Result<(), CoreError> {
    if address.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }
    let invalid = || CoreError::InvalidConfig(format!("malformed address: {}", address));
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.transport, TransportConfig::Stdio);
        assert_eq!(config.max_scan_bytes, 16 * 1024 * 1024);
        assert!((1..=4).contains(&config.workers));
        assert_eq!(config.filter_directives(), "info");
        assert!(config.db_root().ends_with("cix/db"));
        config.validate().unwrap();
    }

    #[test]
    fn test_config_serialization() {
        let config = DriverConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DriverConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.db_base_dir, parsed.db_base_dir);
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cix.yaml");
        std::fs::write(
            &path,
            "workers: 2\nlog_filter: [cix_indexer=debug, warn]\ntransport:\n  kind: tcp\n  address: localhost:9999\n",
        )
        .unwrap();

        let config = DriverConfig::load_from(&path).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.filter_directives(), "cix_indexer=debug,warn");
        assert_eq!(
            config.transport,
            TransportConfig::Tcp {
                address: "localhost:9999".into(),
                listen: false,
            }
        );
        assert_eq!(config.langlib_capacity, 256);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_config() {
        let config = DriverConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));

        let config = DriverConfig {
            transport: TransportConfig::Tcp {
                address: "nowhere".into(),
                listen: true,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreadable_config() {
        let dir = tempdir().unwrap();
        let missing = DriverConfig::load_from(&dir.path().join("absent.yaml"));
        assert!(matches!(missing, Err(CoreError::ConfigRead { .. })));

        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "workers: [not, a, number]\n").unwrap();
        let bad = DriverConfig::load_from(&path);
        assert!(matches!(bad, Err(CoreError::ConfigParse { .. })));
    }
}
