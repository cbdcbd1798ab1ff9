use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::MetricKind;
use crate::error::{AgentError, Result};

const DEFAULT_CONFIG_PATH: &str = "/etc/antimetal/agent.toml";
const ENV_CONFIG_PATH: &str = "ANTIMETAL_CONFIG";

const ENV_HOST_PROC: &str = "HOST_PROC";
const ENV_HOST_SYS: &str = "HOST_SYS";
const ENV_HOST_DEV: &str = "HOST_DEV";

pub const DEFAULT_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_SYS_ROOT: &str = "/sys";
pub const DEFAULT_DEV_ROOT: &str = "/dev";

/// Top-level daemon configuration.
///
/// Loaded from a TOML file; the path can be overridden with the
/// `ANTIMETAL_CONFIG` environment variable. A missing or unparseable file
/// yields defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub bpf: BpfConfig,
}

impl Config {
    pub fn load() -> Self {
        let path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

/// Settings shared by every collector: how often continuous collectors poll,
/// which kinds run, and where the host pseudo-filesystems are mounted.
///
/// All fields default to their zero values; `apply_defaults` must run before
/// the config is used. The path roots allow running inside a container with
/// the host's /proc, /sys, and /dev bind-mounted elsewhere.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct CollectionConfig {
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub enabled: HashMap<MetricKind, bool>,
    #[serde(default)]
    pub host_proc: PathBuf,
    #[serde(default)]
    pub host_sys: PathBuf,
    #[serde(default)]
    pub host_dev: PathBuf,
}

impl CollectionConfig {
    /// Fill every zero-valued field with its default. Idempotent: applying
    /// twice equals applying once.
    pub fn apply_defaults(&mut self) {
        if self.interval_ms == 0 {
            self.interval_ms = DEFAULT_INTERVAL_MS;
        }
        if self.host_proc.as_os_str().is_empty() {
            self.host_proc = PathBuf::from(DEFAULT_PROC_ROOT);
        }
        if self.host_sys.as_os_str().is_empty() {
            self.host_sys = PathBuf::from(DEFAULT_SYS_ROOT);
        }
        if self.host_dev.as_os_str().is_empty() {
            self.host_dev = PathBuf::from(DEFAULT_DEV_ROOT);
        }
        for kind in MetricKind::ALL {
            self.enabled.entry(kind).or_insert(true);
        }
    }

    /// Apply `HOST_PROC`, `HOST_SYS`, and `HOST_DEV` overrides. Containerized
    /// deployments set these instead of editing the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_HOST_PROC) {
            self.host_proc = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var(ENV_HOST_SYS) {
            self.host_sys = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var(ENV_HOST_DEV) {
            self.host_dev = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (label, path) in [
            ("host_proc", &self.host_proc),
            ("host_sys", &self.host_sys),
            ("host_dev", &self.host_dev),
        ] {
            if !path.is_absolute() {
                return Err(AgentError::config(format!(
                    "{label} must be an absolute path, got {:?}",
                    path
                )));
            }
        }
        if self.interval_ms == 0 {
            return Err(AgentError::config("interval_ms must be non-zero"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Kinds absent from the map count as enabled.
    pub fn is_enabled(&self, kind: MetricKind) -> bool {
        self.enabled.get(&kind).copied().unwrap_or(true)
    }

    pub fn proc_path(&self, rel: &str) -> PathBuf {
        self.host_proc.join(rel)
    }

    pub fn sys_path(&self, rel: &str) -> PathBuf {
        self.host_sys.join(rel)
    }

    pub fn dev_path(&self, rel: &str) -> PathBuf {
        self.host_dev.join(rel)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_cpu_target_pct")]
    pub cpu_target_pct: u64,
    #[serde(default = "default_rss_cap_mb")]
    pub rss_cap_mb: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cpu_target_pct: default_cpu_target_pct(),
            rss_cap_mb: default_rss_cap_mb(),
        }
    }
}

fn default_cpu_target_pct() -> u64 {
    25
}
fn default_rss_cap_mb() -> u64 {
    256
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BpfConfig {
    /// Explicit path to the compiled exec-trace object. When unset, the
    /// `ANTIMETAL_BPF_PATH` environment variable and then the install
    /// location are consulted.
    #[serde(default)]
    pub object_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn apply_defaults_fills_zero_values() {
        let mut cfg = CollectionConfig::default();
        cfg.apply_defaults();
        assert_eq!(cfg.interval_ms, 1_000);
        assert_eq!(cfg.host_proc, PathBuf::from("/proc"));
        assert_eq!(cfg.host_sys, PathBuf::from("/sys"));
        assert_eq!(cfg.host_dev, PathBuf::from("/dev"));
        for kind in MetricKind::ALL {
            assert!(cfg.is_enabled(kind));
        }
    }

    #[test]
    fn apply_defaults_is_a_fixed_point() {
        let mut once = CollectionConfig::default();
        once.apply_defaults();
        let mut twice = once.clone();
        twice.apply_defaults();
        assert_eq!(once, twice);
    }

    #[test]
    fn apply_defaults_keeps_explicit_values() {
        let mut cfg = CollectionConfig {
            interval_ms: 5_000,
            host_proc: PathBuf::from("/host/proc"),
            ..Default::default()
        };
        cfg.enabled.insert(MetricKind::Tcp, false);
        cfg.apply_defaults();
        assert_eq!(cfg.interval_ms, 5_000);
        assert_eq!(cfg.host_proc, PathBuf::from("/host/proc"));
        assert!(!cfg.is_enabled(MetricKind::Tcp));
        assert!(cfg.is_enabled(MetricKind::Load));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut cfg = CollectionConfig::default();
        cfg.apply_defaults();
        cfg.host_sys = PathBuf::from("sys");
        assert!(matches!(cfg.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn config_file_parses_collection_section() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[collection]\ninterval_ms = 250\nhost_proc = \"/host/proc\"\n\n\
             [collection.enabled]\ntcp = false\n\n[runtime]\ncpu_target_pct = 10"
        )
        .unwrap();
        let cfg = Config::load_from(file.path());
        assert_eq!(cfg.collection.interval_ms, 250);
        assert_eq!(cfg.collection.host_proc, PathBuf::from("/host/proc"));
        assert!(!cfg.collection.is_enabled(MetricKind::Tcp));
        assert_eq!(cfg.runtime.cpu_target_pct, 10);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let cfg = Config::load_from(Path::new("/nonexistent/agent.toml"));
        assert_eq!(cfg.collection.interval_ms, 0);
        assert_eq!(cfg.runtime.cpu_target_pct, 25);
    }
}
