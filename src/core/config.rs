//! Configuration system: TOML file + env var overrides + smart defaults.
//!
//! Timeout budgets and tolerances live here rather than as constants in test
//! bodies. Values tuned against one device's timing jitter are rarely right
//! for another, so every suite can re-derive them per target.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{PchError, Result};

/// Full harness configuration model.
///
/// Relative report and log paths are resolved against `paths.data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub capabilities: CapabilityConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Bounded-wait budgets. Every blocking wait in the harness draws from here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default budget for the condition poller.
    pub poll_timeout_ms: u64,
    /// Sleep between predicate evaluations.
    pub poll_interval_ms: u64,
    /// Default budget for latch waits.
    pub latch_timeout_ms: u64,
    /// Default budget for work marshalled onto an affinity thread.
    pub action_timeout_ms: u64,
}

/// Numeric tolerances used by approximate assertions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Absolute epsilon for floating-point comparisons.
    pub float_epsilon: f64,
    /// Extra slack allowed when asserting on wall-clock timings.
    pub timing_slack_ms: u64,
}

/// Platform capabilities declared present on the device under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CapabilityConfig {
    pub features: Vec<String>,
}

/// Where performance reports are delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: bool,
    pub jsonl_path: PathBuf,
    /// SQLite results store. `None` disables it.
    pub sqlite_path: Option<PathBuf>,
    /// Bounded queue between test threads and the collector thread.
    pub channel_capacity: usize,
}

/// Harness activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub jsonl_path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// Filesystem paths used by the harness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Base directory for relative report and log paths.
    pub data_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let mut cfg = Self::unresolved();
        cfg.resolve_paths();
        cfg
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 3_000,
            poll_interval_ms: 50,
            latch_timeout_ms: 20_000,
            action_timeout_ms: 20_000,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn latch_timeout(&self) -> Duration {
        Duration::from_millis(self.latch_timeout_ms)
    }

    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            float_epsilon: 1e-6,
            timing_slack_ms: 50,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_path: PathBuf::from("reports.jsonl"),
            sqlite_path: Some(PathBuf::from("reports.sqlite3")),
            channel_capacity: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_path: PathBuf::from("harness.jsonl"),
            fallback_path: Some(env::temp_dir().join("pch-harness.jsonl")),
            max_size_bytes: 32 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = home_dir();
        Self {
            config_file: home_dir.join(".config").join("pch").join("config.toml"),
            data_dir: default_data_dir(),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[PCH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn default_data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("pch")
}

impl HarnessConfig {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| PchError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(PchError::MissingConfig { path: path_buf });
        } else {
            Self::unresolved()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.resolve_paths();
        cfg.normalize_features();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut cfg: Self = toml::from_str(raw)?;
        cfg.resolve_paths();
        Ok(cfg)
    }

    /// Defaults with report and log paths still relative.
    fn unresolved() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            tolerance: ToleranceConfig::default(),
            capabilities: CapabilityConfig::default(),
            report: ReportConfig::default(),
            logging: LoggingConfig::default(),
            paths: PathsConfig::default(),
        }
    }

    /// Anchor relative report and log paths at `paths.data_dir`.
    fn resolve_paths(&mut self) {
        let base = &self.paths.data_dir;
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        anchor(&mut self.report.jsonl_path);
        if let Some(path) = self.report.sqlite_path.as_mut() {
            anchor(path);
        }
        anchor(&mut self.logging.jsonl_path);
        if let Some(path) = self.logging.fallback_path.as_mut() {
            anchor(path);
        }
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over the canonical JSON form so the value is stable across
    /// processes and toolchain releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Whether a capability was declared for this device.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.capabilities.features.iter().any(|f| f == feature)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // timeouts
        set_u64(&mut lookup, "PCH_POLL_TIMEOUT_MS", &mut self.timeouts.poll_timeout_ms)?;
        set_u64(&mut lookup, "PCH_POLL_INTERVAL_MS", &mut self.timeouts.poll_interval_ms)?;
        set_u64(&mut lookup, "PCH_LATCH_TIMEOUT_MS", &mut self.timeouts.latch_timeout_ms)?;
        set_u64(&mut lookup, "PCH_ACTION_TIMEOUT_MS", &mut self.timeouts.action_timeout_ms)?;

        // tolerance
        if let Some(raw) = lookup("PCH_FLOAT_EPSILON") {
            self.tolerance.float_epsilon =
                raw.parse::<f64>().map_err(|error| PchError::ConfigParse {
                    context: "env",
                    details: format!("PCH_FLOAT_EPSILON={raw:?}: {error}"),
                })?;
        }
        set_u64(&mut lookup, "PCH_TIMING_SLACK_MS", &mut self.tolerance.timing_slack_ms)?;

        // capabilities: comma-separated list, appended to the file's list.
        if let Some(raw) = lookup("PCH_FEATURES") {
            self.capabilities.features.extend(
                raw.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(ToString::to_string),
            );
        }

        // report
        set_bool(&mut lookup, "PCH_REPORT_ENABLED", &mut self.report.enabled)?;
        if let Some(raw) = lookup("PCH_REPORT_JSONL_PATH") {
            self.report.jsonl_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("PCH_REPORT_SQLITE_PATH") {
            self.report.sqlite_path = match raw.as_str() {
                "none" | "off" => None,
                _ => Some(PathBuf::from(raw)),
            };
        }

        // paths
        if let Some(raw) = lookup("PCH_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(raw);
        }

        // logging
        set_bool(&mut lookup, "PCH_LOG_ENABLED", &mut self.logging.enabled)?;
        if let Some(raw) = lookup("PCH_LOG_JSONL_PATH") {
            self.logging.jsonl_path = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Trim and de-duplicate declared features, keeping first-seen order.
    fn normalize_features(&mut self) {
        let mut seen: Vec<String> = Vec::with_capacity(self.capabilities.features.len());
        for feature in self.capabilities.features.drain(..) {
            let trimmed = feature.trim().to_string();
            if !seen.contains(&trimmed) {
                seen.push(trimmed);
            }
        }
        self.capabilities.features = seen;
    }

    fn validate(&self) -> Result<()> {
        for (name, val) in [
            ("poll_timeout_ms", self.timeouts.poll_timeout_ms),
            ("poll_interval_ms", self.timeouts.poll_interval_ms),
            ("latch_timeout_ms", self.timeouts.latch_timeout_ms),
            ("action_timeout_ms", self.timeouts.action_timeout_ms),
        ] {
            if val == 0 {
                return Err(PchError::InvalidConfig {
                    details: format!("timeouts.{name} must be > 0"),
                });
            }
        }

        if self.timeouts.poll_interval_ms > self.timeouts.poll_timeout_ms {
            return Err(PchError::InvalidConfig {
                details: format!(
                    "timeouts.poll_interval_ms ({}) must be <= timeouts.poll_timeout_ms ({})",
                    self.timeouts.poll_interval_ms, self.timeouts.poll_timeout_ms
                ),
            });
        }

        let eps = self.tolerance.float_epsilon;
        if !eps.is_finite() || eps < 0.0 {
            return Err(PchError::InvalidConfig {
                details: format!("tolerance.float_epsilon must be finite and >= 0, got {eps}"),
            });
        }

        if self.report.channel_capacity == 0 {
            return Err(PchError::InvalidConfig {
                details: "report.channel_capacity must be >= 1".to_string(),
            });
        }

        if self.logging.max_size_bytes == 0 {
            return Err(PchError::InvalidConfig {
                details: "logging.max_size_bytes must be > 0".to_string(),
            });
        }

        if self.capabilities.features.iter().any(|f| f.trim().is_empty()) {
            return Err(PchError::InvalidConfig {
                details: "capabilities.features must not contain empty names".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.parse::<u64>().map_err(|error| PchError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &mut F, name: &str, slot: &mut bool) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.parse::<bool>().map_err(|error| PchError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}
