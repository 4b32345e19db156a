//! Runtime configuration.
//!
//! Loaded from `<app-data>/config.toml` when present. Every field has a
//! default, so an empty or missing file yields a working configuration.
//!
//! ```toml
//! [pty]
//! shell = "/bin/zsh"
//!
//! [claude]
//! known_tools = ["Read", "Write", "Edit", "Bash", "Skill"]
//!
//! [hooks]
//! enabled = true
//! ```
//!
//! Environment overrides (applied after the file):
//! - `DECK_APP_DATA` - application data directory
//! - `DECK_HOOKS` - `1`/`true` enables the hook listener
//! - `DECK_SHELL` - shell used for new sessions

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use deck_core::{ToolCatalog, DEFAULT_KNOWN_TOOLS};

use crate::claude::Timings;

/// Directory name under the home directory.
pub const APP_DATA_DIR_NAME: &str = ".deck";

/// Config file name inside the app data directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_APP_DATA: &str = "DECK_APP_DATA";
pub const ENV_HOOKS: &str = "DECK_HOOKS";
pub const ENV_SHELL: &str = "DECK_SHELL";

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("failed to parse config {path}: {error}")]
    Parse { path: PathBuf, error: String },
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    /// Shell path; platform default when unset.
    pub shell: Option<String>,
    /// Arguments passed to the shell; a login shell by default on Unix.
    pub shell_args: Option<Vec<String>>,
    pub cols: u16,
    pub rows: u16,
    pub read_chunk_size: usize,
    /// Bounded reader channel, in chunks.
    pub reader_channel_capacity: usize,
    pub batch_interval_ms: u64,
    /// The session stops pulling reads once a pending frame reaches this size.
    pub max_frame_bytes: usize,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            shell: None,
            shell_args: None,
            cols: 120,
            rows: 30,
            read_chunk_size: 8 * 1024,
            reader_channel_capacity: 64,
            batch_interval_ms: 16,
            max_frame_bytes: 256 * 1024,
        }
    }
}

impl PtyConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

/// State machine timings in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    pub post_enter_debounce_ms: u64,
    pub post_tool_debounce_ms: u64,
    pub thinking_debounce_ms: u64,
    pub default_debounce_ms: u64,
    pub recheck_ms: u64,
    pub fast_path_ms: u64,
    pub silence_ms: u64,
    pub loading_timeout_ms: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            post_enter_debounce_ms: 5_000,
            post_tool_debounce_ms: 4_000,
            thinking_debounce_ms: 1_500,
            default_debounce_ms: 2_500,
            recheck_ms: 1_000,
            fast_path_ms: 500,
            silence_ms: 1_000,
            loading_timeout_ms: 30_000,
        }
    }
}

impl TimingsConfig {
    pub fn to_timings(&self) -> Timings {
        Timings {
            post_enter_debounce: Duration::from_millis(self.post_enter_debounce_ms),
            post_tool_debounce: Duration::from_millis(self.post_tool_debounce_ms),
            thinking_debounce: Duration::from_millis(self.thinking_debounce_ms),
            default_debounce: Duration::from_millis(self.default_debounce_ms),
            recheck: Duration::from_millis(self.recheck_ms),
            fast_path: Duration::from_millis(self.fast_path_ms),
            silence: Duration::from_millis(self.silence_ms),
            loading_timeout: Duration::from_millis(self.loading_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    /// CLI executable typed into the shell.
    pub command: String,
    /// Delay between spawn and the launch command.
    pub launch_delay_ms: u64,
    /// Extract OSC titles from the PTY stream (in addition to `report_title`).
    pub extract_titles: bool,
    /// Tool names that mark a working title as `tool_calling`.
    pub known_tools: Vec<String>,
    pub timings: TimingsConfig,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            launch_delay_ms: 500,
            extract_titles: true,
            known_tools: DEFAULT_KNOWN_TOOLS.iter().map(|s| s.to_string()).collect(),
            timings: TimingsConfig::default(),
        }
    }
}

impl ClaudeConfig {
    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.launch_delay_ms)
    }

    pub fn tool_catalog(&self) -> ToolCatalog {
        ToolCatalog::new(self.known_tools.iter().cloned())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Wait after SIGTERM before SIGKILL.
    pub kill_grace_ms: u64,
    /// Wait after SIGKILL before reporting the child as stuck.
    pub reap_wait_ms: u64,
    /// How long output is drained after the child exits.
    pub exit_drain_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            kill_grace_ms: 3_000,
            reap_wait_ms: 1_000,
            exit_drain_ms: 200,
        }
    }
}

impl ShutdownConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn reap_wait(&self) -> Duration {
        Duration::from_millis(self.reap_wait_ms)
    }

    pub fn exit_drain(&self) -> Duration {
        Duration::from_millis(self.exit_drain_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Publish queue capacity; publishers wait when it is full.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub user_activity_ms: u64,
    pub output_activity_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            user_activity_ms: 1_000,
            output_activity_ms: 5_000,
            sweep_interval_ms: 30_000,
        }
    }
}

// ============================================================================
// Core Config
// ============================================================================

/// Top-level configuration for [`crate::Core`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Overrides `<home>/.deck`.
    pub app_data_dir: Option<PathBuf>,
    pub pty: PtyConfig,
    pub claude: ClaudeConfig,
    pub hooks: HooksConfig,
    pub shutdown: ShutdownConfig,
    pub bus: BusConfig,
    pub throttle: ThrottleConfig,
}

impl CoreConfig {
    /// Loads configuration from `path`, or from `<app-data>/config.toml`.
    ///
    /// A missing file is not an error. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let base = lookup(ENV_APP_DATA)
                    .map(PathBuf::from)
                    .unwrap_or_else(default_app_data_dir);
                base.join(CONFIG_FILE_NAME)
            }
        };

        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
                path: path.clone(),
                error: e.to_string(),
            })?;
            Self::from_toml_str(&text).map_err(|error| ConfigError::Parse {
                path: path.clone(),
                error,
            })?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Parses TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Applies `DECK_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_APP_DATA).filter(|v| !v.trim().is_empty()) {
            self.app_data_dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = lookup(ENV_HOOKS) {
            self.hooks.enabled = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(shell) = lookup(ENV_SHELL).filter(|v| !v.trim().is_empty()) {
            self.pty.shell = Some(shell);
        }
    }

    /// Resolved application data directory.
    pub fn app_data_dir(&self) -> PathBuf {
        self.app_data_dir
            .clone()
            .unwrap_or_else(default_app_data_dir)
    }

    /// `<app-data>/hooks/port`.
    pub fn port_file_path(&self) -> PathBuf {
        crate::hooks::port_file_path(&self.app_data_dir())
    }
}

/// `<home>/.deck`, or `./.deck` when no home directory is known.
pub fn default_app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DATA_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!((config.pty.cols, config.pty.rows), (120, 30));
        assert_eq!(config.pty.batch_interval(), Duration::from_millis(16));
        assert_eq!(config.claude.launch_delay(), Duration::from_millis(500));
        assert!(!config.hooks.enabled);
        assert_eq!(config.shutdown.kill_grace(), Duration::from_secs(3));
        assert!(config.claude.tool_catalog().contains("TodoWrite"));

        let timings = config.claude.timings.to_timings();
        assert_eq!(timings.post_tool_debounce, Duration::from_secs(4));
        assert_eq!(timings.loading_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml() {
        let config = CoreConfig::from_toml_str(
            r#"
            app_data_dir = "/tmp/deck-test"

            [pty]
            shell = "/bin/sh"
            cols = 80

            [claude]
            known_tools = ["Read", "Skill"]

            [claude.timings]
            thinking_debounce_ms = 900

            [hooks]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.pty.shell.as_deref(), Some("/bin/sh"));
        assert_eq!(config.pty.cols, 80);
        assert_eq!(config.pty.rows, 30);
        assert!(config.claude.tool_catalog().contains("Skill"));
        assert!(!config.claude.tool_catalog().contains("Bash"));
        assert_eq!(config.claude.timings.thinking_debounce_ms, 900);
        assert_eq!(config.claude.timings.recheck_ms, 1_000);
        assert!(config.hooks.enabled);
        assert_eq!(
            config.port_file_path(),
            PathBuf::from("/tmp/deck-test/hooks/port")
        );
    }

    #[test]
    fn test_invalid_toml() {
        assert!(CoreConfig::from_toml_str("[pty]\ncols = \"wide\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_APP_DATA, "/srv/deck"),
            (ENV_HOOKS, "true"),
            (ENV_SHELL, "/bin/bash"),
        ]
        .into_iter()
        .collect();

        let mut config = CoreConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.app_data_dir(), PathBuf::from("/srv/deck"));
        assert!(config.hooks.enabled);
        assert_eq!(config.pty.shell.as_deref(), Some("/bin/bash"));

        config.apply_overrides(|k| (k == ENV_HOOKS).then(|| "0".to_string()));
        assert!(!config.hooks.enabled);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.pty.cols, 120);
        assert_eq!(config.bus, BusConfig::default());
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[bus]\ncapacity = -1").unwrap();
        assert!(matches!(
            CoreConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }
}
