//! Session engine configuration with file and environment loading.
//!
//! Two tunables are recognised:
//! - `max_sessions`: how many sessions may be active at once (default 512, cap 2048)
//! - `buffer_order`: per-session buffer size as `2^order` pages of 4 KiB
//!   (default 2 = 16 KiB, cap 4 = 64 KiB)
//!
//! Requested values are clamped, never rejected. A non-positive session count
//! or a negative order keeps the default; anything above the cap becomes the cap.
//!
//! Sources, later wins:
//! 1. Compiled defaults
//! 2. `/etc/sessionfs/config.toml`
//! 3. `~/.config/sessionfs/config.toml`
//! 4. `./sessionfs.toml`, or the path passed to [`SessionConfig::load`]
//! 5. `SESSIONFS_MAX_SESSIONS` / `SESSIONFS_BUFFER_ORDER`
//!
//! ```toml
//! [session]
//! max_sessions = 64
//! buffer_order = 3
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Size of one buffer page in bytes.
pub const PAGE_SIZE: usize = 4096;

pub const DEFAULT_MAX_SESSIONS: usize = 512;
pub const MAX_SESSIONS_CAP: usize = 2048;

pub const DEFAULT_BUFFER_ORDER: u32 = 2;
pub const MAX_BUFFER_ORDER: u32 = 4;

pub const ENV_MAX_SESSIONS: &str = "SESSIONFS_MAX_SESSIONS";
pub const ENV_BUFFER_ORDER: &str = "SESSIONFS_BUFFER_ORDER";

/// Immutable configuration injected into a [`crate::SessionEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSessionConfig")]
pub struct SessionConfig {
    max_sessions: usize,
    buffer_order: u32,
}

/// Unvalidated values as they appear in a file; every field is optional so a
/// file only overrides what it mentions.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct RawSessionConfig {
    max_sessions: Option<i64>,
    buffer_order: Option<i64>,
}

impl From<RawSessionConfig> for SessionConfig {
    fn from(raw: RawSessionConfig) -> Self {
        SessionConfig::default().overlay(raw)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            buffer_order: DEFAULT_BUFFER_ORDER,
        }
    }
}

fn clamp_max_sessions(requested: i64, fallback: usize) -> usize {
    if requested <= 0 {
        fallback
    } else {
        usize::try_from(requested)
            .unwrap_or(MAX_SESSIONS_CAP)
            .min(MAX_SESSIONS_CAP)
    }
}

fn clamp_buffer_order(requested: i64, fallback: u32) -> u32 {
    if requested < 0 {
        fallback
    } else {
        u32::try_from(requested)
            .unwrap_or(MAX_BUFFER_ORDER)
            .min(MAX_BUFFER_ORDER)
    }
}

impl SessionConfig {
    /// Build a configuration from raw requested values, clamping both.
    pub fn clamped(requested_max_sessions: i64, requested_buffer_order: i64) -> Self {
        Self {
            max_sessions: clamp_max_sessions(requested_max_sessions, DEFAULT_MAX_SESSIONS),
            buffer_order: clamp_buffer_order(requested_buffer_order, DEFAULT_BUFFER_ORDER),
        }
    }

    /// Ceiling on concurrently active sessions.
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Buffer order: each session buffer holds `2^order` pages.
    pub fn buffer_order(&self) -> u32 {
        self.buffer_order
    }

    /// Capacity of every session buffer in bytes.
    pub fn buffer_capacity(&self) -> usize {
        PAGE_SIZE << self.buffer_order
    }

    /// Apply the fields present in `raw` on top of `self`.
    fn overlay(self, raw: RawSessionConfig) -> Self {
        Self {
            max_sessions: raw
                .max_sessions
                .map(|v| clamp_max_sessions(v, self.max_sessions))
                .unwrap_or(self.max_sessions),
            buffer_order: raw
                .buffer_order
                .map(|v| clamp_buffer_order(v, self.buffer_order))
                .unwrap_or(self.buffer_order),
        }
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load a single TOML file. Only its `[session]` section is read; a file
    /// without one yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::default().overlay(read_raw_file(path)?))
    }

    /// Load from every source in order (see module docs).
    ///
    /// When `config_path` is given it must exist and replaces the local
    /// `./sessionfs.toml` override.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
        }

        let mut config = Self::default();
        for path in discover_config_files(config_path) {
            debug!(path = %path.display(), "loading session config");
            config = config.overlay(read_raw_file(&path)?);
        }

        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(self) -> Self {
        let raw = RawSessionConfig {
            max_sessions: env_integer(ENV_MAX_SESSIONS),
            buffer_order: env_integer(ENV_BUFFER_ORDER),
        };
        self.overlay(raw)
    }

    /// Render as a TOML document that [`SessionConfig::from_file`] accepts.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();
        output.push_str("# sessionfs configuration\n\n");
        output.push_str("[session]\n");
        output.push_str(&format!("max_sessions = {}\n", self.max_sessions));
        output.push_str(&format!("buffer_order = {}\n", self.buffer_order));
        output.push_str(&format!(
            "# buffer capacity: {} bytes\n",
            self.buffer_capacity()
        ));
        output
    }
}

fn env_integer(name: &str) -> Option<i64> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %value, "ignoring non-integer environment override");
            None
        }
    }
}

fn read_raw_file(path: &Path) -> Result<RawSessionConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let table: toml::Table = contents
        .parse()
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;

    match table.get("session") {
        Some(section) => section
            .clone()
            .try_into()
            .with_context(|| format!("failed to parse [session] section: {}", path.display())),
        None => Ok(RawSessionConfig::default()),
    }
}

/// Config files that exist, in load order (system, user, local or override).
pub fn discover_config_files(override_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/sessionfs/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("sessionfs/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = override_path {
        if path.exists() {
            files.push(path.to_path_buf());
        }
        return files;
    }

    let local = PathBuf::from("sessionfs.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.max_sessions(), 512);
        assert_eq!(config.buffer_order(), 2);
        assert_eq!(config.buffer_capacity(), 16 * 1024);
    }

    #[test]
    fn test_clamp_to_caps() {
        let config = SessionConfig::clamped(10_000, 9);
        assert_eq!(config.max_sessions(), MAX_SESSIONS_CAP);
        assert_eq!(config.buffer_order(), MAX_BUFFER_ORDER);
        assert_eq!(config.buffer_capacity(), 64 * 1024);
    }

    #[test]
    fn test_out_of_range_low_keeps_defaults() {
        let config = SessionConfig::clamped(0, -1);
        assert_eq!(config, SessionConfig::default());

        let config = SessionConfig::clamped(-7, -100);
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_in_range_values_kept() {
        let config = SessionConfig::clamped(2, 0);
        assert_eq!(config.max_sessions(), 2);
        assert_eq!(config.buffer_capacity(), PAGE_SIZE);
    }

    #[test]
    fn test_from_file_partial_section() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("sessionfs.toml");
        std::fs::write(&path, "[session]\nmax_sessions = 8\n")?;

        let config = SessionConfig::from_file(&path)?;
        assert_eq!(config.max_sessions(), 8);
        assert_eq!(config.buffer_order(), DEFAULT_BUFFER_ORDER);
        Ok(())
    }

    #[test]
    fn test_from_file_clamps() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("sessionfs.toml");
        std::fs::write(&path, "[session]\nmax_sessions = 99999\nbuffer_order = 12\n")?;

        let config = SessionConfig::from_file(&path)?;
        assert_eq!(config.max_sessions(), MAX_SESSIONS_CAP);
        assert_eq!(config.buffer_order(), MAX_BUFFER_ORDER);
        Ok(())
    }

    #[test]
    fn test_from_file_without_section() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("other.toml");
        std::fs::write(&path, "[unrelated]\nkey = 1\n")?;

        assert_eq!(SessionConfig::from_file(&path)?, SessionConfig::default());
        Ok(())
    }

    #[test]
    fn test_from_file_rejects_bad_toml() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[session\nmax_sessions = ")?;

        let err = SessionConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse TOML"));
        Ok(())
    }

    #[test]
    fn test_to_toml_roundtrip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("sessionfs.toml");
        let config = SessionConfig::clamped(33, 3);
        std::fs::write(&path, config.to_toml())?;

        assert_eq!(SessionConfig::from_file(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_serde_json_deserialize_clamps() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"max_sessions": 5000, "buffer_order": 1}"#).unwrap();
        assert_eq!(config.max_sessions(), MAX_SESSIONS_CAP);
        assert_eq!(config.buffer_order(), 1);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var(ENV_MAX_SESSIONS, "16");
        env::set_var(ENV_BUFFER_ORDER, "not-a-number");

        let config = SessionConfig::from_env();
        assert_eq!(config.max_sessions(), 16);
        assert_eq!(config.buffer_order(), DEFAULT_BUFFER_ORDER);

        env::remove_var(ENV_MAX_SESSIONS);
        env::remove_var(ENV_BUFFER_ORDER);
    }

    #[test]
    #[serial]
    fn test_load_env_wins_over_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("sessionfs.toml");
        std::fs::write(&path, "[session]\nmax_sessions = 8\nbuffer_order = 1\n")?;

        env::set_var(ENV_BUFFER_ORDER, "3");
        let config = SessionConfig::load(Some(&path));
        env::remove_var(ENV_BUFFER_ORDER);

        let config = config?;
        assert_eq!(config.max_sessions(), 8);
        assert_eq!(config.buffer_order(), 3);
        Ok(())
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let result = SessionConfig::load(Some(Path::new("/nonexistent/sessionfs.toml")));
        assert!(result.unwrap_err().to_string().contains("not found"));
    }
}
