use super::types::*;
use crate::error_handling::types::ConfigError;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Shared key/value settings store.
///
/// Settings are plain strings addressed by name, exactly as they are written in the settings
/// file. The store is cheap to clone: clones share the same underlying table, so a value set
/// through one handle is visible through every other.
///
/// # Examples
///
/// ```
/// use capbridge::configuration::{ConfigStore, MAX_CONNECT_TIMEOUT};
///
/// let config = ConfigStore::new();
/// config.set_setting(MAX_CONNECT_TIMEOUT, "12");
/// assert_eq!(config.max_connect_timeout().as_secs(), 12);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    settings: Arc<RwLock<BTreeMap<String, String>>>,
    warned_bridge_path: Arc<AtomicBool>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a TOML settings file.
    ///
    /// # Errors
    ///
    /// - `ConfigError::IoError` if the file cannot be read
    /// - `ConfigError::TomlError` if its content is not a valid settings table
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        debug!("Parsed {} settings", file.settings.len());
        Ok(Self {
            settings: Arc::new(RwLock::new(file.settings)),
            warned_bridge_path: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Writes the current table back out as TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let file = SettingsFile {
            settings: self.snapshot(),
        };
        let content =
            toml::to_string_pretty(&file).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the raw value of `name`, or an empty string when unset.
    pub fn get_setting(&self, name: &str) -> String {
        match self.settings.read() {
            Ok(table) => table.get(name).cloned().unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned().unwrap_or_default(),
        }
    }

    pub fn set_setting(&self, name: &str, value: &str) {
        debug!("Setting {} = {:?}", name, value);
        let mut table = match self.settings.write() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.insert(name.to_string(), value.to_string());
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        match self.settings.read() {
            Ok(table) => table.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Resolves the relay executable.
    ///
    /// Order: the configured [`ADB_EXE_PATH`], then `adb` found on `PATH`, then the bare name
    /// `adb` so the OS search rules get the last word. A missing setting is reported once.
    pub fn bridge_executable(&self) -> PathBuf {
        let configured = self.get_setting(ADB_EXE_PATH);
        if !configured.trim().is_empty() {
            return PathBuf::from(configured.trim());
        }

        if !self.warned_bridge_path.swap(true, Ordering::Relaxed) {
            warn!(
                "{} not set, attempting to call 'adb' in working env",
                ADB_EXE_PATH
            );
        }

        which::which("adb").unwrap_or_else(|_| PathBuf::from("adb"))
    }

    /// Poll budget for a launched package, never below [`MIN_CONNECT_TIMEOUT_SECS`].
    ///
    /// Values that are missing or not a number count as zero.
    pub fn max_connect_timeout(&self) -> Duration {
        let configured = self
            .get_setting(MAX_CONNECT_TIMEOUT)
            .trim()
            .parse::<i64>()
            .unwrap_or(0);
        let secs = configured.max(MIN_CONNECT_TIMEOUT_SECS as i64) as u64;
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[settings]\nadbExePath = \"/opt/adb\"\nMaxConnectTimeout = \"20\""
        )
        .unwrap();

        let config = ConfigStore::from_file(file.path()).unwrap();

        assert_eq!(config.get_setting(ADB_EXE_PATH), "/opt/adb");
        assert_eq!(config.bridge_executable(), PathBuf::from("/opt/adb"));
        assert_eq!(config.max_connect_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_bad_toml_is_rejected() {
        let result = ConfigStore::from_toml_str("[settings\nbroken");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ConfigStore::from_file(Path::new("/nonexistent/capbridge/settings.toml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_connect_timeout_floor() {
        let config = ConfigStore::new();
        assert_eq!(config.max_connect_timeout(), Duration::from_secs(5));

        config.set_setting(MAX_CONNECT_TIMEOUT, "0");
        assert_eq!(config.max_connect_timeout(), Duration::from_secs(5));

        config.set_setting(MAX_CONNECT_TIMEOUT, "-3");
        assert_eq!(config.max_connect_timeout(), Duration::from_secs(5));

        config.set_setting(MAX_CONNECT_TIMEOUT, "garbage");
        assert_eq!(config.max_connect_timeout(), Duration::from_secs(5));

        config.set_setting(MAX_CONNECT_TIMEOUT, "9");
        assert_eq!(config.max_connect_timeout(), Duration::from_secs(9));
    }

    #[test]
    fn test_clones_share_settings() {
        let config = ConfigStore::new();
        let other = config.clone();
        other.set_setting("custom", "value");
        assert_eq!(config.get_setting("custom"), "value");
        assert_eq!(config.get_setting("unset"), "");
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let config = ConfigStore::new();
        config.set_setting(ADB_EXE_PATH, "/usr/bin/adb");
        config.save(&path).unwrap();

        let loaded = ConfigStore::from_file(&path).unwrap();
        assert_eq!(loaded.snapshot(), config.snapshot());
    }

    #[test]
    fn test_bridge_executable_falls_back_to_bare_name() {
        let config = ConfigStore::new();
        let exe = config.bridge_executable();
        assert_eq!(exe.file_stem().and_then(|s| s.to_str()), Some("adb"));
    }
}
