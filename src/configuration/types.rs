use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Path to the device relay executable. Empty means "look it up on `PATH`".
pub const ADB_EXE_PATH: &str = "adbExePath";

/// Seconds to wait for a launched package to become controllable.
pub const MAX_CONNECT_TIMEOUT: &str = "MaxConnectTimeout";

/// Lower bound applied to [`MAX_CONNECT_TIMEOUT`], in seconds.
pub const MIN_CONNECT_TIMEOUT_SECS: u64 = 5;

/// On-disk shape of a settings file.
///
/// ```toml
/// [settings]
/// adbExePath = "/opt/android/platform-tools/adb"
/// MaxConnectTimeout = "30"
/// ```
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}
