//! # Global hook
//!
//! While enabled, every newly started process whose executable path matches the configured
//! pattern gets the capture component. There is one hook per process: [`GlobalHook::instance`]
//! returns it, and enabling it a second time without disabling first is refused with
//! [`HookError::AlreadyEnabled`].
//!
//! [`ProcessInjector::launch`] consults the hook: a launch whose path matches is started with
//! the hook's component, artifact path and options, anything else starts without capturing.
//!
//! The active configuration is persisted as a JSON manifest in the hook directory so that
//! process launchers outside this process can honour it. Disabling removes the manifest.

use super::injector::ProcessInjector;
use super::types::CaptureOptions;
use crate::error_handling::types::HookError;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

/// File name of the manifest written into the hook directory while the hook is enabled.
pub const GLOBAL_HOOK_MANIFEST: &str = "global-hook.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalHookConfig {
    pub path_match: String,
    pub component: PathBuf,
    pub artifact_path: PathBuf,
    pub options: CaptureOptions,
    pub enabled_at: DateTime<Utc>,
}

impl GlobalHookConfig {
    /// Case-insensitive substring match against the full executable path.
    pub fn matches(&self, executable: &Path) -> bool {
        executable
            .to_string_lossy()
            .to_lowercase()
            .contains(&self.path_match.to_lowercase())
    }
}

struct ActiveHook {
    config: GlobalHookConfig,
    manifest: PathBuf,
}

/// The process-wide hook. Obtain it through [`GlobalHook::instance`].
///
/// # Examples
///
/// ```rust,no_run
/// use capbridge::process_injection::{CaptureOptions, GlobalHook};
/// use std::path::Path;
///
/// let hook = GlobalHook::instance();
/// hook.enable(
///     Path::new("/tmp/capbridge-hooks"),
///     Path::new("/usr/lib/capbridge/libcapture.so"),
///     "MyGame",
///     Path::new("/tmp/mygame.cap"),
///     &CaptureOptions::default(),
/// )?;
/// assert!(hook.should_inject(Path::new("/opt/MyGame/bin/game")));
/// hook.disable()?;
/// # Ok::<(), capbridge::error_handling::types::HookError>(())
/// ```
pub struct GlobalHook {
    active: Mutex<Option<ActiveHook>>,
}

static GLOBAL_HOOK: OnceLock<GlobalHook> = OnceLock::new();

impl GlobalHook {
    fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    pub fn instance() -> &'static GlobalHook {
        GLOBAL_HOOK.get_or_init(GlobalHook::new)
    }

    fn state(&self) -> MutexGuard<'_, Option<ActiveHook>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Activates the hook and writes its manifest into `hook_dir`.
    ///
    /// # Errors
    ///
    /// - `HookError::AlreadyEnabled` if the hook is active
    /// - `HookError::EmptyPathMatch` if the pattern is blank
    /// - `HookError::ManifestFailed` if the manifest cannot be written
    pub fn enable(
        &self,
        hook_dir: &Path,
        component: &Path,
        path_match: &str,
        artifact_path: &Path,
        options: &CaptureOptions,
    ) -> Result<(), HookError> {
        let mut state = self.state();
        if state.is_some() {
            return Err(HookError::AlreadyEnabled);
        }
        if path_match.trim().is_empty() {
            return Err(HookError::EmptyPathMatch);
        }

        let config = GlobalHookConfig {
            path_match: path_match.trim().to_string(),
            component: component.to_path_buf(),
            artifact_path: artifact_path.to_path_buf(),
            options: options.clone(),
            enabled_at: Utc::now(),
        };
        let encoded = serde_json::to_vec_pretty(&config)
            .map_err(|e| HookError::Serialization(e.to_string()))?;

        fs::create_dir_all(hook_dir).map_err(HookError::ManifestFailed)?;
        let manifest = hook_dir.join(GLOBAL_HOOK_MANIFEST);
        fs::write(&manifest, encoded).map_err(HookError::ManifestFailed)?;

        info!(
            "Global hook enabled for paths matching {:?}, manifest at {}",
            config.path_match,
            manifest.display()
        );
        *state = Some(ActiveHook { config, manifest });
        Ok(())
    }

    /// Deactivates the hook and removes its manifest.
    pub fn disable(&self) -> Result<(), HookError> {
        let mut state = self.state();
        let Some(active) = state.take() else {
            return Err(HookError::NotEnabled);
        };

        if let Err(e) = fs::remove_file(&active.manifest) {
            // The hook is off regardless; a stale manifest is only logged.
            warn!(
                "Unable to remove hook manifest {}: {}",
                active.manifest.display(),
                e
            );
        }
        info!("Global hook disabled");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.state().is_some()
    }

    pub fn config(&self) -> Option<GlobalHookConfig> {
        self.state().as_ref().map(|active| active.config.clone())
    }

    /// Whether a process started from `executable` would receive the component now.
    pub fn should_inject(&self, executable: &Path) -> bool {
        self.state()
            .as_ref()
            .map(|active| active.config.matches(executable))
            .unwrap_or(false)
    }
}

impl ProcessInjector {
    /// Enables the process-wide [`GlobalHook`] with this injector's component.
    pub fn install_global_hook(
        &self,
        path_match: &str,
        artifact_path: &Path,
        options: &CaptureOptions,
    ) -> Result<(), HookError> {
        GlobalHook::instance().enable(
            self.hook_dir(),
            self.component(),
            path_match,
            artifact_path,
            options,
        )
    }

    pub fn remove_global_hook(&self) -> Result<(), HookError> {
        GlobalHook::instance().disable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_enable_disable_lifecycle() {
        let dir = TempDir::new().unwrap();
        let hook = GlobalHook::new();

        hook.enable(
            dir.path(),
            Path::new("/lib/libcapture.so"),
            "Game",
            Path::new("/tmp/game.cap"),
            &CaptureOptions::default(),
        )
        .unwrap();

        assert!(hook.is_enabled());
        assert!(hook.should_inject(Path::new("/opt/games/MyGame/bin/game")));
        assert!(!hook.should_inject(Path::new("/usr/bin/vim")));

        let manifest = dir.path().join(GLOBAL_HOOK_MANIFEST);
        let stored: GlobalHookConfig =
            serde_json::from_slice(&fs::read(&manifest).unwrap()).unwrap();
        assert_eq!(Some(stored), hook.config());

        hook.disable().unwrap();
        assert!(!hook.is_enabled());
        assert!(!manifest.exists());
        assert!(!hook.should_inject(Path::new("/opt/games/MyGame/bin/game")));
    }

    #[test]
    fn test_enable_twice_is_refused() {
        let dir = TempDir::new().unwrap();
        let hook = GlobalHook::new();
        let enable = |pattern: &str| {
            hook.enable(
                dir.path(),
                Path::new("/lib/libcapture.so"),
                pattern,
                Path::new("/tmp/a.cap"),
                &CaptureOptions::default(),
            )
        };

        enable("first").unwrap();
        assert!(matches!(enable("second"), Err(HookError::AlreadyEnabled)));
        assert_eq!(hook.config().unwrap().path_match, "first");
    }

    #[test]
    fn test_invalid_transitions() {
        let dir = TempDir::new().unwrap();
        let hook = GlobalHook::new();

        assert!(matches!(hook.disable(), Err(HookError::NotEnabled)));
        let result = hook.enable(
            dir.path(),
            Path::new("/lib/libcapture.so"),
            "  ",
            Path::new("/tmp/a.cap"),
            &CaptureOptions::default(),
        );
        assert!(matches!(result, Err(HookError::EmptyPathMatch)));
        assert!(!hook.is_enabled());
    }

    #[test]
    #[serial]
    fn test_injector_uses_process_wide_hook() {
        let dir = TempDir::new().unwrap();
        let injector = ProcessInjector::new("/lib/libcapture.so").with_hook_dir(dir.path());

        injector
            .install_global_hook("render", Path::new("/tmp/r.cap"), &CaptureOptions::default())
            .unwrap();
        assert!(GlobalHook::instance().should_inject(Path::new("/usr/bin/renderer")));

        injector.remove_global_hook().unwrap();
        assert!(!GlobalHook::instance().is_enabled());
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_matching_launch_injected_only_while_enabled() {
        use crate::process_injection::{EnvironmentModifications, CAPTURE_FILE_VAR};

        let dir = TempDir::new().unwrap();
        let component = dir.path().join("libcapture.so");
        fs::write(&component, b"").unwrap();
        let injector = ProcessInjector::new(&component).with_hook_dir(dir.path());
        let artifact = dir.path().join("hooked.cap");

        let launch_and_dump = |name: &str| {
            let dump = dir.path().join(name);
            injector
                .launch(
                    Path::new("/bin/sh"),
                    dir.path(),
                    &format!("-c \"env > '{}'\"", dump.display()),
                    &EnvironmentModifications::empty(),
                    true,
                )
                .unwrap();
            fs::read_to_string(dump).unwrap()
        };
        let injected_marker = format!("{}={}", CAPTURE_FILE_VAR, artifact.display());

        injector
            .install_global_hook("/bin/sh", &artifact, &CaptureOptions::default())
            .unwrap();
        assert!(launch_and_dump("hooked.env").contains(&injected_marker));

        assert!(matches!(
            injector.install_global_hook("unrelated-app", &artifact, &CaptureOptions::default()),
            Err(HookError::AlreadyEnabled)
        ));
        injector.remove_global_hook().unwrap();
        assert!(!launch_and_dump("plain.env").contains(CAPTURE_FILE_VAR));
    }
}
