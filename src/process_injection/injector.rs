use super::environment::{apply_modification, apply_modifications, inherited_environment, Environment};
use super::global_hook::GlobalHook;
use super::types::{CaptureOptions, EnvSep, EnvironmentModification, EnvironmentModifications, ProcessId};
use crate::error_handling::types::InjectionError;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

/// Variable carrying the capture artifact path to the injected component.
pub const CAPTURE_FILE_VAR: &str = "CAPBRIDGE_CAPFILE";

/// Variable carrying the JSON encoded [`CaptureOptions`] to the injected component.
pub const CAPTURE_OPTIONS_VAR: &str = "CAPBRIDGE_CAPOPTS";

/// Dynamic loader variable used to preload the capture component.
#[cfg(target_os = "macos")]
pub const PRELOAD_VAR: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
pub const PRELOAD_VAR: &str = "LD_PRELOAD";

/// Directory under the system temp dir used for rendezvous files and the hook manifest.
pub const DEFAULT_HOOK_DIR_NAME: &str = "capbridge-hooks";

/// Starts or attaches to processes with the capture component loaded.
///
/// # Examples
///
/// ```rust,no_run
/// use capbridge::process_injection::{CaptureOptions, EnvironmentModifications, ProcessInjector};
/// use std::path::Path;
///
/// let injector = ProcessInjector::new("/usr/lib/capbridge/libcapture.so");
/// let pid = injector.launch_with_injection(
///     Path::new("/usr/bin/glxgears"),
///     Path::new(""),
///     "-info",
///     &EnvironmentModifications::empty(),
///     Path::new("/tmp/glxgears.cap"),
///     &CaptureOptions::default(),
///     false,
/// )?;
/// println!("started {}", pid);
/// # Ok::<(), capbridge::error_handling::types::InjectionError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ProcessInjector {
    component: PathBuf,
    hook_dir: PathBuf,
}

impl ProcessInjector {
    pub fn new(component: impl Into<PathBuf>) -> Self {
        Self {
            component: component.into(),
            hook_dir: std::env::temp_dir().join(DEFAULT_HOOK_DIR_NAME),
        }
    }

    pub fn with_hook_dir(mut self, hook_dir: impl Into<PathBuf>) -> Self {
        self.hook_dir = hook_dir.into();
        self
    }

    pub fn component(&self) -> &Path {
        &self.component
    }

    pub fn hook_dir(&self) -> &Path {
        &self.hook_dir
    }

    pub(crate) fn ensure_component(&self) -> Result<(), InjectionError> {
        if self.component.is_file() {
            Ok(())
        } else {
            error!("Capture component {} not found", self.component.display());
            Err(InjectionError::ComponentMissing(
                self.component.display().to_string(),
            ))
        }
    }

    /// The environment a launched child receives: the inherited one, `env_mods` applied in
    /// order, then the preload and capture variables.
    pub fn child_environment(
        &self,
        env_mods: &EnvironmentModifications,
        artifact_path: &Path,
        options: &CaptureOptions,
    ) -> Result<Environment, InjectionError> {
        let mut env = inherited_environment();
        apply_modifications(&mut env, env_mods);

        let encoded = serde_json::to_string(options)
            .map_err(|e| InjectionError::Serialization(e.to_string()))?;

        apply_modification(
            &mut env,
            &EnvironmentModification::append(
                PRELOAD_VAR,
                &self.component.display().to_string(),
                EnvSep::Colon,
            ),
        );
        apply_modification(
            &mut env,
            &EnvironmentModification::set(CAPTURE_FILE_VAR, &artifact_path.display().to_string()),
        );
        apply_modification(
            &mut env,
            &EnvironmentModification::set(CAPTURE_OPTIONS_VAR, &encoded),
        );
        Ok(env)
    }

    /// Starts `app` with the capture component preloaded and returns its process id.
    ///
    /// An empty `working_dir` runs the child in the application's directory. With
    /// `wait_for_exit` the call blocks until the child exits; otherwise the child is reaped on
    /// a background thread.
    ///
    /// # Errors
    ///
    /// - `InjectionError::ComponentMissing` if the capture component does not exist
    /// - `InjectionError::LaunchFailed` if the process cannot be started
    #[allow(clippy::too_many_arguments)]
    pub fn launch_with_injection(
        &self,
        app: &Path,
        working_dir: &Path,
        cmd_line: &str,
        env_mods: &EnvironmentModifications,
        artifact_path: &Path,
        options: &CaptureOptions,
        wait_for_exit: bool,
    ) -> Result<ProcessId, InjectionError> {
        self.ensure_component()?;
        let env = self.child_environment(env_mods, artifact_path, options)?;
        let pid = spawn_child(app, working_dir, cmd_line, &env, wait_for_exit)?;
        info!(
            "Launched {} as pid {} capturing to {}",
            app.display(),
            pid,
            artifact_path.display()
        );
        Ok(pid)
    }

    /// Starts `app` without capturing, unless the [`GlobalHook`] is enabled and its pattern
    /// matches `app`. A matching launch is injected with the hook's component, artifact path
    /// and options.
    ///
    /// # Errors
    ///
    /// - `InjectionError::ComponentMissing` if the hook matches but its component is gone
    /// - `InjectionError::LaunchFailed` if the process cannot be started
    pub fn launch(
        &self,
        app: &Path,
        working_dir: &Path,
        cmd_line: &str,
        env_mods: &EnvironmentModifications,
        wait_for_exit: bool,
    ) -> Result<ProcessId, InjectionError> {
        if let Some(hook) = GlobalHook::instance().config().filter(|c| c.matches(app)) {
            debug!("{} matches global hook {:?}", app.display(), hook.path_match);
            return ProcessInjector::new(&hook.component)
                .with_hook_dir(&self.hook_dir)
                .launch_with_injection(
                    app,
                    working_dir,
                    cmd_line,
                    env_mods,
                    &hook.artifact_path,
                    &hook.options,
                    wait_for_exit,
                );
        }

        let mut env = inherited_environment();
        apply_modifications(&mut env, env_mods);
        let pid = spawn_child(app, working_dir, cmd_line, &env, wait_for_exit)?;
        info!("Launched {} as pid {}", app.display(), pid);
        Ok(pid)
    }
}

fn spawn_child(
    app: &Path,
    working_dir: &Path,
    cmd_line: &str,
    env: &Environment,
    wait_for_exit: bool,
) -> Result<ProcessId, InjectionError> {
    let args = split_command_line(cmd_line)?;

    let mut cmd = Command::new(app);
    cmd.args(&args).env_clear().envs(env);
    if let Some(dir) = effective_working_dir(app, working_dir) {
        cmd.current_dir(dir);
    }

    debug!("Launching {} with args {:?}", app.display(), args);
    let child = cmd.spawn().map_err(|e| {
        error!("Failed to launch {}: {}", app.display(), e);
        InjectionError::LaunchFailed(e)
    })?;
    let pid = child.id();

    if wait_for_exit {
        wait_child(child);
    } else {
        let reaper = std::thread::Builder::new()
            .name(format!("reap-{}", pid))
            .spawn(move || wait_child(child));
        if let Err(e) = reaper {
            warn!("Unable to watch pid {}: {}", pid, e);
        }
    }
    Ok(pid)
}

fn wait_child(mut child: Child) {
    let pid = child.id();
    match child.wait() {
        Ok(status) => info!("Injected process {} exited with {}", pid, status),
        Err(e) => warn!("Failed waiting for pid {}: {}", pid, e),
    }
}

fn effective_working_dir<'a>(app: &'a Path, working_dir: &'a Path) -> Option<&'a Path> {
    if !working_dir.as_os_str().is_empty() {
        return Some(working_dir);
    }
    app.parent().filter(|dir| !dir.as_os_str().is_empty())
}

/// Splits a command line into arguments with shell quoting rules.
///
/// # Errors
///
/// - `InjectionError::InvalidCommandLine` on an unterminated quote or trailing escape
pub fn split_command_line(cmd_line: &str) -> Result<Vec<String>, InjectionError> {
    shell_words::split(cmd_line).map_err(|e| InjectionError::InvalidCommandLine(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_split_command_line() {
        assert_eq!(
            split_command_line(r#"-c "echo hi" 'a b'  plain "say \"x\"" """#).unwrap(),
            vec!["-c", "echo hi", "a b", "plain", "say \"x\"", ""]
        );
        assert!(split_command_line("   ").unwrap().is_empty());
        assert!(matches!(
            split_command_line("--title \"unterminated"),
            Err(InjectionError::InvalidCommandLine(_))
        ));
    }

    #[test]
    fn test_child_environment_layers_capture_variables() {
        let dir = TempDir::new().unwrap();
        let component = dir.path().join("libcapture.so");
        fs::write(&component, b"").unwrap();

        let injector = ProcessInjector::new(&component);
        let mods = EnvironmentModifications::new(vec![
            EnvironmentModification::set("CAPBRIDGE_TEST_FLAG", "on"),
            EnvironmentModification::set(PRELOAD_VAR, "/lib/libfirst.so"),
        ]);
        let options = CaptureOptions {
            api_validation: true,
            ..CaptureOptions::default()
        };

        let env = injector
            .child_environment(&mods, Path::new("/tmp/out.cap"), &options)
            .unwrap();

        assert_eq!(env["CAPBRIDGE_TEST_FLAG"], "on");
        assert_eq!(
            env[PRELOAD_VAR],
            format!("/lib/libfirst.so:{}", component.display())
        );
        assert_eq!(env[CAPTURE_FILE_VAR], "/tmp/out.cap");
        let decoded: CaptureOptions = serde_json::from_str(&env[CAPTURE_OPTIONS_VAR]).unwrap();
        assert_eq!(decoded, options);
    }

    #[test]
    fn test_missing_component_is_rejected() {
        let injector = ProcessInjector::new("/nonexistent/libcapture.so");
        let result = injector.launch_with_injection(
            Path::new("/bin/true"),
            Path::new(""),
            "",
            &EnvironmentModifications::empty(),
            Path::new("/tmp/out.cap"),
            &CaptureOptions::default(),
            true,
        );
        assert!(matches!(result, Err(InjectionError::ComponentMissing(_))));
    }

    #[test]
    fn test_missing_application_fails_to_launch() {
        let dir = TempDir::new().unwrap();
        let component = dir.path().join("libcapture.so");
        fs::write(&component, b"").unwrap();

        let result = ProcessInjector::new(&component).launch_with_injection(
            &dir.path().join("no-such-app"),
            Path::new(""),
            "",
            &EnvironmentModifications::empty(),
            Path::new("/tmp/out.cap"),
            &CaptureOptions::default(),
            true,
        );
        assert!(matches!(result, Err(InjectionError::LaunchFailed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_launched_child_sees_modified_environment() {
        let dir = TempDir::new().unwrap();
        let component = dir.path().join("libcapture.so");
        fs::write(&component, b"").unwrap();
        let dump = dir.path().join("env.txt");

        let mods = EnvironmentModifications::new(vec![EnvironmentModification::set(
            "CAPBRIDGE_TEST_FLAG",
            "launched",
        )]);
        let pid = ProcessInjector::new(&component)
            .launch_with_injection(
                Path::new("/bin/sh"),
                dir.path(),
                &format!("-c \"env > '{}'\"", dump.display()),
                &mods,
                Path::new("/tmp/launched.cap"),
                &CaptureOptions::default(),
                true,
            )
            .unwrap();

        assert!(pid > 0);
        let contents = fs::read_to_string(&dump).unwrap();
        assert!(contents.contains("CAPBRIDGE_TEST_FLAG=launched"));
        assert!(contents.contains("CAPBRIDGE_CAPFILE=/tmp/launched.cap"));
        assert!(contents.contains(&component.display().to_string()));
    }
}
