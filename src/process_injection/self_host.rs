//! In-process capture: an application capturing its own frames through a capture component
//! it loads by file name.
//!
//! The component exports one versioned entry point, [`ENTRY_POINT`], which fills in a table of
//! capture calls. Anything missing along the way (module, symbol, API version) is reported by
//! the [`ComponentLoader`] as a [`ComponentError`] and turned into a logged no-op by
//! [`SelfHostCapture`]; a host application never fails because capture is unavailable.

use crate::error_handling::types::ComponentError;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Symbol resolved in the capture component.
pub const ENTRY_POINT: &str = "CAPBRIDGE_GetAPI";

/// API version requested from [`ENTRY_POINT`], encoded as `major * 10000 + minor * 100 + patch`.
pub const CAPTURE_API_VERSION: i32 = 1_00_00;

/// Frame capture calls exported by a loaded capture component.
pub trait CaptureApi: Send + Sync {
    fn start_frame_capture(&self);
    /// Returns whether a frame was captured.
    fn end_frame_capture(&self) -> bool;
}

/// Resolves a component name to its [`CaptureApi`].
pub trait ComponentLoader: Send + Sync {
    fn resolve(&self, component: &str) -> Result<Arc<dyn CaptureApi>, ComponentError>;
}

/// Brackets a frame capture in the calling process.
///
/// # Examples
///
/// ```rust,no_run
/// use capbridge::process_injection::SelfHostCapture;
///
/// let capture = SelfHostCapture::new();
/// capture.start("libcapture.so");
/// // render one frame
/// capture.stop("libcapture.so");
/// ```
pub struct SelfHostCapture<L: ComponentLoader = DynamicLoader> {
    loader: L,
}

impl SelfHostCapture<DynamicLoader> {
    pub fn new() -> Self {
        Self::with_loader(DynamicLoader::default())
    }
}

impl Default for SelfHostCapture<DynamicLoader> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ComponentLoader> SelfHostCapture<L> {
    pub fn with_loader(loader: L) -> Self {
        Self { loader }
    }

    /// Starts capturing a frame. Returns `false`, doing nothing, if the component is unusable.
    pub fn start(&self, component: &str) -> bool {
        match self.loader.resolve(component) {
            Ok(api) => {
                api.start_frame_capture();
                true
            }
            Err(e) => {
                debug!("Self-host capture start skipped: {}", e);
                false
            }
        }
    }

    /// Ends the frame started by [`SelfHostCapture::start`]. Returns whether a frame was captured.
    pub fn stop(&self, component: &str) -> bool {
        match self.loader.resolve(component) {
            Ok(api) => api.end_frame_capture(),
            Err(e) => {
                debug!("Self-host capture stop skipped: {}", e);
                false
            }
        }
    }
}

/// Loads components with the platform dynamic loader. Resolved components are cached by name
/// and never unloaded.
#[derive(Default)]
pub struct DynamicLoader {
    resolved: Mutex<HashMap<String, Arc<dyn CaptureApi>>>,
}

impl ComponentLoader for DynamicLoader {
    fn resolve(&self, component: &str) -> Result<Arc<dyn CaptureApi>, ComponentError> {
        let mut resolved = self
            .resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(api) = resolved.get(component) {
            return Ok(Arc::clone(api));
        }

        let api = native::load(component)?;
        resolved.insert(component.to_string(), Arc::clone(&api));
        Ok(api)
    }
}

#[cfg(unix)]
mod native {
    use super::{CaptureApi, CAPTURE_API_VERSION, ENTRY_POINT};
    use crate::error_handling::types::ComponentError;
    use std::ffi::{c_int, c_void, CString};
    use std::sync::Arc;

    type GetApiFn = unsafe extern "C" fn(version: c_int, out_api: *mut *mut c_void) -> c_int;

    #[repr(C)]
    struct ApiTable {
        start_frame_capture: Option<unsafe extern "C" fn(device: *mut c_void, window: *mut c_void)>,
        end_frame_capture:
            Option<unsafe extern "C" fn(device: *mut c_void, window: *mut c_void) -> u32>,
    }

    struct NativeCaptureApi {
        table: *const ApiTable,
    }

    // The table is owned by the component, which stays loaded for the life of the process.
    unsafe impl Send for NativeCaptureApi {}
    unsafe impl Sync for NativeCaptureApi {}

    impl CaptureApi for NativeCaptureApi {
        fn start_frame_capture(&self) {
            // SAFETY: `table` was handed out by the component's entry point and is never freed.
            if let Some(start) = unsafe { (*self.table).start_frame_capture } {
                unsafe { start(std::ptr::null_mut(), std::ptr::null_mut()) };
            }
        }

        fn end_frame_capture(&self) -> bool {
            match unsafe { (*self.table).end_frame_capture } {
                Some(end) => unsafe { end(std::ptr::null_mut(), std::ptr::null_mut()) != 0 },
                None => false,
            }
        }
    }

    /// A `dlopen` handle, closed on drop unless [`keep_resident`](Self::keep_resident) is called.
    struct Module(*mut c_void);

    impl Module {
        fn open(component: &str) -> Option<Self> {
            let name = CString::new(component).ok()?;
            // Returns the existing handle, with its count raised, when already resident.
            let handle = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
            (!handle.is_null()).then_some(Module(handle))
        }

        fn symbol(&self, name: &str) -> Option<*mut c_void> {
            let name = CString::new(name).ok()?;
            let entry = unsafe { libc::dlsym(self.0, name.as_ptr()) };
            (!entry.is_null()).then_some(entry)
        }

        fn keep_resident(self) {
            std::mem::forget(self);
        }
    }

    impl Drop for Module {
        fn drop(&mut self) {
            // SAFETY: the handle came from a successful dlopen and is closed once.
            unsafe { libc::dlclose(self.0) };
        }
    }

    pub(super) fn load(component: &str) -> Result<Arc<dyn CaptureApi>, ComponentError> {
        let module = Module::open(component)
            .ok_or_else(|| ComponentError::ModuleNotFound(component.to_string()))?;
        let entry = module
            .symbol(ENTRY_POINT)
            .ok_or_else(|| ComponentError::EntryPointNotFound(ENTRY_POINT.to_string()))?;

        // SAFETY: the component exports ENTRY_POINT with the GetApiFn signature.
        let get_api: GetApiFn = unsafe { std::mem::transmute::<*mut c_void, GetApiFn>(entry) };
        let mut table: *mut c_void = std::ptr::null_mut();
        let ok = unsafe { get_api(CAPTURE_API_VERSION, &mut table) };
        if ok == 0 || table.is_null() {
            return Err(ComponentError::ApiUnavailable(CAPTURE_API_VERSION as u32));
        }

        module.keep_resident();
        Ok(Arc::new(NativeCaptureApi {
            table: table as *const ApiTable,
        }))
    }

    #[cfg(all(test, target_os = "linux", target_env = "gnu"))]
    pub(super) fn is_resident(component: &str) -> bool {
        let Ok(name) = CString::new(component) else {
            return false;
        };
        let handle =
            unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_NOW | libc::RTLD_NOLOAD) };
        if handle.is_null() {
            return false;
        }
        unsafe { libc::dlclose(handle) };
        true
    }
}

#[cfg(not(unix))]
mod native {
    use super::CaptureApi;
    use crate::error_handling::types::ComponentError;
    use std::sync::Arc;

    pub(super) fn load(component: &str) -> Result<Arc<dyn CaptureApi>, ComponentError> {
        Err(ComponentError::ModuleNotFound(component.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingApi {
        started: AtomicUsize,
        ended: AtomicUsize,
    }

    impl CaptureApi for RecordingApi {
        fn start_frame_capture(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn end_frame_capture(&self) -> bool {
            self.ended.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    struct FakeLoader {
        api: Arc<RecordingApi>,
    }

    impl ComponentLoader for FakeLoader {
        fn resolve(&self, component: &str) -> Result<Arc<dyn CaptureApi>, ComponentError> {
            match component {
                "libcapture.so" => Ok(self.api.clone() as Arc<dyn CaptureApi>),
                "libnoentry.so" => Err(ComponentError::EntryPointNotFound(ENTRY_POINT.to_string())),
                other => Err(ComponentError::ModuleNotFound(other.to_string())),
            }
        }
    }

    #[test]
    fn test_start_stop_reach_component() {
        let api = Arc::new(RecordingApi::default());
        let capture = SelfHostCapture::with_loader(FakeLoader { api: api.clone() });

        assert!(capture.start("libcapture.so"));
        assert!(capture.stop("libcapture.so"));
        assert_eq!(api.started.load(Ordering::SeqCst), 1);
        assert_eq!(api.ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unresolvable_component_is_silent_noop() {
        let api = Arc::new(RecordingApi::default());
        let capture = SelfHostCapture::with_loader(FakeLoader { api: api.clone() });

        assert!(!capture.start("libmissing.so"));
        assert!(!capture.stop("libnoentry.so"));
        assert_eq!(api.started.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dynamic_loader_missing_module() {
        let loader = DynamicLoader::default();
        assert!(matches!(
            loader.resolve("libcapbridge-does-not-exist.so"),
            Err(ComponentError::ModuleNotFound(_))
        ));
        assert!(!SelfHostCapture::new().start("libcapbridge-does-not-exist.so"));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_dynamic_loader_module_without_entry_point() {
        let loader = DynamicLoader::default();
        assert!(matches!(
            loader.resolve("libc.so.6"),
            Err(ComponentError::EntryPointNotFound(_))
        ));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_failed_resolve_releases_module() {
        // Any small system library the test binary does not already link will do.
        let Some(candidate) = ["libutil.so.1", "libanl.so.1", "libz.so.1"]
            .into_iter()
            .find(|lib| !native::is_resident(lib))
        else {
            return;
        };

        let loader = DynamicLoader::default();
        for _ in 0..3 {
            if matches!(loader.resolve(candidate), Err(ComponentError::ModuleNotFound(_))) {
                return;
            }
        }
        assert!(!native::is_resident(candidate));
    }
}
