//! Platform dynamic-loader seam.
//!
//! [`SystemOpener`] opens libraries through `libloading`. The loader and the
//! lifecycle invoker only see the [`LibraryOpener`] / [`NativeLibrary`]
//! traits, so symbol resolution is always "resolve or none" and closing is an
//! explicit, fallible step.

use std::ffi::{c_void, OsString};
use std::path::Path;

use libloading::Library;

use crate::error::{ModloaderError, Result};

/// An opened native library.
pub trait NativeLibrary: Send + Sync {
    /// Opaque platform handle, stable for the lifetime of the library.
    fn raw_handle(&self) -> *mut c_void;

    /// Resolve an exported symbol by name, or `None` if it is not exported.
    fn symbol(&self, name: &str) -> Option<*const c_void>;

    /// Close the library, invalidating its handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens native libraries.
pub trait LibraryOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeLibrary>>;
}

/// Opener backed by the platform dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl LibraryOpener for SystemOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeLibrary>> {
        // SAFETY: opening runs the library's initializers; callers accept that
        // foreign code executes here.
        let library = unsafe { Library::new(path)? };
        Ok(Box::new(SystemLibrary::new(library)))
    }
}

/// A `libloading` library plus its raw platform handle.
pub struct SystemLibrary {
    library: Library,
    handle: usize,
}

impl SystemLibrary {
    fn new(library: Library) -> Self {
        let (library, handle) = split_raw_handle(library);
        Self { library, handle }
    }
}

#[cfg(unix)]
fn split_raw_handle(library: Library) -> (Library, usize) {
    use libloading::os::unix;
    let raw = unix::Library::from(library).into_raw();
    // SAFETY: `raw` was produced by `into_raw` just above and is not used elsewhere.
    let library = unsafe { unix::Library::from_raw(raw) };
    (library.into(), raw as usize)
}

#[cfg(windows)]
fn split_raw_handle(library: Library) -> (Library, usize) {
    use libloading::os::windows;
    let raw = windows::Library::from(library).into_raw();
    // SAFETY: `raw` was produced by `into_raw` just above and is not used elsewhere.
    let library = unsafe { windows::Library::from_raw(raw) };
    (library.into(), raw as usize)
}

impl NativeLibrary for SystemLibrary {
    fn raw_handle(&self) -> *mut c_void {
        self.handle as *mut c_void
    }

    fn symbol(&self, name: &str) -> Option<*const c_void> {
        // SAFETY: the symbol is read as an untyped address; callers cast it to
        // the entry point signature they expect.
        let symbol = unsafe { self.library.get::<*const c_void>(name.as_bytes()) }.ok()?;
        let address: *const c_void = *symbol;
        (!address.is_null()).then_some(address)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.library
            .close()
            .map_err(|e| ModloaderError::LoadFailed(e.to_string()))
    }
}

/// Name of the process-wide dynamic-library search variable.
pub const fn library_search_variable() -> &'static str {
    if cfg!(target_os = "windows") {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// Append `path` to the library search variable using the platform separator.
pub fn append_library_search_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(ModloaderError::InvalidArgument(
            "library search path is empty".to_string(),
        ));
    }

    let variable = library_search_variable();
    let mut entries: Vec<OsString> = std::env::var_os(variable)
        .map(|current| std::env::split_paths(&current).map(Into::into).collect())
        .unwrap_or_default();
    entries.push(OsString::from(path));

    let joined = std::env::join_paths(entries)
        .map_err(|e| ModloaderError::InvalidArgument(e.to_string()))?;
    std::env::set_var(variable, joined);
    tracing::debug!(variable, path, "Appended library search path");
    Ok(())
}
