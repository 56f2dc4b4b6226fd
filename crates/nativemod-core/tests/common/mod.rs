//! Fake dynamic loader for integration tests.
//!
//! Binaries are registered by file name with the symbols they export.
//! Lifecycle entry points are plain `extern "C"` functions that append to a
//! thread-local call log; lifecycle calls run on the calling thread, so tests
//! running in parallel never see each other's calls.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nativemod_core::ffi::ModInfo;
use nativemod_core::{BinaryDescriptor, LibraryOpener, ModloaderError, NativeLibrary, Result};
use parking_lot::Mutex;

thread_local! {
    static CALLS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

pub fn log_call(entry: impl Into<String>) {
    CALLS.with(|calls| calls.borrow_mut().push(entry.into()));
}

/// Take and clear this thread's call log.
pub fn take_calls() -> Vec<String> {
    CALLS.with(|calls| std::mem::take(&mut *calls.borrow_mut()))
}

/// What a fake binary exports.
#[derive(Clone, Default)]
pub struct FakeSpec {
    symbols: HashMap<String, usize>,
    open_error: Option<String>,
    panic_on_lookup: bool,
}

impl FakeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup(self, f: unsafe extern "C" fn(*mut ModInfo)) -> Self {
        self.symbol("setup", f as usize)
    }

    pub fn load(self, f: unsafe extern "C" fn()) -> Self {
        self.symbol("load", f as usize)
    }

    pub fn late_load(self, f: unsafe extern "C" fn()) -> Self {
        self.symbol("late_load", f as usize)
    }

    fn symbol(mut self, name: &str, address: usize) -> Self {
        self.symbols.insert(name.to_string(), address);
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.open_error = Some(reason.to_string());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_lookup = true;
        self
    }
}

#[derive(Default)]
pub struct FakeOpener {
    specs: Mutex<HashMap<String, FakeSpec>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl FakeOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, file_name: &str, spec: FakeSpec) {
        self.specs.lock().insert(file_name.to_string(), spec);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl LibraryOpener for FakeOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeLibrary>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let spec = self.specs.lock().get(&name).cloned().unwrap_or_default();
        if let Some(reason) = spec.open_error {
            return Err(ModloaderError::LoadFailed(reason));
        }
        let handle = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeLibrary {
            handle,
            symbols: spec.symbols,
            panic_on_lookup: spec.panic_on_lookup,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeLibrary {
    handle: usize,
    symbols: HashMap<String, usize>,
    panic_on_lookup: bool,
    closed: Arc<AtomicUsize>,
}

impl NativeLibrary for FakeLibrary {
    fn raw_handle(&self) -> *mut c_void {
        self.handle as *mut c_void
    }

    fn symbol(&self, name: &str) -> Option<*const c_void> {
        if self.panic_on_lookup {
            panic!("lookup of {} blew up", name);
        }
        self.symbols.get(name).map(|&address| address as *const c_void)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Create empty files so descriptors can be built for them.
pub fn touch(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, b"").unwrap();
            path
        })
        .collect()
}

pub fn descriptor(dir: &Path, name: &str, deps: &[&str]) -> BinaryDescriptor {
    let path = dir.join(name);
    std::fs::write(&path, b"").unwrap();
    BinaryDescriptor::with_dependencies(path, deps.iter().copied()).unwrap()
}
