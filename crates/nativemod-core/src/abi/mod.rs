//! Modloader ABI state.
//!
//! [`AbiState`] owns the live registry of load records, the once-set
//! configuration strings, and the phase markers. Foreign code reaches it
//! through the `modloader_*` functions in [`exports`], which operate on the
//! state passed to [`install`]. The registry is guarded by a mutex because
//! loaded libraries may call back from threads the host creates.
//!
//! ```text
//!   startup ──register──▶ AbiState ◀──modloader_get_mod / force_unload──  native mods
//!                           │
//!                           └── snapshots (ResultArray) ──▶ caller frees once
//! ```

pub mod exports;

use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::ffi::{LoadPhase, LoadResult, LoadResults, ModResult, ModResults, ResultArray};
use crate::record::{LoadOutcome, LoadStatus, MatchKind, MatchQuery};

/// Once-set configuration strings readable through the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ModloaderPath,
    RootLoadPath,
    SourcePath,
    FilesDir,
    ExternalDir,
    ApplicationId,
}

impl ConfigKey {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug)]
struct ConfiguredStrings {
    values: [CString; ConfigKey::COUNT],
}

impl ConfiguredStrings {
    fn from_config(config: &LoaderConfig) -> Self {
        let c = |s: &str| CString::new(s.replace('\0', "")).unwrap_or_default();
        let p = |p: &std::path::Path| c(&p.to_string_lossy());
        Self {
            values: [
                p(&config.modloader_path),
                p(&config.root_load_path),
                p(&config.source_path),
                p(&config.files_dir),
                p(&config.external_dir),
                c(&config.application_id),
            ],
        }
    }
}

/// Process-lifetime modloader state shared with foreign callers.
#[derive(Debug, Default)]
pub struct AbiState {
    records: Mutex<Vec<LoadOutcome>>,
    strings: OnceCell<ConfiguredStrings>,
    phase: AtomicU8,
    libs_opened: AtomicBool,
    early_mods_opened: AtomicBool,
    late_mods_opened: AtomicBool,
}

impl AbiState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the configuration strings. Only the first call has effect.
    pub fn configure(&self, config: &LoaderConfig) -> bool {
        let set = self
            .strings
            .set(ConfiguredStrings::from_config(config))
            .is_ok();
        if !set {
            warn!("Modloader configuration already set, ignoring");
        }
        set
    }

    /// Configured string, or empty if unset.
    pub fn config_c_str(&self, key: ConfigKey) -> &CStr {
        match self.strings.get() {
            Some(strings) => strings.values[key.index()].as_c_str(),
            None => c"",
        }
    }

    pub fn config_string(&self, key: ConfigKey) -> String {
        self.config_c_str(key).to_string_lossy().into_owned()
    }

    pub fn phase(&self) -> LoadPhase {
        LoadPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: LoadPhase) {
        debug!(?phase, "Entering load phase");
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn libs_opened(&self) -> bool {
        self.libs_opened.load(Ordering::Acquire)
    }

    pub fn early_mods_opened(&self) -> bool {
        self.early_mods_opened.load(Ordering::Acquire)
    }

    pub fn late_mods_opened(&self) -> bool {
        self.late_mods_opened.load(Ordering::Acquire)
    }

    pub fn mark_libs_opened(&self) {
        self.libs_opened.store(true, Ordering::Release);
    }

    pub fn mark_early_mods_opened(&self) {
        self.early_mods_opened.store(true, Ordering::Release);
    }

    pub fn mark_late_mods_opened(&self) {
        self.late_mods_opened.store(true, Ordering::Release);
    }

    /// Append a record, loaded or failed. Both kinds share one entry point.
    pub fn register(&self, record: LoadOutcome) {
        debug!(id = %record.identifier(), loaded = record.is_loaded(), "Registering record");
        self.records.lock().push(record);
    }

    pub fn register_all(&self, records: impl IntoIterator<Item = LoadOutcome>) {
        let mut guard = self.records.lock();
        for record in records {
            debug!(id = %record.identifier(), loaded = record.is_loaded(), "Registering record");
            guard.push(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Run `f` over the registry while holding its lock.
    pub fn with_records<R>(&self, f: impl FnOnce(&[LoadOutcome]) -> R) -> R {
        f(&self.records.lock())
    }

    /// First match as a [`ModResult`], or a zeroed result.
    ///
    /// String pointers stay valid until the record leaves the registry.
    pub fn get_mod(&self, query: &MatchQuery, kind: MatchKind) -> ModResult {
        self.with_records(|records| {
            records
                .iter()
                .find(|r| r.matches(query, kind))
                .map(ModResult::borrowed)
                .unwrap_or_default()
        })
    }

    /// Close and remove the first match. An absent match counts as success.
    pub fn force_unload(&self, query: &MatchQuery, kind: MatchKind) -> bool {
        let removed = {
            let mut records = self.records.lock();
            match records.iter().position(|r| r.matches(query, kind)) {
                Some(idx) => records.remove(idx),
                None => return true,
            }
        };

        // Closed outside the lock: library destructors may call back in.
        let mut record = removed;
        if let Err(e) = record.close() {
            warn!(id = %record.identifier(), error = %e, "Failed to close binary during force unload");
        }
        info!(id = %record.identifier(), "Force unloaded");
        true
    }

    /// `Loaded` if a match is registered, otherwise `NotFound`.
    ///
    /// Any registered record counts as a match, including one whose open
    /// failed; its payload is then the path of a binary that is not mapped.
    /// Check [`AbiState::statuses`] to tell the two apart. Loading on demand
    /// is not implemented.
    pub fn require_mod(&self, query: &MatchQuery, kind: MatchKind) -> LoadStatus {
        self.with_records(|records| {
            records
                .iter()
                .find(|r| r.matches(query, kind))
                .map(|r| LoadStatus::Loaded(r.path().to_path_buf()))
                .unwrap_or(LoadStatus::NotFound)
        })
    }

    pub fn statuses(&self) -> Vec<LoadStatus> {
        self.with_records(|records| records.iter().map(LoadOutcome::status).collect())
    }

    /// Snapshot of loaded records. The caller owns the buffer and must
    /// release it with [`free_mod_results`] / `modloader_free_results`.
    pub fn loaded_results(&self) -> ModResults {
        let results = self.with_records(|records| {
            records
                .iter()
                .filter(|r| r.is_loaded())
                .map(ModResult::owned)
                .collect()
        });
        ResultArray::from_vec(results)
    }

    /// Snapshot of every record as a tagged [`LoadResult`].
    pub fn all_results(&self) -> LoadResults {
        let results = self
            .statuses()
            .iter()
            .map(LoadResult::from)
            .collect();
        ResultArray::from_vec(results)
    }

    /// Close every open handle and empty the registry.
    pub fn unload_all(&self) {
        let records = std::mem::take(&mut *self.records.lock());
        for mut record in records {
            if let Err(e) = record.close() {
                warn!(id = %record.identifier(), error = %e, "Failed to close binary");
            }
        }
    }
}

/// Release a buffer from [`AbiState::loaded_results`]. Zeroes it; a second
/// call is a no-op.
///
/// # Safety
/// `results` must be zeroed or come from `loaded_results`.
pub unsafe fn free_mod_results(results: &mut ModResults) {
    if let Some(items) = results.take() {
        for item in items.iter() {
            item.release_owned();
        }
    }
}

/// Release a buffer from [`AbiState::all_results`]. Zeroes it; a second call
/// is a no-op.
///
/// # Safety
/// `results` must be zeroed or come from `all_results`.
pub unsafe fn free_load_results(results: &mut LoadResults) {
    drop(results.take());
}

static INSTALLED: OnceCell<Arc<AbiState>> = OnceCell::new();

/// Make `state` the target of the exported `modloader_*` functions.
///
/// Only one state can be installed per process; later calls return `false`.
pub fn install(state: Arc<AbiState>) -> bool {
    INSTALLED.set(state).is_ok()
}

/// The installed state, if any.
pub fn installed() -> Option<&'static Arc<AbiState>> {
    INSTALLED.get()
}
