//! `extern "C"` function table.
//!
//! Every function returns a zero/false/empty default when no state is
//! installed or when a panic is raised inside; nothing unwinds out.

use std::ffi::{c_char, CStr};

use tracing::warn;

use super::{installed, AbiState, ConfigKey};
use crate::fault;
use crate::ffi::{read_c_str, LoadPhase, LoadResult, LoadResults, ModInfo, ModResult, ModResults};
use crate::native::append_library_search_path;
use crate::record::{LoadStatus, MatchKind, MatchQuery};

fn with_state<T>(fallback: T, f: impl FnOnce(&AbiState) -> T) -> T {
    match installed() {
        Some(state) => fault::contain_or(fallback, || f(state.as_ref())),
        None => fallback,
    }
}

fn decode(info: &ModInfo, match_type: u32) -> Option<(MatchQuery, MatchKind)> {
    let Some(kind) = MatchKind::from_raw(match_type) else {
        warn!(match_type, "Unknown match type");
        return None;
    };
    // SAFETY: foreign callers pass NUL-terminated strings or null.
    let query = unsafe { info.to_query() };
    Some((query, kind))
}

fn config_ptr(key: ConfigKey) -> *const c_char {
    match installed() {
        Some(state) => fault::contain_or(c"".as_ptr(), || state.config_c_str(key).as_ptr()),
        None => c"".as_ptr(),
    }
}

#[no_mangle]
pub extern "C" fn modloader_get_path() -> *const c_char {
    config_ptr(ConfigKey::ModloaderPath)
}

#[no_mangle]
pub extern "C" fn modloader_get_root_load_path() -> *const c_char {
    config_ptr(ConfigKey::RootLoadPath)
}

#[no_mangle]
pub extern "C" fn modloader_get_source_path() -> *const c_char {
    config_ptr(ConfigKey::SourcePath)
}

#[no_mangle]
pub extern "C" fn modloader_get_files_dir() -> *const c_char {
    config_ptr(ConfigKey::FilesDir)
}

#[no_mangle]
pub extern "C" fn modloader_get_external_dir() -> *const c_char {
    config_ptr(ConfigKey::ExternalDir)
}

#[no_mangle]
pub extern "C" fn modloader_get_application_id() -> *const c_char {
    config_ptr(ConfigKey::ApplicationId)
}

#[no_mangle]
pub extern "C" fn modloader_get_load_phase() -> LoadPhase {
    with_state(LoadPhase::None, AbiState::phase)
}

#[no_mangle]
pub extern "C" fn modloader_get_libs_opened() -> bool {
    with_state(false, AbiState::libs_opened)
}

#[no_mangle]
pub extern "C" fn modloader_get_early_mods_opened() -> bool {
    with_state(false, AbiState::early_mods_opened)
}

#[no_mangle]
pub extern "C" fn modloader_get_late_mods_opened() -> bool {
    with_state(false, AbiState::late_mods_opened)
}

/// First record matching `info`, or a zeroed result.
///
/// # Safety
/// `info`'s strings must be NUL-terminated or null.
#[no_mangle]
pub unsafe extern "C" fn modloader_get_mod(info: ModInfo, match_type: u32) -> ModResult {
    with_state(ModResult::default(), |state| match decode(&info, match_type) {
        Some((query, kind)) => state.get_mod(&query, kind),
        None => ModResult::default(),
    })
}

/// Close and remove the first record matching `info`.
///
/// # Safety
/// `info`'s strings must be NUL-terminated or null.
#[no_mangle]
pub unsafe extern "C" fn modloader_force_unload(info: ModInfo, match_type: u32) -> bool {
    with_state(false, |state| match decode(&info, match_type) {
        Some((query, kind)) => state.force_unload(&query, kind),
        None => false,
    })
}

/// Snapshot of loaded records. Release with [`modloader_free_results`].
#[no_mangle]
pub extern "C" fn modloader_get_loaded() -> ModResults {
    with_state(ModResults::empty(), AbiState::loaded_results)
}

/// Snapshot of all records. Release with [`modloader_free_load_results`].
#[no_mangle]
pub extern "C" fn modloader_get_all() -> LoadResults {
    with_state(LoadResults::empty(), AbiState::all_results)
}

/// Release a [`modloader_get_loaded`] buffer and zero it. Null or
/// already-zeroed buffers are ignored.
///
/// # Safety
/// `results` must be null or point to a buffer from `modloader_get_loaded`.
#[no_mangle]
pub unsafe extern "C" fn modloader_free_results(results: *mut ModResults) {
    if let Some(results) = results.as_mut() {
        fault::contain_or((), || super::free_mod_results(results));
    }
}

/// Release a [`modloader_get_all`] buffer and zero it. Null or
/// already-zeroed buffers are ignored.
///
/// # Safety
/// `results` must be null or point to a buffer from `modloader_get_all`.
#[no_mangle]
pub unsafe extern "C" fn modloader_free_load_results(results: *mut LoadResults) {
    if let Some(results) = results.as_mut() {
        fault::contain_or((), || super::free_load_results(results));
    }
}

/// `Loaded` if a matching record exists, `NotFound` otherwise.
///
/// # Safety
/// `info`'s strings must be NUL-terminated or null.
#[no_mangle]
pub unsafe extern "C" fn modloader_require_mod(info: ModInfo, match_type: u32) -> LoadResult {
    with_state(LoadResult::not_found(), |state| match decode(&info, match_type) {
        Some((query, kind)) => LoadResult::from(&state.require_mod(&query, kind)),
        None => LoadResult::from(&LoadStatus::NotFound),
    })
}

/// Append `path` to the platform library search variable.
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn modloader_add_library_search_path(path: *const c_char) -> bool {
    fault::contain_or(false, || {
        let Some(path) = read_c_str(path) else {
            return false;
        };
        match append_library_search_path(&path) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Rejected library search path");
                false
            }
        }
    })
}

/// Safe view of what the `modloader_get_*` path accessors return.
pub fn config_str(key: ConfigKey) -> &'static CStr {
    // SAFETY: `config_ptr` returns either a static literal or a pointer into
    // the installed state, which lives for the rest of the process.
    unsafe { CStr::from_ptr(config_ptr(key)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_library_search_path_rejects_null_and_empty() {
        assert!(!unsafe { modloader_add_library_search_path(std::ptr::null()) });
        assert!(!unsafe { modloader_add_library_search_path(c"".as_ptr()) });
    }

    #[test]
    fn test_free_null_pointers() {
        unsafe {
            modloader_free_results(std::ptr::null_mut());
            modloader_free_load_results(std::ptr::null_mut());
        }
    }

    #[test]
    fn test_free_zeroed_buffers() {
        let mut results = ModResults::empty();
        unsafe { modloader_free_results(&mut results) };
        unsafe { modloader_free_results(&mut results) };
        assert!(results.array.is_null());
    }
}
