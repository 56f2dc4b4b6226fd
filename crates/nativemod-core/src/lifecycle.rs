//! Lifecycle invocation: `setup`, `load` and `late_load`.
//!
//! Each entry point is optional and resolved by name. Calls are synchronous
//! on the calling thread. Across a batch, every `setup` runs before any
//! `load`, and every `load` before any `late_load`.

use std::ffi::c_void;

use tracing::{debug, warn};

use crate::error::{ModloaderError, Result};
use crate::fault;
use crate::ffi::{read_c_str, ModInfo};
use crate::record::LoadOutcome;

pub const SETUP_SYMBOL: &str = "setup";
pub const LOAD_SYMBOL: &str = "load";
pub const LATE_LOAD_SYMBOL: &str = "late_load";

/// `void setup(CModInfo*)`
pub type SetupFn = unsafe extern "C" fn(info: *mut ModInfo);
/// `void load()` / `void late_load()`
pub type LoadFn = unsafe extern "C" fn();

/// What happened to one lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Called,
    /// The binary does not export the entry point, or is not loaded.
    Skipped,
}

/// Per-step counts over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    pub called: usize,
    pub skipped: usize,
    pub faulted: usize,
}

impl LifecycleStats {
    fn record(&mut self, result: &Result<StepOutcome>) {
        match result {
            Ok(StepOutcome::Called) => self.called += 1,
            Ok(StepOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.faulted += 1,
        }
    }
}

/// Stats for all three steps of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    pub setup: LifecycleStats,
    pub load: LifecycleStats,
    pub late_load: LifecycleStats,
}

fn lifecycle_fault(step: &'static str, record: &LoadOutcome, message: String) -> ModloaderError {
    ModloaderError::LifecycleFault {
        step,
        binary: record.descriptor().name().to_string(),
        message,
    }
}

/// Call `setup` on one record and copy the reported identity into it.
pub fn setup(record: &mut LoadOutcome) -> Result<StepOutcome> {
    let Some(library) = record.library() else {
        return Ok(StepOutcome::Skipped);
    };
    let symbol = fault::contain(|| library.symbol(SETUP_SYMBOL))
        .map_err(|m| lifecycle_fault(SETUP_SYMBOL, record, m))?;
    let Some(address) = symbol else {
        debug!(binary = %record.descriptor().name(), "No setup entry point");
        return Ok(StepOutcome::Skipped);
    };

    // SAFETY: modloader binaries export `setup` with the `SetupFn` signature.
    let entry: SetupFn = unsafe { std::mem::transmute::<*const c_void, SetupFn>(address) };

    let reported = fault::contain(|| {
        let strings = record.interop();
        let mut info = ModInfo {
            id: strings.id.as_ptr(),
            version: strings.version.as_ptr(),
            version_long: record.version_long(),
        };
        // SAFETY: `info` outlives the call; the callee may repoint its strings.
        unsafe { entry(&mut info) };
        // SAFETY: returned pointers reference NUL-terminated strings owned by
        // the callee or by `strings`, both alive here.
        unsafe { copy_reported(&info) }
    })
    .map_err(|m| lifecycle_fault(SETUP_SYMBOL, record, m))?;

    let (id, version, version_long) = reported;
    let id = id.unwrap_or_else(|| record.identifier().to_string());
    let version = version.unwrap_or_default();
    if !record.apply_setup(id, &version, version_long) {
        warn!(
            binary = %record.descriptor().name(),
            version = %version,
            "Setup reported an unparseable version, keeping {}",
            record.version()
        );
    }
    debug!(binary = %record.descriptor().name(), id = %record.identifier(), "Setup complete");
    Ok(StepOutcome::Called)
}

unsafe fn copy_reported(info: &ModInfo) -> (Option<String>, Option<String>, u64) {
    (
        read_c_str(info.id),
        read_c_str(info.version),
        info.version_long,
    )
}

/// A resolved argument-less entry point, detached from its record.
///
/// Lets the caller release any lock on the registry before running foreign
/// code. The library must stay open until [`PreparedCall::invoke`] returns;
/// resolve each call right before invoking it when earlier calls may unload
/// libraries.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    binary: String,
    step: &'static str,
    entry: LoadFn,
}

impl PreparedCall {
    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn step(&self) -> &'static str {
        self.step
    }

    pub fn invoke(self) -> Result<StepOutcome> {
        let entry = self.entry;
        fault::contain(|| unsafe { entry() }).map_err(|message| ModloaderError::LifecycleFault {
            step: self.step,
            binary: self.binary.clone(),
            message,
        })?;
        debug!(binary = %self.binary, step = self.step, "Entry point returned");
        Ok(StepOutcome::Called)
    }
}

/// Resolve `step` on `record` without calling it. `None` means skip.
pub fn prepare(step: &'static str, record: &LoadOutcome) -> Result<Option<PreparedCall>> {
    let Some(library) = record.library() else {
        return Ok(None);
    };
    let symbol = fault::contain(|| library.symbol(step)).map_err(|m| lifecycle_fault(step, record, m))?;
    let Some(address) = symbol else {
        debug!(binary = %record.descriptor().name(), step, "No entry point");
        return Ok(None);
    };

    // SAFETY: `load` and `late_load` take no arguments and return nothing.
    let entry: LoadFn = unsafe { std::mem::transmute::<*const c_void, LoadFn>(address) };
    Ok(Some(PreparedCall {
        binary: record.descriptor().name().to_string(),
        step,
        entry,
    }))
}

fn trigger(step: &'static str, record: &LoadOutcome) -> Result<StepOutcome> {
    match prepare(step, record)? {
        Some(call) => call.invoke(),
        None => Ok(StepOutcome::Skipped),
    }
}

/// Call `load` on one record.
pub fn load(record: &LoadOutcome) -> Result<StepOutcome> {
    trigger(LOAD_SYMBOL, record)
}

/// Call `late_load` on one record.
pub fn late_load(record: &LoadOutcome) -> Result<StepOutcome> {
    trigger(LATE_LOAD_SYMBOL, record)
}

fn log_fault(result: &Result<StepOutcome>) {
    if let Err(e) = result {
        warn!(error = %e, "Lifecycle call faulted, continuing with batch");
    }
}

/// Run `setup` for every record in order.
pub fn setup_all(records: &mut [LoadOutcome]) -> LifecycleStats {
    let mut stats = LifecycleStats::default();
    for record in records.iter_mut() {
        let result = setup(record);
        log_fault(&result);
        stats.record(&result);
    }
    stats
}

/// Run `load` for every record in order.
pub fn load_all(records: &[LoadOutcome]) -> LifecycleStats {
    let mut stats = LifecycleStats::default();
    for record in records {
        let result = load(record);
        log_fault(&result);
        stats.record(&result);
    }
    stats
}

/// Run `late_load` for every record in order.
pub fn late_load_all(records: &[LoadOutcome]) -> LifecycleStats {
    let mut stats = LifecycleStats::default();
    for record in records {
        let result = late_load(record);
        log_fault(&result);
        stats.record(&result);
    }
    stats
}

/// Invoke calls resolved with [`prepare`], in order.
///
/// `calls` is pulled one item at a time, so a lazy iterator resolves each
/// call only after the previous one has returned.
pub fn invoke_prepared(
    calls: impl IntoIterator<Item = Result<Option<PreparedCall>>>,
) -> LifecycleStats {
    let mut stats = LifecycleStats::default();
    for call in calls {
        let result = call.and_then(|call| match call {
            Some(call) => call.invoke(),
            None => Ok(StepOutcome::Skipped),
        });
        log_fault(&result);
        stats.record(&result);
    }
    stats
}

/// Run all three steps over a batch with a barrier between each.
pub fn run_all(records: &mut [LoadOutcome]) -> LifecycleReport {
    let setup = setup_all(records);
    let load = load_all(records);
    let late_load = late_load_all(records);
    LifecycleReport {
        setup,
        load,
        late_load,
    }
}
