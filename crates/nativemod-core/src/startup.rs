//! Three-phase startup: `libs`, then `early_mods`, then `mods`.
//!
//! Each phase loads one directory under the root load path and registers its
//! records with an [`AbiState`]. Library batches get no lifecycle calls. Mod
//! batches run `setup` then `load` before they are registered; `late_load`
//! runs once at the end across early mods and mods together.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::abi::AbiState;
use crate::config::LoaderConfig;
use crate::error::Result;
use crate::ffi::LoadPhase;
use crate::lifecycle::{self, LifecycleStats, LATE_LOAD_SYMBOL};
use crate::loader::ModLoader;
use crate::native::{append_library_search_path, LibraryOpener, SystemOpener};
use crate::record::LoadOutcome;
use crate::sort::validate_dependencies_with;

/// Counts for one phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseReport {
    pub dir: PathBuf,
    pub loaded: usize,
    pub failed: usize,
    pub setup_called: usize,
    pub load_called: usize,
    pub faults: usize,
    pub diagnostics: Vec<String>,
}

impl PhaseReport {
    fn from_batch(dir: &Path, batch: &[LoadOutcome], diagnostics: Vec<String>) -> Self {
        let loaded = batch.iter().filter(|r| r.is_loaded()).count();
        Self {
            dir: dir.to_path_buf(),
            loaded,
            failed: batch.len() - loaded,
            diagnostics,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    pub libs: PhaseReport,
    pub early_mods: PhaseReport,
    pub mods: PhaseReport,
    pub late_load_called: usize,
    pub late_load_faults: usize,
}

impl StartupReport {
    pub fn diagnostics(&self) -> impl Iterator<Item = &str> {
        self.libs
            .diagnostics
            .iter()
            .chain(&self.early_mods.diagnostics)
            .chain(&self.mods.diagnostics)
            .map(String::as_str)
    }
}

/// Drives a full startup against one [`AbiState`].
pub struct Startup {
    config: LoaderConfig,
    opener: Arc<dyn LibraryOpener>,
}

impl Startup {
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_opener(config, Arc::new(SystemOpener))
    }

    pub fn with_opener(config: LoaderConfig, opener: Arc<dyn LibraryOpener>) -> Self {
        Self { config, opener }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Run every phase. Only directory enumeration and descriptor errors are
    /// returned; per-binary failures end up in the registry.
    pub fn run(&self, state: &AbiState) -> Result<StartupReport> {
        state.configure(&self.config);
        let mut report = StartupReport::default();

        state.set_phase(LoadPhase::Libs);
        let libs_dir = self.config.libs_path();
        if libs_dir.is_dir() {
            if let Err(e) = append_library_search_path(&libs_dir.to_string_lossy()) {
                warn!(dir = %libs_dir.display(), error = %e, "Could not extend library search path");
            }
        }
        let libs = self.open_batch(&libs_dir)?;
        report.libs = self.finish_batch(state, &libs_dir, libs, None);
        state.mark_libs_opened();

        state.set_phase(LoadPhase::EarlyMods);
        let early_dir = self.config.early_mods_path();
        let mut early = self.open_batch(&early_dir)?;
        let early_paths = paths_of(&early);
        let stats = lifecycle_batch(&mut early);
        report.early_mods = self.finish_batch(state, &early_dir, early, Some(stats));
        state.mark_early_mods_opened();

        state.set_phase(LoadPhase::Mods);
        let mods_dir = self.config.mods_path();
        let mut mods = self.open_batch(&mods_dir)?;
        let mut late_set = paths_of(&mods);
        late_set.extend(early_paths);
        let stats = lifecycle_batch(&mut mods);
        report.mods = self.finish_batch(state, &mods_dir, mods, Some(stats));

        let late_paths: Vec<PathBuf> = state.with_records(|records| {
            records
                .iter()
                .filter(|r| late_set.contains(r.path()))
                .map(|r| r.path().to_path_buf())
                .collect()
        });
        // Each call is resolved under the lock just before it runs, so a mod
        // unloaded by an earlier late_load is skipped.
        let late = lifecycle::invoke_prepared(late_paths.iter().map(|path| {
            state
                .with_records(|records| {
                    records
                        .iter()
                        .find(|r| r.path() == path.as_path())
                        .map(|r| lifecycle::prepare(LATE_LOAD_SYMBOL, r))
                })
                .unwrap_or_else(|| {
                    debug!(path = %path.display(), "Unloaded before late_load, skipping");
                    Ok(None)
                })
        }));
        report.late_load_called = late.called;
        report.late_load_faults = late.faulted;
        state.mark_late_mods_opened();

        info!(
            libs = report.libs.loaded,
            early_mods = report.early_mods.loaded,
            mods = report.mods.loaded,
            registered = state.len(),
            "Startup complete"
        );
        Ok(report)
    }

    fn open_batch(&self, dir: &Path) -> Result<Vec<LoadOutcome>> {
        let mut loader = ModLoader::with_opener(Arc::clone(&self.opener));
        loader.load_directory(dir, &self.config.pattern, self.config.recursive)?;
        Ok(loader.take_outcomes())
    }

    fn finish_batch(
        &self,
        state: &AbiState,
        dir: &Path,
        batch: Vec<LoadOutcome>,
        stats: Option<(LifecycleStats, LifecycleStats)>,
    ) -> PhaseReport {
        let available: Vec<String> = state.with_records(|records| {
            records
                .iter()
                .filter(|r| r.is_loaded())
                .map(|r| r.identifier().to_string())
                .collect()
        });
        let diagnostics = validate_dependencies_with(&batch, &available);
        for diagnostic in &diagnostics {
            warn!(dir = %dir.display(), "{}", diagnostic);
        }

        let mut report = PhaseReport::from_batch(dir, &batch, diagnostics);
        if let Some((setup, load)) = stats {
            report.setup_called = setup.called;
            report.load_called = load.called;
            report.faults = setup.faulted + load.faulted;
        }
        state.register_all(batch);
        report
    }
}

fn paths_of(batch: &[LoadOutcome]) -> HashSet<PathBuf> {
    batch.iter().map(|r| r.path().to_path_buf()).collect()
}

fn lifecycle_batch(batch: &mut [LoadOutcome]) -> (LifecycleStats, LifecycleStats) {
    let setup = lifecycle::setup_all(batch);
    let load = lifecycle::load_all(batch);
    (setup, load)
}
