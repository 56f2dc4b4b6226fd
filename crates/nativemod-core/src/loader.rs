//! Directory loader.
//!
//! Enumerates a directory, describes and sorts the binaries found, then opens
//! each one in order. One binary failing to open never stops the batch; its
//! record carries the failure reason instead of a handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::binary::BinaryDescriptor;
use crate::error::{ModloaderError, Result};
use crate::fault;
use crate::native::{LibraryOpener, SystemOpener};
use crate::record::LoadOutcome;
use crate::sort::sort_by_dependencies;

/// Platform default filename pattern for native libraries.
pub const fn default_pattern() -> &'static str {
    if cfg!(target_os = "windows") {
        "*.dll"
    } else if cfg!(target_os = "macos") {
        "*.dylib"
    } else {
        "*.so"
    }
}

/// Enumerate files in `dir` whose file name matches `pattern`.
///
/// A missing directory yields an empty list. Results are sorted by path so
/// discovery order is stable across runs.
pub fn discover(dir: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    let pattern = glob::Pattern::new(pattern)?;

    if !dir.is_dir() {
        warn!(dir = %dir.display(), "Load directory does not exist, nothing to load");
        return Ok(Vec::new());
    }

    let matches = |path: &Path| {
        path.file_name()
            .map(|name| pattern.matches(&name.to_string_lossy()))
            .unwrap_or(false)
    };

    let mut files = Vec::new();
    if recursive {
        // Symlinked libraries count as files, same as the flat listing.
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| ModloaderError::DirectoryRead {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            if entry.file_type().is_file() && matches(entry.path()) {
                files.push(entry.into_path());
            }
        }
    } else {
        let entries = std::fs::read_dir(dir).map_err(|source| ModloaderError::DirectoryRead {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| ModloaderError::DirectoryRead {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && matches(&path) {
                files.push(path);
            }
        }
        files.sort();
    }

    debug!(dir = %dir.display(), count = files.len(), "Discovered binaries");
    Ok(files)
}

/// Discover and describe every matching binary in `dir`.
///
/// Enumeration errors are returned. A file that cannot be described is
/// skipped; the rest of the batch is still described.
pub fn describe(dir: &Path, pattern: &str, recursive: bool) -> Result<Vec<BinaryDescriptor>> {
    Ok(describe_paths(discover(dir, pattern, recursive)?))
}

/// Describe each path, logging and skipping the ones that fail.
pub fn describe_paths(paths: impl IntoIterator<Item = PathBuf>) -> Vec<BinaryDescriptor> {
    paths
        .into_iter()
        .filter_map(|path| match BinaryDescriptor::new(&path) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping binary");
                None
            }
        })
        .collect()
}

/// Loads batches of binaries and keeps their records.
pub struct ModLoader {
    opener: Arc<dyn LibraryOpener>,
    outcomes: Vec<LoadOutcome>,
}

impl ModLoader {
    /// Loader backed by the platform dynamic loader.
    pub fn new() -> Self {
        Self::with_opener(Arc::new(SystemOpener))
    }

    pub fn with_opener(opener: Arc<dyn LibraryOpener>) -> Self {
        Self {
            opener,
            outcomes: Vec::new(),
        }
    }

    /// Load every binary in `dir` matching `pattern`, in dependency order.
    ///
    /// Replaces the previous records. Handles held by those records are not
    /// closed; call [`ModLoader::unload_all`] first to release them.
    pub fn load_directory(
        &mut self,
        dir: &Path,
        pattern: &str,
        recursive: bool,
    ) -> Result<&mut [LoadOutcome]> {
        let descriptors = describe(dir, pattern, recursive)?;
        info!(dir = %dir.display(), count = descriptors.len(), "Loading binaries");
        Ok(self.load_descriptors(descriptors))
    }

    /// Sort and open an already described batch.
    pub fn load_descriptors(&mut self, descriptors: Vec<BinaryDescriptor>) -> &mut [LoadOutcome] {
        let sorted = sort_by_dependencies(descriptors);
        let outcomes = sorted
            .into_iter()
            .map(|descriptor| self.open_one(descriptor))
            .collect();
        self.outcomes = outcomes;
        &mut self.outcomes
    }

    fn open_one(&self, descriptor: BinaryDescriptor) -> LoadOutcome {
        match fault::contain(|| self.opener.open(descriptor.path())) {
            Ok(Ok(library)) => {
                info!(binary = %descriptor.name(), "Loaded binary");
                LoadOutcome::loaded(descriptor, library)
            }
            Ok(Err(e)) => {
                warn!(binary = %descriptor.name(), error = %e, "Failed to load binary");
                LoadOutcome::failed(descriptor, e.to_string())
            }
            Err(panic) => {
                warn!(binary = %descriptor.name(), error = %panic, "Fault while loading binary");
                LoadOutcome::failed(descriptor, panic)
            }
        }
    }

    pub fn outcomes(&self) -> &[LoadOutcome] {
        &self.outcomes
    }

    /// Hand the records to another owner, leaving this loader empty.
    pub fn take_outcomes(&mut self) -> Vec<LoadOutcome> {
        std::mem::take(&mut self.outcomes)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Close every open handle, then drop every record.
    pub fn unload_all(&mut self) {
        for record in self.outcomes.iter_mut().filter(|r| r.is_loaded()) {
            if let Err(e) = record.close() {
                warn!(binary = %record.descriptor().name(), error = %e, "Failed to close binary");
            }
        }
        self.outcomes.clear();
    }

    /// Drop every record without closing handles. Open libraries stay mapped.
    pub fn clear(&mut self) {
        self.outcomes.clear();
    }
}

impl Default for ModLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModLoader")
            .field("outcomes", &self.outcomes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_is_empty() {
        let files = discover(Path::new("/nonexistent/mods"), "*.so", false).unwrap();
        assert!(files.is_empty());

        let mut loader = ModLoader::new();
        let outcomes = loader
            .load_directory(Path::new("/nonexistent/mods"), "*.so", false)
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["libz.so", "liba.so", "readme.txt", "libm.so"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("libn.so"), b"").unwrap();

        let flat = discover(dir.path(), "*.so", false).unwrap();
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["liba.so", "libm.so", "libz.so"]);

        let deep = discover(dir.path(), "*.so", true).unwrap();
        assert_eq!(deep.len(), 4);
    }

    #[test]
    fn test_vanished_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("liba.so"), b"").unwrap();
        std::fs::write(dir.path().join("libc.so"), b"").unwrap();

        let descriptors = describe_paths([
            dir.path().join("liba.so"),
            dir.path().join("libb.so"),
            dir.path().join("libc.so"),
        ]);
        let names: Vec<_> = descriptors.iter().map(|d| d.name()).collect();
        assert_eq!(names, ["liba.so", "libc.so"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_found_in_both_modes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.bin");
        std::fs::write(&target, b"").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("liblink.so")).unwrap();

        let flat = discover(dir.path(), "*.so", false).unwrap();
        let deep = discover(dir.path(), "*.so", true).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(deep, flat);
    }

    #[test]
    fn test_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover(dir.path(), "[", false);
        assert!(matches!(result, Err(ModloaderError::InvalidPattern(_))));
    }

    #[test]
    fn test_unloadable_files_become_failed_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libjunk.so"), b"junk").unwrap();
        std::fs::write(dir.path().join("libnoise.so"), b"noise").unwrap();

        let mut loader = ModLoader::new();
        let outcomes = loader.load_directory(dir.path(), "*.so", false).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.is_loaded()));
        assert!(outcomes.iter().all(|o| o.failure().is_some()));
        assert!(outcomes.iter().all(|o| o.handle().is_null()));
    }
}
