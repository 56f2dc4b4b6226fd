//! On-disk binary descriptors.
//!
//! A [`BinaryDescriptor`] is the read-only view of one candidate library: its
//! absolute path, its display name and the library names it declares as
//! dependencies in its own metadata (`DT_NEEDED` for ELF, the import directory
//! for PE, `LC_LOAD_DYLIB` commands for Mach-O).

use std::path::{Path, PathBuf};

use goblin::mach::Mach;
use goblin::Object;
use tracing::debug;

use crate::error::{ModloaderError, Result};

/// Read-only metadata about one native binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryDescriptor {
    path: PathBuf,
    name: String,
    dependencies: Vec<String>,
}

impl BinaryDescriptor {
    /// Describe the binary at `path`, scanning its dependency table.
    ///
    /// Fails only if the file does not exist. An unreadable or malformed
    /// dependency section yields an empty dependency list.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = Self::absolute_existing(path.as_ref())?;
        let dependencies = scan_dependencies(&path);
        Ok(Self::from_parts(path, dependencies))
    }

    /// Describe the binary at `path` with an externally supplied dependency list.
    ///
    /// The file must still exist; no scan is performed.
    pub fn with_dependencies<I, S>(path: impl AsRef<Path>, dependencies: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path = Self::absolute_existing(path.as_ref())?;
        let dependencies = dependencies.into_iter().map(Into::into).collect();
        Ok(Self::from_parts(path, dependencies))
    }

    fn absolute_existing(path: &Path) -> Result<PathBuf> {
        if !path.exists() {
            return Err(ModloaderError::NotFound(path.display().to_string()));
        }
        Ok(std::path::absolute(path)?)
    }

    fn from_parts(path: PathBuf, dependencies: Vec<String>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            dependencies,
        }
    }

    /// Absolute path of the binary.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directory, e.g. `libfoo.so`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared dependency names in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Strip the final extension from a library name (`libfoo.so` -> `libfoo`).
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

#[derive(Debug, thiserror::Error)]
enum ScanError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] goblin::error::Error),
}

/// Scan a binary's declared dependencies. Never fails; errors yield an empty list.
pub fn scan_dependencies(path: &Path) -> Vec<String> {
    match read_declared_dependencies(path) {
        Ok(deps) => deps,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Dependency scan failed");
            Vec::new()
        }
    }
}

fn read_declared_dependencies(path: &Path) -> std::result::Result<Vec<String>, ScanError> {
    let bytes = std::fs::read(path)?;
    let names: Vec<&str> = match Object::parse(&bytes)? {
        Object::Elf(elf) => elf.libraries,
        Object::PE(pe) => pe.libraries,
        // The first entry of `libs` is the image itself.
        Object::Mach(Mach::Binary(macho)) => macho.libs.into_iter().skip(1).collect(),
        _ => Vec::new(),
    };
    Ok(names.into_iter().map(library_file_name).collect())
}

// Mach-O install names carry a path (`@rpath/libfoo.dylib`); keep the file name.
fn library_file_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}
