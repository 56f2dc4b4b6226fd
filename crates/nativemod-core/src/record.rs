//! Load outcome records and the match rule used to look them up.

use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::binary::BinaryDescriptor;
use crate::error::Result;
use crate::native::NativeLibrary;

/// How a [`MatchQuery`] is compared against a record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Identifier, version string and numeric version all equal.
    Strict,
    /// Identifier equal.
    IdOnly,
    /// Identifier and version string equal.
    IdVersion,
    /// Identifier and numeric version equal.
    IdVersionLong,
    /// The record's full file path ends with the query identifier.
    ObjectName,
}

/// Lookup criteria for a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchQuery {
    pub id: String,
    pub version: String,
    pub version_long: u64,
}

impl MatchQuery {
    pub fn new(id: impl Into<String>, version: impl Into<String>, version_long: u64) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            version_long,
        }
    }

    /// Query that only carries an identifier.
    pub fn id(id: impl Into<String>) -> Self {
        Self::new(id, String::new(), 0)
    }
}

/// Language-level form of a record's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    NotFound,
    Failed(String),
    Loaded(PathBuf),
}

/// C strings handed out for a record through the ABI. Rebuilt after setup.
#[derive(Debug)]
pub(crate) struct InteropStrings {
    pub id: CString,
    pub version: CString,
    pub path: CString,
}

fn c_string(value: &str) -> CString {
    // Interior NULs cannot cross the boundary; truncate at the first one.
    let bytes = value.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    CString::new(&bytes[..end]).unwrap_or_default()
}

/// The tracked result of attempting to load one binary.
///
/// Exactly one of {library present, failure present} holds. Dropping a record
/// never closes its library; only [`LoadOutcome::close`] does.
pub struct LoadOutcome {
    descriptor: BinaryDescriptor,
    library: Option<Box<dyn NativeLibrary>>,
    failure: Option<String>,
    identifier: String,
    version: semver::Version,
    version_long: u64,
    created_at: DateTime<Utc>,
    interop: OnceCell<InteropStrings>,
}

impl LoadOutcome {
    /// Record a successfully opened binary.
    pub fn loaded(descriptor: BinaryDescriptor, library: Box<dyn NativeLibrary>) -> Self {
        Self::with_state(descriptor, Some(library), None)
    }

    /// Record a binary that failed to open.
    pub fn failed(descriptor: BinaryDescriptor, reason: impl Into<String>) -> Self {
        Self::with_state(descriptor, None, Some(reason.into()))
    }

    fn with_state(
        descriptor: BinaryDescriptor,
        library: Option<Box<dyn NativeLibrary>>,
        failure: Option<String>,
    ) -> Self {
        Self {
            identifier: descriptor.name().to_string(),
            descriptor,
            library,
            failure,
            version: semver::Version::new(0, 0, 0),
            version_long: 0,
            created_at: Utc::now(),
            interop: OnceCell::new(),
        }
    }

    pub fn descriptor(&self) -> &BinaryDescriptor {
        &self.descriptor
    }

    pub fn path(&self) -> &Path {
        self.descriptor.path()
    }

    pub fn is_loaded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn version(&self) -> &semver::Version {
        &self.version
    }

    pub fn version_long(&self) -> u64 {
        self.version_long
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The open library, if this record still holds one.
    pub fn library(&self) -> Option<&dyn NativeLibrary> {
        self.library.as_deref()
    }

    /// Raw platform handle, or null when failed or already unloaded.
    pub fn handle(&self) -> *mut c_void {
        self.library
            .as_ref()
            .map(|lib| lib.raw_handle())
            .unwrap_or(std::ptr::null_mut())
    }

    /// Copy identity reported by a `setup` call into the record.
    ///
    /// Returns `false` when `version` did not parse; the previous semantic
    /// version is kept in that case.
    pub fn apply_setup(&mut self, identifier: String, version: &str, version_long: u64) -> bool {
        self.identifier = identifier;
        self.version_long = version_long;
        self.interop = OnceCell::new();
        match semver::Version::parse(version) {
            Ok(parsed) => {
                self.version = parsed;
                true
            }
            Err(_) => false,
        }
    }

    /// Close the native library. The handle is never reused afterwards.
    pub fn close(&mut self) -> Result<()> {
        match self.library.take() {
            Some(library) => library.close(),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> LoadStatus {
        match &self.failure {
            Some(reason) => LoadStatus::Failed(reason.clone()),
            None => LoadStatus::Loaded(self.path().to_path_buf()),
        }
    }

    /// Apply the match rule for `kind`. All comparisons are ordinal.
    pub fn matches(&self, query: &MatchQuery, kind: MatchKind) -> bool {
        let id = self.identifier == query.id;
        match kind {
            MatchKind::Strict => {
                id && self.version.to_string() == query.version
                    && self.version_long == query.version_long
            }
            MatchKind::IdOnly => id,
            MatchKind::IdVersion => id && self.version.to_string() == query.version,
            MatchKind::IdVersionLong => id && self.version_long == query.version_long,
            MatchKind::ObjectName => self
                .path()
                .as_os_str()
                .to_string_lossy()
                .ends_with(query.id.as_str()),
        }
    }

    pub(crate) fn interop(&self) -> &InteropStrings {
        self.interop.get_or_init(|| InteropStrings {
            id: c_string(&self.identifier),
            version: c_string(&self.version.to_string()),
            path: c_string(&self.path().to_string_lossy()),
        })
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            identifier: self.identifier.clone(),
            version: self.version.to_string(),
            version_long: self.version_long,
            name: self.descriptor.name().to_string(),
            path: self.path().to_path_buf(),
            loaded: self.is_loaded(),
            failure: self.failure.clone(),
            dependencies: self.descriptor.dependencies().to_vec(),
            created_at: self.created_at,
        }
    }
}

impl Drop for LoadOutcome {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            std::mem::forget(library);
        }
    }
}

impl std::fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOutcome")
            .field("identifier", &self.identifier)
            .field("path", &self.path())
            .field("version", &self.version.to_string())
            .field("version_long", &self.version_long)
            .field("open", &self.library.is_some())
            .field("failure", &self.failure)
            .finish()
    }
}

/// Serializable snapshot of a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSummary {
    pub identifier: String,
    pub version: String,
    pub version_long: u64,
    pub name: String,
    pub path: PathBuf,
    pub loaded: bool,
    pub failure: Option<String>,
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
}
