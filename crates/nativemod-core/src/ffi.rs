//! Fixed-layout structures shared with foreign code.
//!
//! These mirror the C headers the native modloader ecosystem compiles
//! against. Everything here is `#[repr(C)]`; conversion to and from the
//! crate's own types happens at this boundary only.

use std::ffi::{c_char, c_void, CStr, CString};

use crate::record::{LoadOutcome, LoadStatus, MatchKind, MatchQuery};

/// Capacity of the inline text payload of a [`LoadResult`], NUL included.
pub const LOAD_RESULT_PAYLOAD_LEN: usize = 512;

/// Identity of a mod: query input, and `setup`'s output parameter.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ModInfo {
    pub id: *const c_char,
    pub version: *const c_char,
    pub version_long: u64,
}

impl Default for ModInfo {
    fn default() -> Self {
        Self {
            id: std::ptr::null(),
            version: std::ptr::null(),
            version_long: 0,
        }
    }
}

impl ModInfo {
    /// Read the fields into an owned query. Null strings read as empty.
    ///
    /// # Safety
    /// Non-null string pointers must reference NUL-terminated strings.
    pub unsafe fn to_query(&self) -> MatchQuery {
        MatchQuery {
            id: read_c_str(self.id).unwrap_or_default(),
            version: read_c_str(self.version).unwrap_or_default(),
            version_long: self.version_long,
        }
    }
}

/// Copy a C string, or `None` for a null pointer.
///
/// # Safety
/// A non-null `ptr` must reference a NUL-terminated string.
pub unsafe fn read_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// A matched record: identity, path and native handle.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ModResult {
    pub info: ModInfo,
    pub path: *const c_char,
    pub handle: *mut c_void,
}

impl Default for ModResult {
    fn default() -> Self {
        Self {
            info: ModInfo::default(),
            path: std::ptr::null(),
            handle: std::ptr::null_mut(),
        }
    }
}

impl ModResult {
    /// Borrow the record's strings. Valid while the record stays registered.
    pub(crate) fn borrowed(record: &LoadOutcome) -> Self {
        let strings = record.interop();
        Self {
            info: ModInfo {
                id: strings.id.as_ptr(),
                version: strings.version.as_ptr(),
                version_long: record.version_long(),
            },
            path: strings.path.as_ptr(),
            handle: record.handle(),
        }
    }

    /// Duplicate the record's strings so the result outlives the record.
    /// Released by [`ModResult::release_owned`].
    pub(crate) fn owned(record: &LoadOutcome) -> Self {
        let strings = record.interop();
        Self {
            info: ModInfo {
                id: strings.id.clone().into_raw(),
                version: strings.version.clone().into_raw(),
                version_long: record.version_long(),
            },
            path: strings.path.clone().into_raw(),
            handle: record.handle(),
        }
    }

    /// Free strings allocated by [`ModResult::owned`].
    ///
    /// # Safety
    /// Must be called at most once, on a result produced by `owned`.
    pub(crate) unsafe fn release_owned(self) {
        for ptr in [self.info.id, self.info.version, self.path] {
            if !ptr.is_null() {
                drop(CString::from_raw(ptr as *mut c_char));
            }
        }
    }

    pub fn is_null(&self) -> bool {
        self.handle.is_null() && self.path.is_null()
    }
}

/// Externally owned buffer of results. Release exactly once through the
/// matching free function; release zeroes the buffer.
#[repr(C)]
#[derive(Debug)]
pub struct ResultArray<T> {
    pub array: *mut T,
    pub size: usize,
}

pub type ModResults = ResultArray<ModResult>;
pub type LoadResults = ResultArray<LoadResult>;

impl<T> ResultArray<T> {
    pub fn empty() -> Self {
        Self {
            array: std::ptr::null_mut(),
            size: 0,
        }
    }

    /// Transfer ownership of `items` into a raw buffer.
    pub fn from_vec(items: Vec<T>) -> Self {
        if items.is_empty() {
            return Self::empty();
        }
        let boxed = items.into_boxed_slice();
        let size = boxed.len();
        Self {
            array: Box::into_raw(boxed) as *mut T,
            size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_null() || self.size == 0
    }

    /// View the elements.
    ///
    /// # Safety
    /// The buffer must have been produced by [`ResultArray::from_vec`] and not released.
    pub unsafe fn as_slice(&self) -> &[T] {
        if self.is_empty() {
            return &[];
        }
        std::slice::from_raw_parts(self.array, self.size)
    }

    /// Take the buffer back and zero this handle. `None` if already zeroed.
    ///
    /// # Safety
    /// The buffer must have been produced by [`ResultArray::from_vec`].
    pub unsafe fn take(&mut self) -> Option<Box<[T]>> {
        if self.array.is_null() {
            self.size = 0;
            return None;
        }
        let slice = std::ptr::slice_from_raw_parts_mut(self.array, self.size);
        self.array = std::ptr::null_mut();
        self.size = 0;
        Some(Box::from_raw(slice))
    }
}

/// Discriminant of a [`LoadResult`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResultTag {
    NotFound = 0,
    Failed = 1,
    Loaded = 2,
}

/// Tagged load state with an inline text payload: the path when `Loaded`,
/// the failure message when `Failed`, zeroed when `NotFound`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct LoadResult {
    pub tag: LoadResultTag,
    pub payload: [c_char; LOAD_RESULT_PAYLOAD_LEN],
}

impl LoadResult {
    pub fn not_found() -> Self {
        Self {
            tag: LoadResultTag::NotFound,
            payload: [0; LOAD_RESULT_PAYLOAD_LEN],
        }
    }

    fn with_text(tag: LoadResultTag, text: &str) -> Self {
        let mut result = Self {
            tag,
            payload: [0; LOAD_RESULT_PAYLOAD_LEN],
        };
        let mut end = text.len().min(LOAD_RESULT_PAYLOAD_LEN - 1);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        for (slot, byte) in result.payload.iter_mut().zip(&text.as_bytes()[..end]) {
            *slot = *byte as c_char;
        }
        result
    }

    /// Payload text up to the first NUL.
    pub fn payload_str(&self) -> String {
        let bytes: Vec<u8> = self
            .payload
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl From<&LoadStatus> for LoadResult {
    fn from(status: &LoadStatus) -> Self {
        match status {
            LoadStatus::NotFound => Self::not_found(),
            LoadStatus::Failed(reason) => Self::with_text(LoadResultTag::Failed, reason),
            LoadStatus::Loaded(path) => {
                Self::with_text(LoadResultTag::Loaded, &path.to_string_lossy())
            }
        }
    }
}

impl std::fmt::Debug for LoadResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadResult")
            .field("tag", &self.tag)
            .field("payload", &self.payload_str())
            .finish()
    }
}

/// Which lifecycle batch the orchestrating caller has reached.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LoadPhase {
    #[default]
    None = 0,
    Libs = 1,
    EarlyMods = 2,
    Mods = 3,
}

impl LoadPhase {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => LoadPhase::Libs,
            2 => LoadPhase::EarlyMods,
            3 => LoadPhase::Mods,
            _ => LoadPhase::None,
        }
    }
}

impl MatchKind {
    /// Decode a match type received from foreign code.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(MatchKind::Strict),
            1 => Some(MatchKind::IdOnly),
            2 => Some(MatchKind::IdVersion),
            3 => Some(MatchKind::IdVersionLong),
            4 => Some(MatchKind::ObjectName),
            _ => None,
        }
    }
}
