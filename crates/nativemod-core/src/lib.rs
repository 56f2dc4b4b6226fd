//! Native modloader core.
//!
//! Discovers native binaries in a directory, orders them by their declared
//! dependencies, opens them, runs their optional `setup`/`load`/`late_load`
//! entry points, and exposes the resulting registry to foreign code through a
//! C ABI.

pub mod abi;
pub mod binary;
pub mod config;
pub mod error;
pub mod fault;
pub mod ffi;
pub mod lifecycle;
pub mod loader;
pub mod native;
pub mod record;
pub mod sort;
pub mod startup;

pub use abi::{AbiState, ConfigKey};
pub use binary::BinaryDescriptor;
pub use config::LoaderConfig;
pub use error::{ModloaderError, Result};
pub use ffi::{LoadPhase, LoadResult, LoadResultTag, ModInfo, ModResult, ResultArray};
pub use loader::ModLoader;
pub use native::{LibraryOpener, NativeLibrary, SystemOpener};
pub use record::{LoadOutcome, LoadStatus, MatchKind, MatchQuery, RecordSummary};
pub use startup::{Startup, StartupReport};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::abi::{AbiState, ConfigKey};
    pub use crate::binary::BinaryDescriptor;
    pub use crate::config::{env_vars, LoaderConfig};
    pub use crate::error::{ModloaderError, Result};
    pub use crate::lifecycle::{LifecycleReport, LifecycleStats, StepOutcome};
    pub use crate::loader::{default_pattern, ModLoader};
    pub use crate::native::{LibraryOpener, NativeLibrary};
    pub use crate::record::{LoadOutcome, LoadStatus, MatchKind, MatchQuery};
    pub use crate::sort::{sort_by_dependencies, validate_dependencies};
    pub use crate::startup::{Startup, StartupReport};
}
