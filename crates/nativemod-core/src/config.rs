//! Loader configuration.
//!
//! Values come from a TOML file, from `NATIVEMOD_*` environment variables, or
//! from the defaults below. The ABI layer copies the path and application id
//! strings once at startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ModloaderError, Result};

/// Default directory names under the root load path.
pub mod dirs {
    pub const LIBS: &str = "libs";
    pub const EARLY_MODS: &str = "early_mods";
    pub const MODS: &str = "mods";
}

/// Environment variable names.
pub mod env_vars {
    pub const ROOT: &str = "NATIVEMOD_ROOT";
    pub const MODLOADER_PATH: &str = "NATIVEMOD_MODLOADER_PATH";
    pub const SOURCE_PATH: &str = "NATIVEMOD_SOURCE_PATH";
    pub const FILES_DIR: &str = "NATIVEMOD_FILES_DIR";
    pub const EXTERNAL_DIR: &str = "NATIVEMOD_EXTERNAL_DIR";
    pub const APP_ID: &str = "NATIVEMOD_APP_ID";
    pub const PATTERN: &str = "NATIVEMOD_PATTERN";
    pub const RECURSIVE: &str = "NATIVEMOD_RECURSIVE";
    /// Set to `true` for JSON log output in the CLI.
    pub const LOG_JSON: &str = "NATIVEMOD_LOG_JSON";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directory containing the `libs`, `early_mods` and `mods` folders.
    pub root_load_path: PathBuf,
    /// Path of the modloader binary itself.
    pub modloader_path: PathBuf,
    /// Path the modloader was installed from.
    pub source_path: PathBuf,
    /// Application-private files directory.
    pub files_dir: PathBuf,
    /// Application external storage directory.
    pub external_dir: PathBuf,
    pub application_id: String,
    pub libs_dir: String,
    pub early_mods_dir: String,
    pub mods_dir: String,
    /// Filename glob for candidate binaries.
    pub pattern: String,
    pub recursive: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root_load_path: PathBuf::new(),
            modloader_path: PathBuf::new(),
            source_path: PathBuf::new(),
            files_dir: PathBuf::new(),
            external_dir: PathBuf::new(),
            application_id: String::new(),
            libs_dir: dirs::LIBS.to_string(),
            early_mods_dir: dirs::EARLY_MODS.to_string(),
            mods_dir: dirs::MODS.to_string(),
            pattern: crate::loader::default_pattern().to_string(),
            recursive: false,
        }
    }
}

impl LoaderConfig {
    pub fn new(root_load_path: impl Into<PathBuf>) -> Self {
        Self {
            root_load_path: root_load_path.into(),
            ..Default::default()
        }
    }

    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = id.into();
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read a TOML file. Relative directories resolve against the file's parent.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ModloaderError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            if config.root_load_path.is_relative() {
                config.root_load_path = base.join(&config.root_load_path);
            }
        }
        Ok(config)
    }

    /// Defaults overridden by any `NATIVEMOD_*` variables that are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(v) = var(env_vars::ROOT) {
            config.root_load_path = v.into();
        }
        if let Some(v) = var(env_vars::MODLOADER_PATH) {
            config.modloader_path = v.into();
        }
        if let Some(v) = var(env_vars::SOURCE_PATH) {
            config.source_path = v.into();
        }
        if let Some(v) = var(env_vars::FILES_DIR) {
            config.files_dir = v.into();
        }
        if let Some(v) = var(env_vars::EXTERNAL_DIR) {
            config.external_dir = v.into();
        }
        if let Some(v) = var(env_vars::APP_ID) {
            config.application_id = v;
        }
        if let Some(v) = var(env_vars::PATTERN) {
            config.pattern = v;
        }
        if let Some(v) = var(env_vars::RECURSIVE).and_then(|v| v.parse().ok()) {
            config.recursive = v;
        }
        config
    }

    pub fn libs_path(&self) -> PathBuf {
        self.root_load_path.join(&self.libs_dir)
    }

    pub fn early_mods_path(&self) -> PathBuf {
        self.root_load_path.join(&self.early_mods_dir)
    }

    pub fn mods_path(&self) -> PathBuf {
        self.root_load_path.join(&self.mods_dir)
    }
}
