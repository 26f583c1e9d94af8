//! Settings loading from the environment, with `.env` override.
//!
//! Values come from the process environment merged over an optional `.env`
//! file in the working directory. Keys are matched case-insensitively and
//! unrecognised keys are ignored. Validation failures are fatal at startup.
//!
//! # Module layout
//!
//! - **types** — resolved settings structs (`Settings`, `WorkerConfig`, …).
//! - **raw** — environment collection (`RawEnv`) and default values.
//! - **load** — parsing and validation: `load`, `load_from`, `expand_home`.
//!
//! [`get`] caches the first successful load for the life of the process.

mod load;
mod raw;
mod types;

use std::sync::OnceLock;

pub use load::{DEFAULT_ENV_FILE, expand_home, load, load_from};
pub use raw::RawEnv;
pub use types::*;

use crate::error::AppError;

/// A write-once settings slot.
///
/// The first successful load wins; later calls hand back the same value
/// without running the loader again. A failed load leaves the slot empty.
pub struct SettingsCache {
    cell: OnceLock<Settings>,
}

impl SettingsCache {
    pub const fn new() -> Self {
        Self { cell: OnceLock::new() }
    }

    pub fn get_or_load<F>(&self, loader: F) -> Result<&Settings, AppError>
    where
        F: FnOnce() -> Result<Settings, AppError>,
    {
        if let Some(settings) = self.cell.get() {
            return Ok(settings);
        }
        let loaded = loader()?;
        // Two racing first calls both load; only one value is kept.
        Ok(self.cell.get_or_init(|| loaded))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new()
    }
}

static SETTINGS: SettingsCache = SettingsCache::new();

/// Process-wide settings, loaded from `.env` + environment on first call.
pub fn get() -> Result<&'static Settings, AppError> {
    SETTINGS.get_or_load(|| load(None))
}
