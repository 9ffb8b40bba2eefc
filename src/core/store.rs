//! Store handle for the registry's state.
//!
//! A store root holds one SQLite database, the broker audit log, and an
//! optional `harbor.toml`. Every registry, agreement, and adoption operation is
//! scoped to a store.

use crate::core::config::{self, HarborConfig};
use crate::core::error::HarborError;
use crate::core::schemas;
use std::fs;
use std::path::{Path, PathBuf};

/// Store handle representing one registry deployment.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
    /// Configuration loaded from `harbor.toml` (defaults when absent)
    pub config: HarborConfig,
}

impl Store {
    /// Open a store rooted at `root`, creating the directory and schema if needed.
    pub fn open(root: &Path) -> Result<Self, HarborError> {
        let config = config::load_config(root)?;
        Self::open_with_config(root, config)
    }

    pub fn open_with_config(root: &Path, config: HarborConfig) -> Result<Self, HarborError> {
        config.validate()?;
        fs::create_dir_all(root).map_err(HarborError::IoError)?;
        let store = Store {
            root: root.to_path_buf(),
            config,
        };
        crate::core::db::initialize_harbor_db(&store.root)?;
        Ok(store)
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(schemas::HARBOR_DB_NAME)
    }
}
