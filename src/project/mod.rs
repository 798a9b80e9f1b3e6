//! Project resolution
//!
//! A project is one explicit root directory holding the mapping document,
//! the credentials document, the token cache and the `src/` working tree.
//! It is resolved once and handed to every component.

pub mod credentials;
pub mod mapping;

pub use credentials::{AuthMode, Credentials};
pub use mapping::{Mapping, MappingShape, MappingStore, TableConfig};

use crate::config::{
    ENV_FILE_NAME, MAPPING_FILE_NAME, SOURCE_DIRECTORY, TOKEN_CACHE_FILE_NAME,
};
use crate::error::{errors, SnResult};
use std::path::{Path, PathBuf};

/// Mapping plus the filesystem layout of one project
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    src_dir: PathBuf,
    mapping: Mapping,
    store: MappingStore,
}

impl Workspace {
    /// Open the project at `root`, loading its mapping document.
    pub fn open(root: impl AsRef<Path>) -> SnResult<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(errors::config_error(format!(
                "Project folder not found: {}",
                root.display()
            )));
        }
        let root = root.canonicalize()?;
        let store = MappingStore::new(root.join(MAPPING_FILE_NAME));
        let (mapping, _) = store.load()?;
        Ok(Self::with_mapping(root, mapping))
    }

    /// Build a workspace around an already-resolved mapping.
    pub fn with_mapping(root: impl Into<PathBuf>, mapping: Mapping) -> Self {
        let root = root.into();
        Self {
            src_dir: root.join(SOURCE_DIRECTORY),
            store: MappingStore::new(root.join(MAPPING_FILE_NAME)),
            root,
            mapping,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root of the `table/record/` working tree
    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.src_dir.join(table)
    }

    pub fn env_file(&self) -> PathBuf {
        self.root.join(ENV_FILE_NAME)
    }

    pub fn token_cache_file(&self) -> PathBuf {
        self.root.join(TOKEN_CACHE_FILE_NAME)
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn table(&self, table: &str) -> Option<&TableConfig> {
        self.mapping.get(table)
    }

    pub fn is_mapped(&self, table: &str) -> bool {
        self.mapping.contains(table)
    }

    /// Persist context-only entries for `tables` and mirror them in memory
    /// for the rest of this run.
    pub fn add_context_only_tables(&mut self, tables: &[String]) -> SnResult<Vec<String>> {
        let added = self.store.add_context_only_tables(tables)?;
        for table in &added {
            self.mapping.insert(table.clone(), TableConfig::context_only());
        }
        Ok(added)
    }
}
