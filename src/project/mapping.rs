//! Table mapping document (`sn-config.json`)
//!
//! The document exists in two shapes, `{"mapping": {...}}` and a bare
//! `{...}`. [`MappingStore::load`] is the only place that tells them apart;
//! everything downstream works on [`Mapping`].

use crate::config::{CONTEXT_ONLY_FILTER, DEFAULT_FIELD_EXTENSION};
use crate::error::{errors, IoContext, SnResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Sync settings for one remote table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConfig {
    /// Fields materialized as one file each
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Per-field file extension
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ext: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub save_context: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub only_context: bool,
    /// Extra fields written to the consolidated metadata document
    #[serde(default, alias = "jsonFields", skip_serializing_if = "Vec::is_empty")]
    pub json_export: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_keys: Vec<String>,
}

impl TableConfig {
    /// Table registered only for schema capture
    pub fn context_only() -> Self {
        Self {
            only_context: true,
            filter: Some(CONTEXT_ONLY_FILTER.to_string()),
            ..Self::default()
        }
    }

    pub fn extension_for(&self, field: &str) -> &str {
        self.ext
            .get(field)
            .map(String::as_str)
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_FIELD_EXTENSION)
    }

    /// `script` -> `script.js`
    pub fn file_name_for(&self, field: &str) -> String {
        format!("{}.{}", field, self.extension_for(field))
    }

    pub fn captures_context(&self) -> bool {
        self.save_context || self.only_context
    }

    /// Whether new records may be created from local folders
    pub fn is_creatable(&self) -> bool {
        !self.fields.is_empty() && !self.only_context
    }

    pub fn has_json_export(&self) -> bool {
        !self.json_export.is_empty()
    }
}

/// All mapped tables, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping {
    tables: BTreeMap<String, TableConfig>,
}

impl Mapping {
    pub fn new(tables: BTreeMap<String, TableConfig>) -> Self {
        Self { tables }
    }

    pub fn get(&self, table: &str) -> Option<&TableConfig> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &TableConfig)> {
        self.tables.iter()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub(crate) fn insert(&mut self, table: String, config: TableConfig) {
        self.tables.insert(table, config);
    }

    fn validate(&self) -> SnResult<()> {
        for (table, config) in &self.tables {
            if table.is_empty() || table.starts_with('.') || table.contains(['/', '\\']) {
                return Err(errors::config_error(format!(
                    "Invalid table name '{}' in mapping: must be a plain directory name",
                    table
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for field in &config.fields {
                if field.is_empty() || field.contains(['/', '\\']) {
                    return Err(errors::config_error(format!(
                        "Invalid field name '{}' for table '{}'",
                        field, table
                    )));
                }
                if !seen.insert(config.file_name_for(field)) {
                    return Err(errors::config_error(format!(
                        "Field '{}' is listed twice for table '{}'",
                        field, table
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Which of the two accepted document shapes was found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingShape {
    Wrapped,
    Bare,
    Missing,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MappingDocument {
    Wrapped { mapping: BTreeMap<String, TableConfig> },
    Bare(BTreeMap<String, TableConfig>),
}

/// Loads and updates the mapping document for one project
#[derive(Debug, Clone)]
pub struct MappingStore {
    path: PathBuf,
}

impl MappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, accepting either shape. A missing file is an empty
    /// mapping, not an error.
    pub fn load(&self) -> SnResult<(Mapping, MappingShape)> {
        if !self.path.exists() {
            warn!(
                "No {} found in project; no tables will be synced",
                self.path.display()
            );
            return Ok((Mapping::default(), MappingShape::Missing));
        }

        info!("Loading table mapping from {}", self.path.display());
        let content = fs::read_to_string(&self.path).with_path(&self.path)?;
        let document: MappingDocument = serde_json::from_str(&content).map_err(|e| {
            errors::config_error_with_source(
                format!("Failed to parse mapping document {}", self.path.display()),
                e,
            )
        })?;

        let (tables, shape) = match document {
            MappingDocument::Wrapped { mapping } => (mapping, MappingShape::Wrapped),
            MappingDocument::Bare(tables) => (tables, MappingShape::Bare),
        };
        let mapping = Mapping::new(tables);
        mapping.validate()?;
        Ok((mapping, shape))
    }

    /// Register referenced tables as context-only entries, keeping the
    /// document's existing shape and any unrelated top-level keys. Tables
    /// already present are left alone. Returns the tables actually added.
    pub fn add_context_only_tables(&self, tables: &[String]) -> SnResult<Vec<String>> {
        let mut root = if self.path.exists() {
            let content = fs::read_to_string(&self.path).with_path(&self.path)?;
            serde_json::from_str::<Value>(&content).map_err(|e| {
                errors::config_error_with_source(
                    format!("Failed to parse mapping document {}", self.path.display()),
                    e,
                )
            })?
        } else {
            Value::Object(Map::from_iter([(
                "mapping".to_string(),
                Value::Object(Map::new()),
            )]))
        };

        let root_obj = root.as_object_mut().ok_or_else(|| {
            errors::config_error("Mapping document must be a JSON object")
        })?;
        let wrapped = matches!(root_obj.get("mapping"), Some(Value::Object(_)));
        let target = if wrapped {
            root_obj
                .get_mut("mapping")
                .and_then(Value::as_object_mut)
                .ok_or_else(|| errors::config_error("Mapping document must be a JSON object"))?
        } else {
            root_obj
        };

        let entry = serde_json::to_value(TableConfig::context_only()).map_err(|e| {
            errors::config_error_with_source("Failed to serialize table entry", e)
        })?;
        let mut added = Vec::new();
        for table in tables {
            if !target.contains_key(table) {
                target.insert(table.clone(), entry.clone());
                added.push(table.clone());
            }
        }

        if !added.is_empty() {
            let content = serde_json::to_string_pretty(&root).map_err(|e| {
                errors::config_error_with_source("Failed to serialize mapping document", e)
            })?;
            fs::write(&self.path, content).with_path(&self.path)?;
            info!("Added [{}] to {}", added.join(", "), self.path.display());
        }
        Ok(added)
    }
}
