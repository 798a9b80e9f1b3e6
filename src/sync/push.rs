//! Local -> remote reconciliation
//!
//! A target path is first classified into a [`PushPlan`], then executed.
//! Updates are guarded by the version marker: when the remote
//! `sys_updated_on` differs from the one recorded locally the upload is
//! refused. Creations turn a folder without an id marker into a new record.

use super::layout::{
    field_from_file_name, has_id_marker, in_context_namespace, is_hidden, is_reserved_document,
    locate, metadata_file_name, read_version, seed_context_notes, write_id, write_version,
    RecordLocation,
};
use crate::api::{value_text, TableClient};
use crate::config::{LEGACY_META_JSON_FILE, PROPERTIES_JSON_FILE, RECORD_JSON_FILE, SYS_ID_FIELD, VERSION_FIELD};
use crate::error::{errors, IoContext, SnResult, SnSyncError};
use crate::project::{TableConfig, Workspace};
use colored::Colorize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Metadata documents read for creation payloads, highest precedence first
const PAYLOAD_DOCUMENTS: [&str; 3] = [PROPERTIES_JSON_FILE, RECORD_JSON_FILE, LEGACY_META_JSON_FILE];

/// Server-managed fields never sent on creation
const SERVER_MANAGED: [&str; 2] = [SYS_ID_FIELD, VERSION_FIELD];

/// What pushing a path means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushPlan {
    Ignore {
        path: PathBuf,
        reason: &'static str,
    },
    /// Upload one field file
    UpdateField {
        table: String,
        sys_id: String,
        field: String,
        file: PathBuf,
        /// Folder holding the version marker; `None` for legacy dotted files
        marker_dir: Option<PathBuf>,
    },
    /// Upload every field file of a record folder
    UpdateAll {
        table: String,
        sys_id: String,
        folder: PathBuf,
    },
    /// Create a record from a folder without an id marker
    Create { table: String, folder: PathBuf },
    /// Create every child folder of a table lacking an id marker
    BulkCreate { table: String },
}

/// Decide what pushing `path` means. `table_hint` names the table for a
/// record folder whose parent is not itself a mapped table directory.
pub fn classify(workspace: &Workspace, path: &Path, table_hint: Option<&str>) -> SnResult<PushPlan> {
    if !path.exists() {
        return Err(errors::not_found(
            path.display().to_string(),
            format!("Path not found: {}", path.display()),
        ));
    }
    let ignore = |reason| PushPlan::Ignore {
        path: path.to_path_buf(),
        reason,
    };
    if in_context_namespace(path) {
        return Ok(ignore("context snapshot"));
    }

    if path.is_file() {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if is_hidden(path) {
            return Ok(ignore("hidden file"));
        }
        if is_reserved_document(name) {
            return Ok(ignore("metadata document"));
        }
        return Ok(match locate(workspace, path) {
            Some(RecordLocation::MarkerFolder {
                table,
                folder,
                sys_id,
                file: Some(file),
            }) if workspace.is_mapped(&table) => match sys_id {
                Some(sys_id) => match field_from_file_name(name) {
                    Some(field) => PushPlan::UpdateField {
                        table,
                        sys_id,
                        field: field.to_string(),
                        file,
                        marker_dir: Some(folder),
                    },
                    None => ignore("no field extension"),
                },
                None => PushPlan::Create { table, folder },
            },
            Some(RecordLocation::LegacyDotted {
                table,
                sys_id,
                field,
                file,
            }) if workspace.is_mapped(&table) => PushPlan::UpdateField {
                table,
                sys_id,
                field,
                file,
                marker_dir: None,
            },
            _ => ignore("not part of a mapped table"),
        });
    }

    if let Some(RecordLocation::MarkerFolder {
        table,
        folder,
        sys_id,
        file: None,
    }) = locate(workspace, path)
    {
        if workspace.is_mapped(&table) {
            return Ok(match sys_id {
                Some(sys_id) => PushPlan::UpdateAll {
                    table,
                    sys_id,
                    folder,
                },
                None => PushPlan::Create { table, folder },
            });
        }
    }

    let dir_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let is_table_dir = path.parent().is_some_and(|p| same_path(p, workspace.src_dir()));
    if is_table_dir && workspace.is_mapped(dir_name) {
        return Ok(PushPlan::BulkCreate {
            table: dir_name.to_string(),
        });
    }
    if let Some(table) = table_hint.filter(|t| workspace.is_mapped(t)) {
        return Ok(if has_id_marker(path) {
            ignore("record folder outside its table directory")
        } else {
            PushPlan::Create {
                table: table.to_string(),
                folder: path.to_path_buf(),
            }
        });
    }
    Err(errors::not_found(
        path.display().to_string(),
        format!(
            "Folder '{}' is neither a configured table nor a record inside one",
            dir_name
        ),
    ))
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Updated {
        table: String,
        sys_id: String,
        field: String,
        url: String,
    },
    Created {
        table: String,
        sys_id: String,
        folder: PathBuf,
        url: String,
    },
    Skipped {
        path: PathBuf,
        reason: &'static str,
    },
}

#[derive(Debug)]
pub struct PushFailure {
    pub target: PathBuf,
    pub error: SnSyncError,
}

#[derive(Debug, Default)]
pub struct PushReport {
    pub outcomes: Vec<PushOutcome>,
    pub failures: Vec<PushFailure>,
}

impl PushReport {
    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, PushOutcome::Created { .. }))
            .count()
    }

    pub fn updated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, PushOutcome::Updated { .. }))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, target: &Path, result: SnResult<PushOutcome>) -> SnResult<()> {
        match result {
            Ok(outcome) => self.outcomes.push(outcome),
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                warn!("{}: {}", target.display(), error);
                eprintln!("   {} {}", "🔥".red(), error.user_message());
                self.failures.push(PushFailure {
                    target: target.to_path_buf(),
                    error,
                });
            }
        }
        Ok(())
    }
}

pub struct PushEngine<'a> {
    client: &'a TableClient,
    workspace: &'a Workspace,
}

impl<'a> PushEngine<'a> {
    pub fn new(client: &'a TableClient, workspace: &'a Workspace) -> Self {
        Self { client, workspace }
    }

    /// Push a file or folder. Single-item plans return their error directly;
    /// folder-wide plans collect per-item failures in the report.
    pub async fn push_path(&self, path: &Path, table_hint: Option<&str>) -> SnResult<PushReport> {
        let plan = classify(self.workspace, path, table_hint)?;
        debug!("Push plan for {}: {:?}", path.display(), plan);
        let mut report = PushReport::default();
        match plan {
            PushPlan::Ignore { path, reason } => {
                info!("Skipping {} ({})", path.display(), reason);
                report.outcomes.push(PushOutcome::Skipped { path, reason });
            }
            PushPlan::UpdateField {
                table,
                sys_id,
                field,
                file,
                marker_dir,
            } => {
                let outcome = self
                    .update_field(&table, &sys_id, &field, &file, marker_dir.as_deref())
                    .await?;
                report.outcomes.push(outcome);
            }
            PushPlan::UpdateAll {
                table,
                sys_id,
                folder,
            } => self.update_all(&table, &sys_id, &folder, &mut report).await?,
            PushPlan::Create { table, folder } => {
                if path.is_file() {
                    println!("   🆕 New record detected from single file. Creating full record...");
                }
                report.outcomes.push(self.create_record(&table, &folder).await?);
            }
            PushPlan::BulkCreate { table } => self.bulk_create(&table, &mut report).await?,
        }
        Ok(report)
    }

    /// `push --table T [--name N]`: the record folder `src/T/N`, or the whole table.
    pub async fn push_named(&self, table: &str, name: Option<&str>) -> SnResult<PushReport> {
        let mut path = self.workspace.table_dir(table);
        if let Some(name) = name {
            path.push(name);
        }
        self.push_path(&path, Some(table)).await
    }

    /// Create every pending record folder of every creatable table.
    pub async fn push_all_new(&self) -> SnResult<PushReport> {
        println!("{}", "🚀 Pushing all new records from all tables...".bold());
        let mut report = PushReport::default();
        for (table, config) in self.workspace.mapping().tables() {
            if !config.is_creatable() || !self.workspace.table_dir(table).is_dir() {
                continue;
            }
            self.bulk_create(table, &mut report).await?;
        }
        Ok(report)
    }

    /// Upload one field after checking the version marker.
    pub async fn update_field(
        &self,
        table: &str,
        sys_id: &str,
        field: &str,
        file: &Path,
        marker_dir: Option<&Path>,
    ) -> SnResult<PushOutcome> {
        println!("🔄 Uploading: {} | Field: {}...", table.cyan(), field);

        if let Some(local_version) = marker_dir.and_then(read_version) {
            match self.client.version_of(table, sys_id).await {
                Ok((Some(remote_version), updated_by)) if remote_version != local_version => {
                    return Err(SnSyncError::Conflict {
                        table: table.to_string(),
                        sys_id: sys_id.to_string(),
                        local_version,
                        remote_version,
                        updated_by,
                    });
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Could not check conflicts on server ({}). Proceeding at your own risk...", e);
                }
            }
        }

        let content = fs::read_to_string(file).with_path(file)?;
        let mut payload = Map::new();
        payload.insert(field.to_string(), Value::String(content));
        let updated = self.client.update(table, sys_id, &payload).await?;

        if let (Some(dir), Some(version)) = (marker_dir, updated.version()) {
            write_version(dir, &version)?;
        }

        let url = self.client.record_url(table, sys_id);
        println!("   {} Saved to instance.", "✨".green());
        println!("      🔗 {}", url);
        Ok(PushOutcome::Updated {
            table: table.to_string(),
            sys_id: sys_id.to_string(),
            field: field.to_string(),
            url,
        })
    }

    async fn update_all(&self, table: &str, sys_id: &str, folder: &Path, report: &mut PushReport) -> SnResult<()> {
        println!(
            "   📂 Updating record: {}",
            folder.file_name().and_then(|n| n.to_str()).unwrap_or_default()
        );
        for file in sorted_entries(folder)? {
            let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !file.is_file() || is_hidden(&file) || is_reserved_document(name) {
                continue;
            }
            let Some(field) = field_from_file_name(name) else {
                continue;
            };
            let result = self
                .update_field(table, sys_id, field, &file, Some(folder))
                .await;
            report.record(&file, result)?;
        }
        Ok(())
    }

    async fn bulk_create(&self, table: &str, report: &mut PushReport) -> SnResult<()> {
        println!("   📦 Bulk mode: scanning table [{}]...", table.cyan());
        for child in sorted_entries(&self.workspace.table_dir(table))? {
            if !child.is_dir() || is_hidden(&child) || has_id_marker(&child) {
                continue;
            }
            let result = self.create_record(table, &child).await;
            report.record(&child, result)?;
        }
        Ok(())
    }

    /// Create a record from a folder directly under `src/<table>`.
    pub async fn create_record(&self, table: &str, folder: &Path) -> SnResult<PushOutcome> {
        let config = self.workspace.table(table).ok_or_else(|| {
            errors::not_found(table, format!("Table '{}' not found in sn-config.json", table))
        })?;
        let table_dir = self.workspace.table_dir(table);
        if !folder.parent().is_some_and(|p| same_path(p, &table_dir)) {
            return Err(errors::validation_error(
                format!(
                    "Invalid path: folder must be inside {}/ (got {})",
                    table,
                    folder.display()
                ),
                Some("path".into()),
                Some(folder.display().to_string()),
            ));
        }
        if has_id_marker(folder) {
            return Err(errors::validation_error(
                format!("{} already has a .sys_id; push it as an update", folder.display()),
                Some("path".into()),
                Some(folder.display().to_string()),
            ));
        }
        let folder_name = folder
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        println!("✨ Creating NEW record in [{}] from folder: {}...", table.cyan(), folder_name);

        let mut payload = creation_payload(config, folder)?;
        if payload.is_empty() {
            return Err(errors::validation_error(
                "No data found to create record. Check JSON metadata or field files",
                None,
                Some(folder.display().to_string()),
            ));
        }
        payload
            .entry("name")
            .or_insert_with(|| Value::String(folder_name.clone()));

        let created = self.client.create(table, &payload).await?;
        let sys_id = created.sys_id().ok_or_else(|| {
            errors::remote_error(None, None, "Create response did not include a sys_id")
        })?;
        write_id(folder, &sys_id)?;
        if let Some(version) = created.version() {
            write_version(folder, &version)?;
        }

        let display_name = created
            .raw("name")
            .or_else(|| created.raw("api_name"))
            .filter(|n| !n.is_empty())
            .unwrap_or(folder_name);
        merge_identity(&folder.join(metadata_file_name(table)), &sys_id, &display_name)?;
        if config.save_context {
            seed_context_notes(folder, &display_name)?;
        }

        let url = self.client.record_url(table, &sys_id);
        println!("   {} Record created! sys_id: {}", "✅".green(), sys_id);
        println!("      🔗 {}", url);
        Ok(PushOutcome::Created {
            table: table.to_string(),
            sys_id,
            folder: folder.to_path_buf(),
            url,
        })
    }
}

/// Field files first, then metadata documents; the first source of a key wins.
pub fn creation_payload(config: &TableConfig, folder: &Path) -> SnResult<Map<String, Value>> {
    let mut payload = Map::new();
    for field in &config.fields {
        let path = folder.join(config.file_name_for(field));
        if path.is_file() {
            let content = fs::read_to_string(&path).with_path(&path)?;
            payload.insert(field.clone(), Value::String(content));
        }
    }

    for document in PAYLOAD_DOCUMENTS {
        let path = folder.join(document);
        if !path.is_file() {
            continue;
        }
        let raw = fs::read_to_string(&path).with_path(&path)?;
        let data = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(data)) => data,
            Ok(_) => {
                warn!("Ignoring {}: not a JSON object", path.display());
                continue;
            }
            Err(e) => {
                warn!("Invalid JSON metadata in {}: {}", path.display(), e);
                continue;
            }
        };
        for (key, value) in data {
            if SERVER_MANAGED.contains(&key.as_str()) {
                continue;
            }
            if payload.get(&key).is_some_and(|v| !v.is_null()) {
                continue;
            }
            let value = match &value {
                Value::Object(obj) if obj.contains_key("value") => {
                    value_text(&value).map(Value::String).unwrap_or(Value::Null)
                }
                _ => value,
            };
            payload.insert(key, value);
        }
    }
    Ok(payload)
}

/// Record `sys_id` and `name` in the metadata document, keeping its other keys.
fn merge_identity(path: &Path, sys_id: &str, display_name: &str) -> SnResult<()> {
    let mut document = match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        Err(_) => Map::new(),
    };
    document.insert(
        SYS_ID_FIELD.into(),
        json!({"value": sys_id, "display_value": sys_id}),
    );
    document.insert(
        "name".into(),
        json!({"value": display_name, "display_value": display_name}),
    );
    let json = serde_json::to_string_pretty(&Value::Object(document))
        .map_err(|e| errors::validation_error(format!("Cannot serialize metadata: {e}"), None, None))?;
    fs::write(path, json).with_path(path)
}

fn sorted_entries(dir: &Path) -> SnResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_path(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ID_MARKER;
    use crate::project::Mapping;
    use std::collections::{BTreeMap, HashMap};
    use tempfile::TempDir;

    fn script_include() -> TableConfig {
        TableConfig {
            fields: vec!["script".into()],
            ext: HashMap::from([("script".to_string(), "js".to_string())]),
            ..TableConfig::default()
        }
    }

    fn workspace(dir: &TempDir) -> Workspace {
        let mut tables = BTreeMap::new();
        tables.insert("sys_script_include".to_string(), script_include());
        Workspace::with_mapping(dir.path().canonicalize().unwrap(), Mapping::new(tables))
    }

    fn record_folder(ws: &Workspace, name: &str, sys_id: Option<&str>) -> PathBuf {
        let folder = ws.table_dir("sys_script_include").join(name);
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("script.js"), "gs.info('x');").unwrap();
        if let Some(id) = sys_id {
            fs::write(folder.join(ID_MARKER), id).unwrap();
        }
        folder
    }

    #[test]
    fn classification_covers_the_layout() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        let existing = record_folder(&ws, "Util", Some("abc"));
        let pending = record_folder(&ws, "Draft", None);
        fs::write(existing.join("_record.json"), "{}").unwrap();
        fs::write(existing.join(".hidden"), "").unwrap();
        let context = ws.table_dir("sys_script_include").join(".ai_context");
        fs::create_dir_all(&context).unwrap();
        fs::write(context.join("_schema.sys_script_include.json"), "{}").unwrap();
        let unmapped = ws.table_dir("other").join("Thing");
        fs::create_dir_all(&unmapped).unwrap();
        fs::write(unmapped.join("x.txt"), "").unwrap();

        assert!(matches!(
            classify(&ws, &existing.join("script.js"), None).unwrap(),
            PushPlan::UpdateField { ref field, ref sys_id, .. } if field == "script" && sys_id == "abc"
        ));
        assert!(matches!(classify(&ws, &existing, None).unwrap(), PushPlan::UpdateAll { .. }));
        assert!(matches!(classify(&ws, &pending.join("script.js"), None).unwrap(), PushPlan::Create { .. }));
        assert!(matches!(classify(&ws, &pending, None).unwrap(), PushPlan::Create { .. }));
        assert_eq!(
            classify(&ws, &ws.table_dir("sys_script_include"), None).unwrap(),
            PushPlan::BulkCreate {
                table: "sys_script_include".into()
            }
        );
        for ignored in [
            existing.join("_record.json"),
            existing.join(".hidden"),
            context.join("_schema.sys_script_include.json"),
            unmapped.join("x.txt"),
        ] {
            assert!(
                matches!(classify(&ws, &ignored, None).unwrap(), PushPlan::Ignore { .. }),
                "{}",
                ignored.display()
            );
        }
        assert!(classify(&ws, &unmapped, None).is_err());
    }

    #[test]
    fn legacy_dotted_file_is_an_update_without_marker() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        let table_dir = ws.table_dir("sys_script_include");
        fs::create_dir_all(&table_dir).unwrap();
        let file = table_dir.join("Util.0123456789abcdef0123456789abcdef.script.js");
        fs::write(&file, "x").unwrap();

        assert_eq!(
            classify(&ws, &file, None).unwrap(),
            PushPlan::UpdateField {
                table: "sys_script_include".into(),
                sys_id: "0123456789abcdef0123456789abcdef".into(),
                field: "script".into(),
                file,
                marker_dir: None,
            }
        );
    }

    #[test]
    fn creation_payload_prefers_field_files_then_documents_in_order() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path();
        fs::write(folder.join("script.js"), "from file").unwrap();
        fs::write(
            folder.join("_properties.json"),
            r#"{"script": "from properties", "value": {"value": "42", "display_value": "Forty two"}}"#,
        )
        .unwrap();
        fs::write(
            folder.join("_record.json"),
            r#"{"value": "ignored", "description": "from record", "sys_id": {"value": "old"}}"#,
        )
        .unwrap();
        fs::write(folder.join("meta.json"), r#"{"description": "ignored", "active": true}"#).unwrap();

        let payload = creation_payload(&script_include(), folder).unwrap();
        assert_eq!(
            Value::Object(payload),
            json!({
                "script": "from file",
                "value": "42",
                "description": "from record",
                "active": true
            })
        );
    }
}
