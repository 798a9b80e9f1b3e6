//! Remote -> local reconciliation

use super::layout::{
    append_context_tags, metadata_file_name, read_id, record_display_name, resolve_record,
    safe_name, write_id, write_version,
};
use super::prompt::Prompter;
use super::schema::SchemaCapture;
use crate::api::{DisplayValue, ListQuery, Record, TableClient};
use crate::config::{NAME_FIELDS, PULL_RECORD_LIMIT, SYS_ID_FIELD, VERSION_FIELD};
use crate::error::{errors, IoContext, SnResult, SnSyncError};
use crate::project::{TableConfig, Workspace};
use colored::Colorize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What to pull
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Restrict the run to one mapped table
    pub table: Option<String>,
    /// Encoded query overriding the table's configured filter
    pub query: Option<String>,
    /// Context tags appended to every pulled record's notes
    pub tags: Vec<String>,
}

/// A table or record the run could not process
#[derive(Debug)]
pub struct PullFailure {
    pub target: String,
    pub error: SnSyncError,
}

#[derive(Debug, Default)]
pub struct PullReport {
    /// Tables whose records were downloaded
    pub tables: Vec<String>,
    /// Tables whose schema snapshot was written
    pub contexts: Vec<String>,
    pub records_written: usize,
    pub failures: Vec<PullFailure>,
}

impl PullReport {
    fn fail(&mut self, target: impl Into<String>, error: SnSyncError) -> SnResult<()> {
        if error.is_fatal() {
            return Err(error);
        }
        let target = target.into();
        warn!("{}: {}", target, error);
        eprintln!("   {} {}: {}", "❌".red(), target, error.user_message());
        self.failures.push(PullFailure { target, error });
        Ok(())
    }
}

pub struct PullEngine<'a> {
    client: &'a TableClient,
    workspace: &'a mut Workspace,
    prompter: &'a dyn Prompter,
}

impl<'a> PullEngine<'a> {
    pub fn new(client: &'a TableClient, workspace: &'a mut Workspace, prompter: &'a dyn Prompter) -> Self {
        Self {
            client,
            workspace,
            prompter,
        }
    }

    /// Download every table in scope. Only an authentication failure ends the run early.
    pub async fn pull(&mut self, options: &PullOptions) -> SnResult<PullReport> {
        println!("{}", "⬇️  Starting download...".bold());
        let tables = match &options.table {
            Some(table) if self.workspace.is_mapped(table) => {
                println!("🎯 Focusing only on table: {}", table.cyan());
                vec![table.clone()]
            }
            Some(table) => {
                return Err(errors::not_found(
                    table.clone(),
                    format!("Table '{}' not found in sn-config.json", table),
                ))
            }
            None => self.workspace.mapping().table_names(),
        };

        let mut report = PullReport::default();
        for table in tables {
            let Some(config) = self.workspace.table(&table).cloned() else {
                continue;
            };
            let filter = options
                .query
                .clone()
                .or_else(|| config.filter.clone())
                .filter(|f| !f.is_empty());
            println!(
                "   Searching in [{}] with filter: \"{}\"...",
                table.cyan(),
                filter.as_deref().unwrap_or("")
            );

            if config.captures_context() {
                match self.capture_context(&table, filter.as_deref(), &mut report).await {
                    Ok(()) => report.contexts.push(table.clone()),
                    Err(e) => report.fail(format!("{} (schema)", table), e)?,
                }
            }
            if config.only_context {
                println!("      ⏭️  onlyContext mode active for {}. Skipping file download.", table);
                continue;
            }

            match self
                .pull_table(&table, &config, filter.as_deref(), options, &mut report)
                .await
            {
                Ok(count) => {
                    report.tables.push(table.clone());
                    if count > 0 {
                        println!("   {} {}: {} records downloaded/updated.", "✅".green(), table, count);
                    }
                }
                Err(e) => report.fail(table, e)?,
            }
        }
        Ok(report)
    }

    /// Refresh the single record a file or folder belongs to.
    pub async fn pull_target(&mut self, target: &Path, tags: Vec<String>) -> SnResult<PullReport> {
        let (table, sys_id) = resolve_record(self.workspace, target)?;
        println!("🎯 Surgical pull: table [{}] id [{}]", table.cyan(), sys_id);
        let options = PullOptions {
            table: Some(table),
            query: Some(format!("{}={}", SYS_ID_FIELD, sys_id)),
            tags,
        };
        self.pull(&options).await
    }

    async fn capture_context(&mut self, table: &str, filter: Option<&str>, report: &mut PullReport) -> SnResult<()> {
        let missing = SchemaCapture::new(self.client, self.workspace)
            .capture(table, filter)
            .await?;
        if missing.is_empty() || !self.prompter.is_interactive() {
            return Ok(());
        }

        let chosen = self.prompter.select_references(&missing)?;
        if chosen.is_empty() {
            return Ok(());
        }
        println!("      ⚙️  Adding [{}] to sn-config.json...", chosen.join(", "));
        let added = self.workspace.add_context_only_tables(&chosen)?;
        info!("Registered {} referenced tables for context capture", added.len());

        for reference in added {
            let filter = self.workspace.table(&reference).and_then(|c| c.filter.clone());
            match SchemaCapture::new(self.client, self.workspace)
                .capture(&reference, filter.as_deref())
                .await
            {
                Ok(_) => report.contexts.push(reference),
                Err(e) => report.fail(format!("{} (schema)", reference), e)?,
            }
        }
        Ok(())
    }

    async fn pull_table(
        &self,
        table: &str,
        config: &TableConfig,
        filter: Option<&str>,
        options: &PullOptions,
        report: &mut PullReport,
    ) -> SnResult<usize> {
        let query = record_query(config, filter);
        let records = self.client.list(table, &query).await?;
        if records.is_empty() {
            println!("   {} No records found for {}.", "⚠️".yellow(), table);
            return Ok(0);
        }

        let mut tags = options.tags.clone();
        if options.query.is_some() && self.prompter.is_interactive() {
            tags.extend(self.prompter.context_tags(table, records.len())?);
        }

        let mut written = 0;
        for record in &records {
            match self.materialize(table, config, record, &tags) {
                Ok(folder) => {
                    debug!("Wrote {}", folder.display());
                    written += 1;
                }
                Err(e) => {
                    let target = format!("{}/{}", table, record.sys_id().unwrap_or_default());
                    report.fail(target, e)?;
                }
            }
        }
        report.records_written += written;
        Ok(written)
    }

    /// Write one record into its folder and return the folder.
    fn materialize(&self, table: &str, config: &TableConfig, record: &Record, tags: &[String]) -> SnResult<PathBuf> {
        let sys_id = record.sys_id().ok_or_else(|| {
            errors::validation_error("Remote record has no sys_id", Some(SYS_ID_FIELD.into()), None)
        })?;
        let display_name = record_display_name(record);
        let folder = resolve_folder(&self.workspace.table_dir(table), &safe_name(&display_name), &sys_id);
        fs::create_dir_all(&folder).with_path(&folder)?;

        write_id(&folder, &sys_id)?;
        if let Some(version) = record.version() {
            write_version(&folder, &version)?;
        }

        for field in &config.fields {
            if let Some(value) = record.raw(field).filter(|v| !v.is_empty()) {
                let path = folder.join(config.file_name_for(field));
                fs::write(&path, value).with_path(&path)?;
            }
        }

        if config.has_json_export() {
            let path = folder.join(metadata_file_name(table));
            let document = metadata_document(config, record);
            let json = serde_json::to_string_pretty(&Value::Object(document)).map_err(|e| {
                errors::validation_error(format!("Cannot serialize metadata: {e}"), None, None)
            })?;
            fs::write(&path, json).with_path(&path)?;
        }

        let added = append_context_tags(&folder, &display_name, tags)?;
        if !added.is_empty() {
            println!(
                "      🧠 Added context tags to {}",
                folder.file_name().and_then(|n| n.to_str()).unwrap_or_default()
            );
        }
        Ok(folder)
    }
}

/// Fields, display mode and limit for a table's record download
pub fn record_query(config: &TableConfig, filter: Option<&str>) -> ListQuery {
    let display = if config.has_json_export() {
        DisplayValue::All
    } else {
        DisplayValue::Raw
    };
    let mut query = ListQuery::new()
        .fields([SYS_ID_FIELD, VERSION_FIELD])
        .fields(NAME_FIELDS)
        .fields(config.fields.iter().cloned())
        .fields(config.json_export.iter().cloned())
        .fields(config.context_keys.iter().cloned())
        .display(display)
        .limit(PULL_RECORD_LIMIT);
    if let Some(filter) = filter {
        query = query.query(filter);
    }
    query
}

/// Export fields as returned, plus `name`/`sys_name` when present
fn metadata_document(config: &TableConfig, record: &Record) -> Map<String, Value> {
    let mut document = Map::new();
    for field in &config.json_export {
        if let Some(value) = record.get(field) {
            document.insert(field.clone(), value.clone());
        }
    }
    for field in ["name", "sys_name"] {
        if let Some(value) = record.get(field).filter(|v| !v.is_null()) {
            document.insert(field.to_string(), value.clone());
        }
    }
    document
}

/// Folder for `sys_id` named after `base`, stepping aside when another
/// record (or a pending local creation) already holds that name.
pub fn resolve_folder(table_dir: &Path, base: &str, sys_id: &str) -> PathBuf {
    let taken_by_other = |dir: &Path| dir.exists() && read_id(dir).as_deref() != Some(sys_id);

    let preferred = table_dir.join(base);
    if !taken_by_other(&preferred) {
        return preferred;
    }
    let short: String = sys_id.chars().take(5).collect();
    let suffixed = table_dir.join(format!("{}_{}", base, short));
    if !taken_by_other(&suffixed) {
        return suffixed;
    }
    table_dir.join(format!("{}_{}", base, sys_id))
}
