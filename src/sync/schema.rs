//! Schema/context capture
//!
//! Writes `src/<table>/.ai_context/_schema.<table>.json`: column definitions
//! from `sys_dictionary`, choice lists from `sys_choice`, the numbering prefix
//! from `sys_number` and one sample record with every value replaced by a
//! placeholder of the same shape.

use crate::api::{DisplayValue, ListQuery, Record, TableClient};
use crate::config::{CONTEXT_DIRECTORY, DICTIONARY_LIMIT, SYS_ID_FIELD};
use crate::error::{errors, IoContext, SnResult};
use crate::project::{Mapping, Workspace};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

const SNAPSHOT_SOURCE: &str = concat!("snsync ", env!("CARGO_PKG_VERSION"));
const MASKED_ID: &str = "00000000000000000000000000000000";
const MASKED_REFERENCE: &str = "REF_SYS_ID_HASH";
const SAMPLE_DATE: &str = "2025-01-01 12:00:00";
const SAMPLE_VALUE: &str = "SAMPLE_VALUE";
const SAMPLE_DISPLAY: &str = "Sample Display Value";

static HEX_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[a-f0-9]{32}").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    #[serde(rename = "_meta")]
    pub meta: SnapshotMeta,
    pub columns: Vec<ColumnInfo>,
    pub number_prefix: String,
    pub sample_data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub column_type: Option<String>,
    pub reference: Option<String>,
    pub is_display: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ChoiceOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: Option<String>,
    pub value: Option<String>,
}

/// Location of a table's schema snapshot
pub fn schema_path(workspace: &Workspace, table: &str) -> PathBuf {
    workspace
        .table_dir(table)
        .join(CONTEXT_DIRECTORY)
        .join(format!("_schema.{}.json", table))
}

pub struct SchemaCapture<'a> {
    client: &'a TableClient,
    workspace: &'a Workspace,
}

impl<'a> SchemaCapture<'a> {
    pub fn new(client: &'a TableClient, workspace: &'a Workspace) -> Self {
        Self { client, workspace }
    }

    /// Capture `table` and return the referenced tables missing from the mapping.
    pub async fn capture(&self, table: &str, filter: Option<&str>) -> SnResult<Vec<String>> {
        println!("      🧠 Capturing schema context for {}...", table);

        let dictionary = self
            .client
            .list(
                "sys_dictionary",
                &ListQuery::new()
                    .query(format!("name={}^active=true", table))
                    .fields(["element", "column_label", "internal_type", "reference", "choice", "display"])
                    .limit(DICTIONARY_LIMIT),
            )
            .await?;

        let choices = self.choices(table, &dictionary).await;
        let number_prefix = self.number_prefix(table).await;
        let columns = build_columns(&dictionary, choices);
        let sample_data = self.sample(table, filter).await?;

        let snapshot = SchemaSnapshot {
            meta: SnapshotMeta {
                timestamp: Utc::now(),
                source: SNAPSHOT_SOURCE.to_string(),
            },
            columns,
            number_prefix,
            sample_data,
        };

        let path = schema_path(self.workspace, table);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        let json = serde_json::to_string_pretty(&snapshot).map_err(|e| {
            errors::validation_error(format!("Cannot serialize schema: {e}"), None, None)
        })?;
        fs::write(&path, json).with_path(&path)?;
        println!(
            "      📘 Context saved. Prefix: [{}] Columns: {}",
            snapshot.number_prefix,
            snapshot.columns.len()
        );

        Ok(missing_references(&snapshot.columns, table, self.workspace.mapping()))
    }

    async fn choices(&self, table: &str, dictionary: &[Record]) -> HashMap<String, Vec<ChoiceOption>> {
        let choice_columns: Vec<String> = dictionary
            .iter()
            .filter(|entry| is_choice_flag(entry.raw("choice").as_deref()))
            .filter_map(|entry| entry.raw("element"))
            .collect();
        let mut grouped: HashMap<String, Vec<ChoiceOption>> = HashMap::new();
        if choice_columns.is_empty() {
            return grouped;
        }

        let query = ListQuery::new()
            .query(format!(
                "name={}^elementIN{}^inactive=false",
                table,
                choice_columns.join(",")
            ))
            .fields(["element", "label", "value", "sequence"]);
        match self.client.list("sys_choice", &query).await {
            Ok(rows) => {
                for row in rows {
                    if let Some(element) = row.raw("element") {
                        grouped.entry(element).or_default().push(ChoiceOption {
                            label: row.raw("label"),
                            value: row.raw("value"),
                        });
                    }
                }
            }
            Err(e) => warn!("Failed to fetch choices for {} (missing ACL?): {}", table, e),
        }
        grouped
    }

    async fn number_prefix(&self, table: &str) -> String {
        let query = ListQuery::new()
            .query(format!("category={}", table))
            .fields(["prefix"])
            .limit(1);
        match self.client.list("sys_number", &query).await {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.raw("prefix"))
                .unwrap_or_default(),
            Err(e) => {
                debug!("No number prefix for {}: {}", table, e);
                String::new()
            }
        }
    }

    async fn sample(&self, table: &str, filter: Option<&str>) -> SnResult<Map<String, Value>> {
        let mut query = ListQuery::new().display(DisplayValue::All).limit(1);
        if let Some(filter) = filter {
            query = query.query(filter);
        }
        let rows = self.client.list(table, &query).await?;
        Ok(rows
            .first()
            .map(|row| sanitize_sample(row.fields()))
            .unwrap_or_default())
    }
}

/// Dictionary choice flag: set and not `0`
fn is_choice_flag(flag: Option<&str>) -> bool {
    matches!(flag, Some(f) if !f.is_empty() && f != "0")
}

fn build_columns(dictionary: &[Record], mut choices: HashMap<String, Vec<ChoiceOption>>) -> Vec<ColumnInfo> {
    dictionary
        .iter()
        .filter_map(|entry| {
            let name = entry.raw("element").filter(|e| !e.is_empty())?;
            Some(ColumnInfo {
                label: entry.raw("column_label"),
                column_type: entry.raw("internal_type").filter(|t| !t.is_empty()),
                reference: entry.raw("reference").filter(|r| !r.is_empty()),
                is_display: entry.raw("display").as_deref() == Some("true"),
                choices: choices.remove(&name).unwrap_or_default(),
                name,
            })
        })
        .collect()
}

/// Referenced tables absent from the mapping, excluding self references
pub fn missing_references(columns: &[ColumnInfo], table: &str, mapping: &Mapping) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for reference in columns.iter().filter_map(|c| c.reference.as_ref()) {
        if reference != table && !mapping.contains(reference) && !missing.contains(reference) {
            missing.push(reference.clone());
        }
    }
    missing
}

/// Replace every value of a sample record with a placeholder of the same shape.
pub fn sanitize_sample(raw: &Map<String, Value>) -> Map<String, Value> {
    raw.iter()
        .map(|(key, value)| (key.clone(), sanitize_value(key, value)))
        .collect()
}

fn sanitize_value(key: &str, value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    let complex = value
        .as_object()
        .filter(|obj| obj.contains_key("value") || obj.contains_key("display_value"));
    let inner = complex.and_then(|obj| obj.get("value")).unwrap_or(value);

    let (dummy_value, dummy_display) = if key == SYS_ID_FIELD {
        (MASKED_ID, MASKED_ID)
    } else if key.contains("date") || key.contains("_on") || key.contains("_at") {
        (SAMPLE_DATE, SAMPLE_DATE)
    } else if key.contains("count") || key == "order" || key == "sequence" {
        ("1", "1")
    } else if is_boolean_like(inner) {
        ("true", "true")
    } else {
        (SAMPLE_VALUE, SAMPLE_DISPLAY)
    };

    let Some(obj) = complex else {
        return Value::String(dummy_value.to_string());
    };
    let link = obj
        .get("link")
        .and_then(Value::as_str)
        .filter(|l| !l.is_empty());
    let mut sanitized = Map::new();
    sanitized.insert("display_value".into(), Value::String(dummy_display.into()));
    match link {
        Some(link) => {
            sanitized.insert("value".into(), Value::String(MASKED_REFERENCE.into()));
            sanitized.insert(
                "link".into(),
                Value::String(HEX_ID.replace_all(link, MASKED_REFERENCE).into_owned()),
            );
        }
        None => {
            sanitized.insert("value".into(), Value::String(dummy_value.into()));
        }
    }
    Value::Object(sanitized)
}

fn is_boolean_like(value: &Value) -> bool {
    matches!(value, Value::Bool(_)) || matches!(value.as_str(), Some("true" | "false"))
}
