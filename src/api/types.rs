use crate::config::{SYS_ID_FIELD, UPDATED_BY_FIELD, VERSION_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `{"result": ...}` wrapper around every Table API payload
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub result: T,
}

/// Value rendering requested through `sysparm_display_value`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayValue {
    /// Plain stored values
    #[default]
    Raw,
    /// `{value, display_value, link?}` objects for every field
    All,
}

impl DisplayValue {
    pub fn as_param(&self) -> &'static str {
        match self {
            DisplayValue::Raw => "false",
            DisplayValue::All => "all",
        }
    }
}

/// Parameters of a table query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub query: Option<String>,
    pub fields: Vec<String>,
    pub display: DisplayValue,
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.is_empty()).then_some(query);
        self
    }

    /// Requested fields, duplicates dropped in first-seen order
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !field.is_empty() && !self.fields.contains(&field) {
                self.fields.push(field);
            }
        }
        self
    }

    pub fn display(mut self, display: DisplayValue) -> Self {
        self.display = display;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(query) = &self.query {
            params.push(("sysparm_query", query.clone()));
        }
        if !self.fields.is_empty() {
            params.push(("sysparm_fields", self.fields.join(",")));
        }
        params.push(("sysparm_display_value", self.display.as_param().to_string()));
        if let Some(limit) = self.limit {
            params.push(("sysparm_limit", limit.to_string()));
        }
        params
    }
}

/// One remote row as returned by the Table API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Stored value as text, unwrapping display-value objects
    pub fn raw(&self, field: &str) -> Option<String> {
        self.0.get(field).and_then(value_text)
    }

    /// Display text when present, stored value otherwise
    pub fn display(&self, field: &str) -> Option<String> {
        match self.0.get(field) {
            Some(Value::Object(obj)) => obj
                .get("display_value")
                .and_then(scalar_text)
                .or_else(|| obj.get("value").and_then(scalar_text)),
            Some(other) => scalar_text(other),
            None => None,
        }
    }

    pub fn sys_id(&self) -> Option<String> {
        self.raw(SYS_ID_FIELD).filter(|id| !id.is_empty())
    }

    pub fn version(&self) -> Option<String> {
        self.raw(VERSION_FIELD).filter(|v| !v.is_empty())
    }

    pub fn updated_by(&self) -> Option<String> {
        self.display(UPDATED_BY_FIELD).filter(|v| !v.is_empty())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Text of a field value: strings as-is, numbers and booleans rendered,
/// `{value, display_value}` unwrapped to `value`. Null and nested data yield `None`.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => obj.get("value").and_then(scalar_text),
        other => scalar_text(other),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
