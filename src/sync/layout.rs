//! On-disk layout of the working tree
//!
//! ```text
//! src/<table>/<record>/.sys_id
//!                     /.sys_updated_on
//!                     /<field>.<ext>
//!                     /_record.json | _properties.json
//!                     /_ai_context.md
//! src/<table>/.ai_context/_schema.<table>.json
//! ```

use crate::api::Record;
use crate::config::{
    CONTEXT_DIRECTORY, CONTEXT_NOTES_FILE, DEFAULT_RECORD_NAME, ID_MARKER,
    LEGACY_META_JSON_FILE, NAME_FIELDS, PROPERTIES_JSON_FILE, PROPERTIES_TABLE, RECORD_JSON_FILE,
    VERSION_MARKER,
};
use crate::error::{errors, IoContext, SnResult};
use crate::project::Workspace;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());
static SYS_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{32}$").unwrap());

/// Filesystem-safe form of a record name
pub fn safe_name(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name, "_").into_owned()
}

/// Human name of a record: first non-empty name-like field
pub fn record_display_name(record: &Record) -> String {
    NAME_FIELDS
        .iter()
        .filter_map(|field| record.raw(field))
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_RECORD_NAME.to_string())
}

/// Consolidated metadata document name for a table
pub fn metadata_file_name(table: &str) -> &'static str {
    if table == PROPERTIES_TABLE {
        PROPERTIES_JSON_FILE
    } else {
        RECORD_JSON_FILE
    }
}

/// Files that live in record folders but are never uploaded as fields
pub fn is_reserved_document(file_name: &str) -> bool {
    matches!(
        file_name,
        RECORD_JSON_FILE | PROPERTIES_JSON_FILE | LEGACY_META_JSON_FILE | CONTEXT_NOTES_FILE
    )
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

pub fn in_context_namespace(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == CONTEXT_DIRECTORY))
}

fn read_marker(folder: &Path, marker: &str) -> Option<String> {
    fs::read_to_string(folder.join(marker))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Record id stored in a folder's id marker
pub fn read_id(folder: &Path) -> Option<String> {
    read_marker(folder, ID_MARKER)
}

pub fn has_id_marker(folder: &Path) -> bool {
    folder.join(ID_MARKER).is_file()
}

pub fn read_version(folder: &Path) -> Option<String> {
    read_marker(folder, VERSION_MARKER)
}

pub fn write_id(folder: &Path, sys_id: &str) -> SnResult<()> {
    let path = folder.join(ID_MARKER);
    fs::write(&path, sys_id).with_path(&path)
}

pub fn write_version(folder: &Path, version: &str) -> SnResult<()> {
    let path = folder.join(VERSION_MARKER);
    fs::write(&path, version).with_path(&path)
}

/// Field name encoded in a field file name (`script.js` -> `script`)
pub fn field_from_file_name(file_name: &str) -> Option<&str> {
    let (stem, _ext) = file_name.rsplit_once('.')?;
    (!stem.is_empty()).then_some(stem)
}

/// Where a path sits relative to the record tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLocation {
    /// Inside or at a record folder `src/<table>/<folder>`
    MarkerFolder {
        table: String,
        folder: PathBuf,
        /// Id marker contents; `None` for a folder awaiting creation
        sys_id: Option<String>,
        /// The file, when the path points below the folder
        file: Option<PathBuf>,
    },
    /// `src/<table>/<Name>.<sys_id>.<field>.<ext>`
    LegacyDotted {
        table: String,
        sys_id: String,
        field: String,
        file: PathBuf,
    },
}

impl RecordLocation {
    pub fn table(&self) -> &str {
        match self {
            RecordLocation::MarkerFolder { table, .. } | RecordLocation::LegacyDotted { table, .. } => {
                table
            }
        }
    }

    pub fn sys_id(&self) -> Option<&str> {
        match self {
            RecordLocation::MarkerFolder { sys_id, .. } => sys_id.as_deref(),
            RecordLocation::LegacyDotted { sys_id, .. } => Some(sys_id),
        }
    }
}

/// Path below the workspace's `src/` directory, as plain components
pub fn relative_components(workspace: &Workspace, path: &Path) -> Option<Vec<String>> {
    let relative = match path.strip_prefix(workspace.src_dir()) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let canonical = path.canonicalize().ok()?;
            canonical.strip_prefix(workspace.src_dir()).ok()?.to_path_buf()
        }
    };
    relative
        .components()
        .map(|c| match c {
            Component::Normal(name) => name.to_str().map(str::to_string),
            _ => None,
        })
        .collect()
}

/// Resolve a path under `src/` to the record it belongs to.
pub fn locate(workspace: &Workspace, path: &Path) -> Option<RecordLocation> {
    let parts = relative_components(workspace, path)?;
    match parts.as_slice() {
        [table, name] => {
            let target = workspace.table_dir(table).join(name);
            if target.is_dir() {
                Some(RecordLocation::MarkerFolder {
                    table: table.clone(),
                    sys_id: read_id(&target),
                    folder: target,
                    file: None,
                })
            } else {
                parse_legacy_name(name).map(|(sys_id, field)| RecordLocation::LegacyDotted {
                    table: table.clone(),
                    sys_id,
                    field,
                    file: target,
                })
            }
        }
        [table, folder, file] => {
            let folder = workspace.table_dir(table).join(folder);
            Some(RecordLocation::MarkerFolder {
                table: table.clone(),
                sys_id: read_id(&folder),
                file: Some(folder.join(file)),
                folder,
            })
        }
        _ => None,
    }
}

/// `(table, sys_id)` of the record a file or folder belongs to
pub fn resolve_record(workspace: &Workspace, path: &Path) -> SnResult<(String, String)> {
    let location = locate(workspace, path).ok_or_else(|| {
        errors::not_found(
            path.display().to_string(),
            format!("{} is not inside a record folder under src/", path.display()),
        )
    })?;
    match location.sys_id() {
        Some(sys_id) => Ok((location.table().to_string(), sys_id.to_string())),
        None => Err(errors::not_found(
            path.display().to_string(),
            format!(
                "Could not identify .sys_id for {}. Ensure the folder has a .sys_id file",
                path.display()
            ),
        )),
    }
}

/// `Name.SysID.field.ext` -> `(sys_id, field)`
fn parse_legacy_name(file_name: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = file_name.split('.').collect();
    if parts.len() < 4 {
        return None;
    }
    let n = parts.len();
    let (sys_id, field) = (parts[n - 3], parts[n - 2]);
    if !SYS_ID.is_match(sys_id) || field.is_empty() {
        return None;
    }
    Some((sys_id.to_string(), field.to_string()))
}

fn context_header(display_name: &str) -> String {
    format!("# AI Context: {}\n\n> **Auto-generated context**\n\n", display_name)
}

/// Append tags to a record's context notes, creating the document when
/// missing. Returns the tags actually added.
pub fn append_context_tags(folder: &Path, display_name: &str, tags: &[String]) -> SnResult<Vec<String>> {
    if tags.is_empty() {
        return Ok(Vec::new());
    }
    let path = folder.join(CONTEXT_NOTES_FILE);
    let mut content = if path.exists() {
        fs::read_to_string(&path).with_path(&path)?
    } else {
        context_header(display_name)
    };

    let added: Vec<String> = tags
        .iter()
        .filter(|tag| !tag.is_empty() && !content.contains(tag.as_str()))
        .cloned()
        .collect();
    if added.is_empty() {
        return Ok(added);
    }
    let block: Vec<String> = added.iter().map(|t| format!("- **Context**: {}", t)).collect();
    content.push('\n');
    content.push_str(&block.join("\n"));
    content.push('\n');
    fs::write(&path, content).with_path(&path)?;
    Ok(added)
}

/// Write the bare context notes header unless the document exists.
pub fn seed_context_notes(folder: &Path, display_name: &str) -> SnResult<bool> {
    let path = folder.join(CONTEXT_NOTES_FILE);
    if path.exists() {
        return Ok(false);
    }
    fs::write(&path, context_header(display_name)).with_path(&path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Mapping;
    use tempfile::TempDir;

    fn workspace(dir: &TempDir) -> Workspace {
        Workspace::with_mapping(dir.path().canonicalize().unwrap(), Mapping::default())
    }

    #[test]
    fn safe_name_replaces_everything_but_word_chars() {
        assert_eq!(safe_name("My Widget (v2).x"), "My_Widget__v2__x");
        assert_eq!(safe_name("keep-this_1"), "keep-this_1");
        assert_eq!(safe_name("Ação"), "A__o");
    }

    #[test]
    fn legacy_names_need_a_real_sys_id() {
        assert_eq!(
            parse_legacy_name("My.Util.0123456789abcdef0123456789abcdef.script.js"),
            Some(("0123456789abcdef0123456789abcdef".into(), "script".into()))
        );
        assert_eq!(parse_legacy_name("a.b.c.d"), None);
        assert_eq!(parse_legacy_name("script.js"), None);
    }

    #[test]
    fn locate_reads_the_folder_marker() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        let folder = ws.table_dir("sys_script_include").join("Util");
        fs::create_dir_all(&folder).unwrap();
        write_id(&folder, "abc").unwrap();

        let loc = locate(&ws, &folder.join("script.js")).unwrap();
        assert_eq!(loc.table(), "sys_script_include");
        assert_eq!(loc.sys_id(), Some("abc"));

        let bare = ws.table_dir("sys_script_include").join("New");
        fs::create_dir_all(&bare).unwrap();
        assert_eq!(locate(&ws, &bare).unwrap().sys_id(), None);

        assert_eq!(locate(&ws, ws.src_dir()), None);
        assert_eq!(locate(&ws, Path::new("/elsewhere/file.js")), None);
    }

    #[test]
    fn context_tags_are_not_duplicated() {
        let dir = TempDir::new().unwrap();
        let tags = vec!["Auth".to_string(), "Hackathon".to_string()];
        assert_eq!(append_context_tags(dir.path(), "Util", &tags).unwrap().len(), 2);
        assert!(append_context_tags(dir.path(), "Util", &tags).unwrap().is_empty());

        let notes = fs::read_to_string(dir.path().join(CONTEXT_NOTES_FILE)).unwrap();
        assert!(notes.starts_with("# AI Context: Util\n"));
        assert_eq!(notes.matches("- **Context**: Auth").count(), 1);
        assert!(!seed_context_notes(dir.path(), "Util").unwrap());
    }
}
