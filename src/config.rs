use std::time::Duration;

// Project layout (all relative to the explicit project root)
pub const MAPPING_FILE_NAME: &str = "sn-config.json";
pub const ENV_FILE_NAME: &str = ".env";
pub const TOKEN_CACHE_FILE_NAME: &str = ".token_cache.json";
pub const SOURCE_DIRECTORY: &str = "src";

// Record folder contents
pub const ID_MARKER: &str = ".sys_id";
pub const VERSION_MARKER: &str = ".sys_updated_on";
pub const CONTEXT_DIRECTORY: &str = ".ai_context";
pub const CONTEXT_NOTES_FILE: &str = "_ai_context.md";
pub const RECORD_JSON_FILE: &str = "_record.json";
pub const PROPERTIES_JSON_FILE: &str = "_properties.json";
pub const LEGACY_META_JSON_FILE: &str = "meta.json";
/// The one table whose metadata document is `_properties.json`
pub const PROPERTIES_TABLE: &str = "sys_properties";
pub const DEFAULT_FIELD_EXTENSION: &str = "txt";

// Remote field names
pub const SYS_ID_FIELD: &str = "sys_id";
pub const VERSION_FIELD: &str = "sys_updated_on";
pub const UPDATED_BY_FIELD: &str = "sys_updated_by";
/// Name-like fields, in the order used to derive folder names
pub const NAME_FIELDS: [&str; 3] = ["name", "u_name", "short_description"];
pub const DEFAULT_RECORD_NAME: &str = "Record";

pub const PULL_RECORD_LIMIT: usize = 100;
pub const DICTIONARY_LIMIT: usize = 500;
/// Filter written for tables added through reference auto-discovery
pub const CONTEXT_ONLY_FILTER: &str = "sys_idISNOTEMPTY";

// Credential lifecycle
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(20 * 60);
pub const TOUCH_DEBOUNCE: Duration = Duration::from_secs(10);
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const REDIRECT_URI: &str = "http://localhost:3000/callback";

// Environment variables of the credentials document
pub const INSTANCE_ENV: &str = "SN_INSTANCE";
pub const USER_ENV: &str = "SN_USER";
pub const PASSWORD_ENV: &str = "SN_PASSWORD";
pub const CLIENT_ID_ENV: &str = "SN_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "SN_CLIENT_SECRET";
pub const ENC_SECRET_ENV: &str = "SN_ENC_SECRET";

/// Extensions the watcher reacts to
pub const WATCHED_EXTENSIONS: [&str; 7] = ["js", "html", "css", "xml", "scss", "json", "txt"];
