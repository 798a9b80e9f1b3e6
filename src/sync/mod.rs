//! Sync engine: pull, push, schema capture and watch

pub mod layout;
pub mod prompt;
pub mod pull;
pub mod push;
pub mod schema;
pub mod watch;

pub use layout::{resolve_record, RecordLocation};
pub use prompt::{NonInteractive, Prompter, TerminalPrompter};
pub use pull::{PullEngine, PullOptions, PullReport};
pub use push::{PushEngine, PushOutcome, PushPlan, PushReport};
pub use schema::{SchemaCapture, SchemaSnapshot};
pub use watch::{WatchAction, WatchController};
