//! Command-line surface

pub mod handlers;
pub mod parser;

pub use handlers::Session;
pub use parser::{Cli, Commands};
