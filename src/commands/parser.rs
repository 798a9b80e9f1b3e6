//! Command-line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "snsync",
    about = "Keep a local file tree in sync with ServiceNow table records",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Project root holding sn-config.json and .env (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub project: Option<PathBuf>,

    /// Log filter, e.g. `warn` or `snsync=trace` (defaults to RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Download records into src/<table>/<record>/
    Pull {
        /// Only this mapped table
        #[arg(long)]
        table: Option<String>,
        /// Encoded query replacing the configured filter
        #[arg(long)]
        query: Option<String>,
        /// Refresh only the record this file or folder belongs to
        #[arg(long, value_name = "PATH", conflicts_with_all = ["table", "query"])]
        target: Option<PathBuf>,
        /// Context tags for the pulled records (repeat or comma separate)
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Upload a field file, a record folder or a table's new records
    Push {
        /// File or folder to push
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
        /// Table of the record folder (or the whole table when no name is given)
        #[arg(long)]
        table: Option<String>,
        /// Record folder name inside --table
        #[arg(long, requires = "table")]
        name: Option<String>,
        /// Create every pending record folder of every table
        #[arg(long, conflicts_with_all = ["path", "table"])]
        all: bool,
    },

    /// Open the record behind a file or folder in the browser
    Open {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Push files as they are saved
    Watch,

    /// Forget the cached OAuth token
    Logout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_accepts_comma_separated_tags() {
        let cli = Cli::try_parse_from([
            "snsync", "pull", "--table", "incident", "--query", "active=true", "--tag", "Auth,Hackathon",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Commands::Pull {
                table: Some("incident".into()),
                query: Some("active=true".into()),
                target: None,
                tags: vec!["Auth".into(), "Hackathon".into()],
            }
        );
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::try_parse_from(["snsync", "watch", "--project", "/tmp/p", "--log-level", "warn"]).unwrap();
        assert_eq!(cli.project, Some(PathBuf::from("/tmp/p")));
        assert_eq!(cli.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn name_requires_table_and_all_stands_alone() {
        assert!(Cli::try_parse_from(["snsync", "push", "--name", "Util"]).is_err());
        assert!(Cli::try_parse_from(["snsync", "push", "--all", "--table", "x"]).is_err());
        assert!(Cli::try_parse_from(["snsync", "push", "--all"]).is_ok());
    }
}
