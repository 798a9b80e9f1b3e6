//! Command execution against one resolved project

use super::parser::Commands;
use crate::api::{authenticator_for, record_url, TableClient};
use crate::auth::{CredentialManager, OAuthClient, OAuthConfig, TokenCipher, TokenStore};
use crate::error::{errors, SnResult};
use crate::project::{Credentials, Workspace};
use crate::sync::{
    resolve_record, PullEngine, PullOptions, PullReport, PushEngine, PushReport, TerminalPrompter,
    WatchController,
};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything a command needs, resolved once from the project root
pub struct Session {
    workspace: Workspace,
    credentials: Credentials,
    client: TableClient,
}

impl Session {
    /// Open the project at `root`. Credentials must already be in the environment.
    pub fn open(root: &Path) -> SnResult<Self> {
        let workspace = Workspace::open(root)?;
        let credentials = Credentials::from_env()?;
        debug!(
            "Project {} on {} ({} auth)",
            workspace.root().display(),
            credentials.instance,
            credentials.auth_mode()
        );
        let client = TableClient::new(
            &credentials.instance,
            authenticator_for(&workspace, &credentials),
        )?;
        Ok(Self {
            workspace,
            credentials,
            client,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run one command. `Ok(false)` means it finished with per-item failures.
    pub async fn execute(&mut self, command: Commands) -> SnResult<bool> {
        match command {
            Commands::Pull {
                table,
                query,
                target,
                tags,
            } => {
                let prompter = TerminalPrompter::detect();
                let mut engine = PullEngine::new(&self.client, &mut self.workspace, prompter.as_ref());
                let report = match target {
                    Some(target) => engine.pull_target(&absolute(&target), tags).await?,
                    None => engine.pull(&PullOptions { table, query, tags }).await?,
                };
                Ok(summarize_pull(&report))
            }
            Commands::Push {
                path,
                table,
                name,
                all,
            } => {
                let engine = PushEngine::new(&self.client, &self.workspace);
                let report = match (path, table) {
                    (Some(path), table) => engine.push_path(&absolute(&path), table.as_deref()).await?,
                    (None, Some(table)) => engine.push_named(&table, name.as_deref()).await?,
                    (None, None) if all => engine.push_all_new().await?,
                    (None, None) => {
                        return Err(errors::validation_error(
                            "Nothing to push. Usage: push <PATH> | push --table T [--name N] | push --all",
                            None,
                            None,
                        ))
                    }
                };
                Ok(summarize_push(&report))
            }
            Commands::Open { path } => {
                let (table, sys_id) = resolve_record(&self.workspace, &absolute(&path))?;
                let url = record_url(&self.credentials.instance, &table, &sys_id);
                println!("🚀 Opening: {}", url);
                if let Err(e) = open::that(&url) {
                    warn!("Could not open a browser: {}", e);
                }
                Ok(true)
            }
            Commands::Watch => {
                let engine = PushEngine::new(&self.client, &self.workspace);
                WatchController::new(&self.workspace, engine).run().await?;
                Ok(true)
            }
            Commands::Logout => {
                let store = TokenStore::new(
                    self.workspace.token_cache_file(),
                    TokenCipher::new(self.credentials.enc_secret.as_deref()),
                );
                let manager = CredentialManager::new(
                    store,
                    OAuthClient::new(OAuthConfig::for_instance(&self.credentials)),
                    self.credentials.auth_mode(),
                );
                manager.logout()?;
                println!("{} Token cache removed", "✅".green());
                Ok(true)
            }
        }
    }
}

/// Resolve a command-line path against the working directory.
fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    })
}

fn summarize_pull(report: &PullReport) -> bool {
    println!(
        "\n{} {} records across {} tables, {} context snapshots",
        "Pulled".bold(),
        report.records_written,
        report.tables.len(),
        report.contexts.len()
    );
    if !report.failures.is_empty() {
        println!("{} {} failures:", "⚠️".yellow(), report.failures.len());
        for failure in &report.failures {
            println!("   - {}: {}", failure.target, failure.error.user_message());
        }
    }
    report.failures.is_empty()
}

fn summarize_push(report: &PushReport) -> bool {
    if report.created() + report.updated() > 0 || !report.is_clean() {
        println!(
            "\n{} {} updated, {} created, {} failed",
            "Pushed".bold(),
            report.updated(),
            report.created(),
            report.failures.len()
        );
    }
    for failure in &report.failures {
        println!("   - {}: {}", failure.target.display(), failure.error.user_message());
    }
    report.is_clean()
}
