//! Push-on-save

use super::layout::{has_id_marker, in_context_namespace};
use super::push::PushEngine;
use crate::config::WATCHED_EXTENSIONS;
use crate::error::{errors, SnResult, SnSyncError};
use crate::project::Workspace;
use colored::Colorize;
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// What a changed file asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    /// The file sits in a folder awaiting creation
    Create { table: String, folder: PathBuf },
    /// Regular push of the path
    Push(PathBuf),
    Ignore,
}

/// Route a changed path. Pure apart from the id-marker lookup.
pub fn route(workspace: &Workspace, path: &Path) -> WatchAction {
    let watched = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| WATCHED_EXTENSIONS.contains(&ext));
    if !watched || in_context_namespace(path) {
        return WatchAction::Ignore;
    }

    if let Some(folder) = path.parent() {
        if !has_id_marker(folder) {
            let table_dir = folder.parent();
            let table = table_dir
                .and_then(|dir| dir.file_name())
                .and_then(|name| name.to_str());
            if let Some(table) = table {
                let has_fields = workspace
                    .table(table)
                    .is_some_and(|config| !config.fields.is_empty());
                if has_fields && table_dir.and_then(Path::parent) == Some(workspace.src_dir()) {
                    return WatchAction::Create {
                        table: table.to_string(),
                        folder: folder.to_path_buf(),
                    };
                }
            }
        }
    }
    WatchAction::Push(path.to_path_buf())
}

/// Events that can mean "a file now holds new content". Editors that save
/// atomically write a temp file and rename it over the target, so the target
/// only ever sees a create or a rename.
fn is_change_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

/// Collapses the several events one save produces into a single push.
#[derive(Debug, Default)]
pub struct SaveTracker {
    seen: HashMap<PathBuf, (SystemTime, u64)>,
}

impl SaveTracker {
    /// True when `path` is a file whose modification time or size differs
    /// from the last accepted event. Vanished paths are never new.
    pub fn is_new_save(&mut self, path: &Path) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        if !meta.is_file() {
            return false;
        }
        let stamp = (meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), meta.len());
        if self.seen.get(path) == Some(&stamp) {
            debug!("Duplicate save event for {}", path.display());
            return false;
        }
        self.seen.insert(path.to_path_buf(), stamp);
        true
    }
}

pub struct WatchController<'a> {
    workspace: &'a Workspace,
    engine: PushEngine<'a>,
}

impl<'a> WatchController<'a> {
    pub fn new(workspace: &'a Workspace, engine: PushEngine<'a>) -> Self {
        Self { workspace, engine }
    }

    /// Watch `src/` until interrupted. Events are handled one at a time.
    pub async fn run(&self) -> SnResult<()> {
        let src = self.workspace.src_dir().to_path_buf();
        if !src.is_dir() {
            return Err(errors::not_found(
                src.display().to_string(),
                format!("Nothing to watch: {} does not exist. Pull first", src.display()),
            ));
        }

        let (tx, mut rx) = mpsc::channel(100);
        spawn_file_watcher(src.clone(), tx).await?;
        let mut saves = SaveTracker::default();

        println!("👀 Monitoring: {}", src.display());
        println!("   (Edit files and save to push; new records are created on save)");

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if !is_change_event(&event) {
                        continue;
                    }
                    for path in &event.paths {
                        if !saves.is_new_save(path) {
                            continue;
                        }
                        self.handle(path).await?;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("\n{}", "Stopped watching.".dimmed());
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle(&self, path: &Path) -> SnResult<()> {
        let result = match route(self.workspace, path) {
            WatchAction::Ignore => return Ok(()),
            WatchAction::Create { table, folder } => {
                self.engine.create_record(&table, &folder).await.map(|_| ())
            }
            WatchAction::Push(path) => self.engine.push_path(&path, None).await.map(|_| ()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Push of {} failed: {}", path.display(), e);
                eprintln!("   {} {}", "🔥".red(), e.user_message());
                Ok(())
            }
        }
    }
}

/// Start the watcher thread and wait until it is registered on `root`, so a
/// setup failure reaches the caller instead of dying with the thread.
pub async fn spawn_file_watcher(root: PathBuf, tx: mpsc::Sender<Event>) -> SnResult<()> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let path = root.display().to_string();
    std::thread::spawn(move || run_file_watcher(root, tx, ready_tx));
    ready_rx.await.unwrap_or_else(|_| {
        Err(SnSyncError::Filesystem {
            message: "File watcher thread exited during startup".into(),
            path,
            source: None,
        })
    })
}

fn run_file_watcher(
    root: PathBuf,
    tx: mpsc::Sender<Event>,
    ready: oneshot::Sender<SnResult<()>>,
) {
    let alive = tx.clone();
    let watcher = match start_watcher(&root, tx) {
        Ok(watcher) => watcher,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    // Keep the watcher alive until the receiving side goes away
    while !alive.is_closed() {
        std::thread::sleep(Duration::from_millis(500));
    }
    drop(watcher);
}

fn start_watcher(root: &Path, tx: mpsc::Sender<Event>) -> SnResult<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.blocking_send(event);
            }
            Err(e) => debug!("Watch error: {}", e),
        },
        Config::default().with_poll_interval(Duration::from_secs(1)),
    )
    .map_err(|e| watch_error(root, e))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| watch_error(root, e))?;
    Ok(watcher)
}

fn watch_error(root: &Path, err: notify::Error) -> SnSyncError {
    SnSyncError::Filesystem {
        message: format!("Failed to watch directory: {err}"),
        path: root.display().to_string(),
        source: Some(Box::new(err)),
    }
}
