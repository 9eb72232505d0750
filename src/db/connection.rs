use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

type LedgerTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum LedgerCommand {
    Run(LedgerTask),
    Shutdown,
}

struct LedgerWorker {
    sender: mpsc::Sender<LedgerCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for LedgerWorker {
    fn drop(&mut self) {
        let mut guard = match self.thread.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(LedgerCommand::Shutdown) {
                error!("Failed to send shutdown to ledger thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join ledger thread: {join_err:?}");
            }
        }
    }
}

fn open_ledger(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path).context("failed to open SQLite database")?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }
    if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
        error!("Failed to enable foreign keys: {err}");
    }

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A task that unwound mid-transaction must not leave the shared connection inside it.
fn roll_back_abandoned_transaction(conn: &Connection) {
    if conn.is_autocommit() {
        return;
    }
    match conn.execute_batch("ROLLBACK") {
        Ok(()) => warn!("Rolled back a transaction abandoned by a panicked ledger task"),
        Err(err) => error!("Failed to roll back abandoned transaction: {err}"),
    }
}

/// Handle to the ledger database.
///
/// A single worker thread owns the SQLite connection and every query is shipped to it as a
/// closure, so ledger writes are serialized. A closure that panics fails only its own call:
/// the caller gets an error, any transaction it opened is rolled back and the worker keeps
/// serving.
#[derive(Clone)]
pub struct Database {
    worker: Arc<LedgerWorker>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<LedgerCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let thread = thread::Builder::new()
            .name("phone-ledger-db".into())
            .spawn(move || {
                let mut conn = match open_ledger(&path_for_thread) {
                    Ok(conn) => {
                        if ready_tx.send(Ok(())).is_err() {
                            error!("Ledger opener dropped before ready signal");
                            return;
                        }
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                while let Ok(command) = command_rx.recv() {
                    match command {
                        LedgerCommand::Run(task) => task(&mut conn),
                        LedgerCommand::Shutdown => break,
                    }
                }

                info!("Ledger database thread shutting down");
            })
            .context("failed to spawn ledger database thread")?;

        ready_rx
            .recv()
            .context("ledger thread exited before signaling readiness")??;

        info!("Ledger database initialized at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(LedgerWorker {
                sender: command_tx,
                thread: Mutex::new(Some(thread)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Runs `task` on the ledger thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = LedgerCommand::Run(Box::new(move |conn| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| task(conn)))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    error!("Ledger task panicked: {message}");
                    roll_back_abandoned_transaction(conn);
                    Err(anyhow!("ledger task panicked: {message}"))
                });
            if reply_tx.send(result).is_err() {
                warn!("Ledger caller went away before receiving its result");
            }
        }));

        self.worker
            .sender
            .send(command)
            .map_err(|err| anyhow!("ledger thread is not accepting work: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("ledger thread dropped the request"))?
    }
}
