use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

use super::{merge_fields, migrations::run_migrations, Document, DocumentStore};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// SQLite-backed document store.
///
/// The connection lives on a dedicated thread; async callers hand it closures
/// and await the reply over a oneshot channel.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let location = db_path.display().to_string();
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("attendance-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&db_path) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Document store opened at {location}");

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }
}

fn read_document(conn: &Connection, collection: &str, key: &str) -> Result<Option<Document>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
            params![collection, key],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read document")?;

    body.map(|raw| {
        serde_json::from_str::<Document>(&raw)
            .with_context(|| format!("document {collection}/{key} is not a JSON object"))
    })
    .transpose()
}

fn write_document(conn: &Connection, collection: &str, key: &str, document: &Document) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let body = serde_json::to_string(document)?;
    conn.execute(
        "INSERT INTO documents (collection, key, body, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        params![collection, key, body, now],
    )
    .with_context(|| format!("failed to write document {collection}/{key}"))?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let collection = collection.to_string();
        let key = key.to_string();
        self.execute(move |conn| read_document(conn, &collection, &key))
            .await
    }

    async fn set(&self, collection: &str, key: &str, document: Document) -> Result<()> {
        let collection = collection.to_string();
        let key = key.to_string();
        self.execute(move |conn| write_document(conn, &collection, &key, &document))
            .await
    }

    async fn update(&self, collection: &str, key: &str, partial: Document) -> Result<()> {
        let collection = collection.to_string();
        let key = key.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let Some(mut existing) = read_document(&tx, &collection, &key)? else {
                bail!("no document to update: {collection}/{key}");
            };
            merge_fields(&mut existing, partial);
            write_document(&tx, &collection, &key, &existing)?;
            tx.commit().context("failed to commit document update")?;
            Ok(())
        })
        .await
    }
}
