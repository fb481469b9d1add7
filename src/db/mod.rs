use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task;
use crate::error::{Result, KycError};

/// Idle connections kept around for reuse.
const MAX_IDLE_CONNECTIONS: usize = 8;

/// Database connection wrapper
///
/// Cheap to clone; clones share the idle connection pool. Each closure runs on
/// tokio's blocking pool with exclusive use of one connection, so the wrapper
/// is safe to share between concurrent callers.
#[derive(Clone)]
pub struct Db {
    path: PathBuf,
    idle: Arc<Mutex<Vec<Connection>>>,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with optimized pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        open_with_pragmas(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let idle = Arc::clone(&self.idle);
        task::spawn_blocking(move || {
            let pooled = idle.lock().ok().and_then(|mut conns| conns.pop());
            let mut conn = match pooled {
                Some(conn) => conn,
                None => open_with_pragmas(&path)?,
            };

            let result = f(&mut conn);

            // Connections left mid-transaction are dropped instead of pooled.
            if conn.is_autocommit() {
                if let Ok(mut conns) = idle.lock() {
                    if conns.len() < MAX_IDLE_CONNECTIONS {
                        conns.push(conn);
                    }
                }
            }
            result
        })
        .await
        .map_err(|e| KycError::GraphUnavailable(format!("database worker failed: {}", e)))?
    }
}

fn open_with_pragmas(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(KycError::Database)?;

    // WAL mode so readers never block on the ingestion writer, NORMAL sync for speed,
    // foreign keys for integrity, temp_store = MEMORY for faster temp operations,
    // cache_size = -65536 (64MB cache), mmap_size = 268435456 (256MB memory-mapped I/O)
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY; \
         PRAGMA cache_size = -65536; \
         PRAGMA mmap_size = 268435456; \
         PRAGMA wal_autocheckpoint = 1000;"
    )?;
    conn.busy_timeout(Duration::from_millis(2000))?;

    Ok(conn)
}

pub mod migrate;
