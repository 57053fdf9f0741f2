// crates/open-mem-server/src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// Database access always goes through `pool.interact()` (anyhow) or
// `pool.run()` (MemError) closures executed on the blocking thread pool.
// WAL mode gives multiple readers + one writer; busy_timeout absorbs
// short write contention, and `run_with_retry` handles the rest.

use crate::error::MemError;
use crate::utils::path_to_string;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Registers sqlite-vec extension globally (once per process).
/// Must be called before any SQLite connections are opened.
static SQLITE_VEC_INIT: Once = Once::new();

#[allow(clippy::missing_transmute_annotations)]
pub(crate) fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init matches the signature expected by
        // sqlite3_auto_extension; the pointer targets a statically linked
        // symbol that lives for the whole process.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered globally");
    });
}

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Check if a MemError wraps a SQLite contention error.
fn is_mem_contention(err: &MemError) -> bool {
    match err {
        MemError::Db(e) => is_rusqlite_contention(e),
        _ => false,
    }
}

/// Retry delays for SQLite contention backoff.
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// Which schema to run on open.
#[derive(Clone, Copy)]
enum DbKind {
    /// Per-project database: sessions, observations, queue, graph, indexes.
    Project { embedding_dimension: usize },
    /// Cross-project user database.
    User,
}

/// File path or shared in-memory URI.
enum DbStorage {
    File(PathBuf),
    InMemory { label: &'static str },
}

/// Database pool wrapper with sqlite-vec support and per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
    /// Whether the vec0 virtual table exists on this database.
    vector_index: bool,
}

impl DatabasePool {
    /// Open a pooled project database at the given path.
    pub async fn open(path: &Path, embedding_dimension: usize) -> Result<Self> {
        Self::open_internal(
            DbStorage::File(path.to_path_buf()),
            DbKind::Project {
                embedding_dimension,
            },
        )
        .await
    }

    /// Open a pooled in-memory project database (for tests).
    ///
    /// Uses a shared-cache URI so every pooled connection sees the same
    /// database state.
    pub async fn open_in_memory(embedding_dimension: usize) -> Result<Self> {
        Self::open_internal(
            DbStorage::InMemory { label: "memdb" },
            DbKind::Project {
                embedding_dimension,
            },
        )
        .await
    }

    /// Open the cross-project user database at the given path.
    pub async fn open_user_db(path: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf()), DbKind::User).await
    }

    /// Open a pooled in-memory user database (for tests).
    pub async fn open_user_db_in_memory() -> Result<Self> {
        Self::open_internal(DbStorage::InMemory { label: "memdb_user" }, DbKind::User).await
    }

    async fn open_internal(storage: DbStorage, kind: DbKind) -> Result<Self> {
        ensure_sqlite_vec_registered();

        let (conn_str, path, memory_uri, hook) = match storage {
            DbStorage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = path_to_string(&p);
                let hook = make_file_post_create_hook(p.clone());
                (s, Some(p), None, hook)
            }
            DbStorage::InMemory { label } => {
                let uri = format!(
                    "file:{}_{:?}?mode=memory&cache=shared",
                    label,
                    uuid::Uuid::new_v4()
                );
                let hook = make_memory_post_create_hook();
                (uri.clone(), None, Some(uri), hook)
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let mut db_pool = Self {
            pool,
            path,
            memory_uri,
            vector_index: false,
        };

        // Backup before migrations (file-based DBs only)
        if let Some(ref db_path) = db_pool.path
            && let Err(e) = Self::backup_before_migration(db_path)
        {
            tracing::warn!("Pre-migration backup failed (continuing anyway): {}", e);
        }

        db_pool.run_migrations(kind).await?;

        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether the vec0 vector index exists on this database.
    /// False means vector search runs in fallback (in-memory cosine) mode.
    pub fn has_vector_index(&self) -> bool {
        self.vector_index
    }

    /// Run a closure with a connection from the pool.
    ///
    /// This is the primary API for database access. The closure runs on a
    /// blocking thread pool, so it won't block the async runtime.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure on a pooled connection, logging errors at debug but
    /// not propagating. Use for low-priority best-effort operations.
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{}: {}", label, e);
                None
            }
        }
    }

    /// Run a closure that may return a rusqlite::Error.
    pub async fn interact_raw<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.interact(move |conn| f(conn).map_err(Into::into)).await
    }

    /// Run a closure and return `Result<T, MemError>` for tool handlers.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, MemError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<MemError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| MemError::Other(format!("Failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| MemError::Other(format!("Database error: {}", e)))?
    }

    /// Like [`run`](Self::run) but with retry on SQLite contention errors.
    ///
    /// Backoff 100ms/500ms/2s. Use for critical writes that must not be
    /// lost (capture enqueue, observation persistence, session close).
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> Result<R, MemError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<MemError> + Send + 'static,
    {
        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            match self.run(f.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if is_mem_contention(&e) => {
                    tracing::warn!(
                        "SQLite contention on attempt {}/{}, retrying in {:?}",
                        attempt + 1,
                        RETRY_DELAYS.len(),
                        delay
                    );
                    tokio::time::sleep(*delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.run(f).await
    }

    /// Create a backup of the database before running migrations.
    /// Uses SQLite's VACUUM INTO for an atomic, consistent backup.
    /// Keeps at most one backup per database (overwrites previous).
    fn backup_before_migration(path: &Path) -> Result<()> {
        use std::fs;

        let backup_path = path.with_extension("db.pre-migration");
        if !path.exists() {
            return Ok(());
        }

        // Direct connection: the pool isn't ready yet at this point
        let conn = rusqlite::Connection::open(path).context("Failed to open DB for backup")?;
        let _ = fs::remove_file(&backup_path);
        conn.execute("VACUUM INTO ?1", [backup_path.to_string_lossy().as_ref()])
            .context("Failed to create pre-migration backup")?;

        tracing::info!("Created pre-migration backup: {}", backup_path.display());
        Ok(())
    }

    async fn run_migrations(&mut self, kind: DbKind) -> Result<()> {
        let has_vec = self
            .interact(move |conn| {
                match kind {
                    DbKind::Project {
                        embedding_dimension,
                    } => super::schema::run_project_migrations(conn, embedding_dimension)?,
                    DbKind::User => super::schema::run_user_migrations(conn)?,
                }
                if let Err(e) = conn.execute_batch("PRAGMA optimize") {
                    tracing::debug!("PRAGMA optimize skipped: {}", e);
                }
                Ok(super::migration_helpers::table_exists(
                    conn,
                    "vec_observations",
                ))
            })
            .await?;
        self.vector_index = has_vec;
        Ok(())
    }
}

/// Ensure parent directory exists with secure permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
        #[cfg(not(unix))]
        tracing::debug!(
            "Skipping directory permission restriction on non-Unix platform: {}",
            parent.display()
        );
    }
    Ok(())
}

/// Create a post_create hook for file-based databases.
///
/// Sets up PRAGMAs via `setup_connection` and restricts file permissions
/// to 0o600.
fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }
                #[cfg(not(unix))]
                tracing::debug!(
                    "Skipping DB file permission restriction on non-Unix platform: {}",
                    path_for_perms.display()
                );

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Create a post_create hook for in-memory databases.
///
/// WAL mode is not applicable to in-memory DBs.
fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Configure a connection after it's created.
/// WAL for reader/writer concurrency, 5s busy timeout, NORMAL synchronous
/// (safe with WAL, fewer fsyncs).
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA journal_size_limit=32768;",
    )?;
    Ok(())
}
