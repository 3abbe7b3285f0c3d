use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use super::schema::initialize_schema;
use crate::types::error::InboxError;

pub type DbPool = Pool<SqliteConnectionManager>;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA temp_store = MEMORY;
     PRAGMA foreign_keys = ON;";

/// Pool over a database file, creating parent directories as needed
pub fn create_pool(db_path: &Path) -> Result<DbPool, InboxError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| conn.execute_batch(PRAGMAS));
    let pool = Pool::builder().max_size(4).build(manager)?;

    let conn = pool.get()?;
    initialize_schema(&conn)?;
    Ok(pool)
}

/// Single-connection in-memory pool
///
/// Every new connection opens its own empty database, so the one connection
/// is never reaped or replaced.
pub fn create_memory_pool() -> Result<DbPool, InboxError> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .max_lifetime(None)
        .idle_timeout(None)
        .build(manager)?;

    let conn = pool.get()?;
    initialize_schema(&conn)?;
    Ok(pool)
}
