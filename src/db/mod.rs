mod from_row;
mod schema;
mod store;
pub mod queries;

pub use schema::init_db;
pub use store::{Deadline, Store};

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::reconcile::ReconciliationEngine;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub engine: Arc<ReconciliationEngine>,
    /// Shared secret for webhook signatures. Empty means unconfigured.
    pub webhook_secret: String,
}

/// Per-connection settings. Foreign keys are off by default in SQLite. The busy
/// timeout here only covers direct pool users; `Store` narrows it per operation.
fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(configure_connection);
    Pool::builder().max_size(10).build(manager)
}

/// Single-connection in-memory pool. Every checkout sees the same database,
/// which a larger in-memory pool would not guarantee.
pub fn create_memory_pool() -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::memory().with_init(configure_connection);
    Pool::builder().max_size(1).build(manager)
}
