// src/db/mod.rs
// Storage layer: pooled SQLite access, schema, and typed per-family operations

pub mod embeddings;
pub mod observations;
pub mod pool;
pub mod retention;
pub mod schema;
pub mod search;
pub mod sessions;
pub mod types;

pub use pool::DatabasePool;

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::Connection;

    /// In-memory connection with the full schema applied, for unit tests
    /// that exercise the sync layer directly.
    #[allow(clippy::unwrap_used)]
    pub fn setup_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        super::schema::run_migrations(&conn).unwrap();
        conn
    }
}
