use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &str) -> Result<Connection, error::HarborError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::HarborError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::HarborError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::HarborError::RusqliteError)?;
    Ok(conn)
}

pub fn harbor_db_path(root: &Path) -> PathBuf {
    root.join(schemas::HARBOR_DB_NAME)
}

pub fn initialize_harbor_db(root: &Path) -> Result<(), error::HarborError> {
    let db_path = harbor_db_path(root);
    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).map_err(error::HarborError::IoError)?;
    }

    let broker = DbBroker::new(root);
    broker.with_conn(&db_path, "safe-harbor", "harbor.init", |conn| {
        conn.execute_batch(schemas::HARBOR_DB_SCHEMA)?;
        Ok(())
    })
}
