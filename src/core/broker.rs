use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

/// The DB Broker is the single write path into the store.
/// Requests are serialized in-process; SQLite locking covers other processes.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

static DB_LOCK: Mutex<()> = Mutex::new(());

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: audit_log_path(root),
        }
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::HarborError>
    where
        F: FnOnce(&Connection) -> Result<R, error::HarborError>,
    {
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let conn = db::db_connect(&db_path.to_string_lossy())?;

        let result = f(&conn);

        // The transaction is already settled; audit failures are only logged.
        if let Err(err) = self.log_event(actor, op_name, &db_id, result.as_ref().err()) {
            warn!(
                op = op_name,
                path = %self.audit_log_path.display(),
                error = %err,
                "failed to append broker audit event"
            );
        }
        result
    }

    /// Like [`DbBroker::with_conn`], but the closure runs inside one transaction
    /// that commits only when it returns `Ok`.
    pub fn with_tx<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::HarborError>
    where
        F: FnOnce(&Connection) -> Result<R, error::HarborError>,
    {
        self.with_conn(db_path, actor, op_name, |conn| {
            let tx = conn.unchecked_transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    fn log_event(
        &self,
        actor: &str,
        op: &str,
        db_id: &str,
        failure: Option<&error::HarborError>,
    ) -> Result<(), error::HarborError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: if failure.is_some() { "error" } else { "success" }.to_string(),
            error_code: failure.map(|e| e.code().to_string()),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::HarborError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(error::HarborError::IoError)?;
        Ok(())
    }
}

pub fn audit_log_path(root: &Path) -> PathBuf {
    root.join(AUDIT_LOG_NAME)
}

/// Read the audit log back, skipping lines that fail to parse.
pub fn read_audit_log(root: &Path) -> Result<Vec<BrokerEvent>, error::HarborError> {
    let path = audit_log_path(root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
