//! Events emitted for external indexers.
//!
//! Events are written in the same transaction as the state change they
//! describe, so a rolled-back operation never leaves an event behind.

use crate::core::broker::DbBroker;
use crate::core::error::HarborError;
use crate::core::store::Store;
use crate::core::time;
use crate::harbor::registry;
use crate::harbor::types::{AgreementId, Identity};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HarborEvent {
    RegistryInitialized {
        owner: Identity,
    },
    ChainValiditySet {
        chain_id: String,
        valid: bool,
    },
    FallbackRegistrySet {
        fallback: Option<String>,
    },
    AgreementUpdated {
        agreement: AgreementId,
        op: String,
    },
    OwnershipTransferred {
        agreement: AgreementId,
        previous_owner: Identity,
        new_owner: Identity,
    },
    AgreementClosed {
        agreement: AgreementId,
    },
    AgreementAdopted {
        agreement: AgreementId,
        adopter: Identity,
        timestamp: i64,
        previous: Option<AgreementId>,
    },
}

impl HarborEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HarborEvent::RegistryInitialized { .. } => "registry_initialized",
            HarborEvent::ChainValiditySet { .. } => "chain_validity_set",
            HarborEvent::FallbackRegistrySet { .. } => "fallback_registry_set",
            HarborEvent::AgreementUpdated { .. } => "agreement_updated",
            HarborEvent::OwnershipTransferred { .. } => "ownership_transferred",
            HarborEvent::AgreementClosed { .. } => "agreement_closed",
            HarborEvent::AgreementAdopted { .. } => "agreement_adopted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: i64,
    pub event_id: String,
    pub ts: i64,
    pub event: HarborEvent,
}

pub(crate) fn emit(conn: &Connection, event: &HarborEvent) -> Result<(), HarborError> {
    let payload = serde_json::to_string(event)?;
    conn.execute(
        "INSERT INTO events (event_id, ts, kind, payload) VALUES (?1, ?2, ?3, ?4)",
        params![time::new_event_id(), time::now_epoch_secs(), event.kind(), payload],
    )?;
    Ok(())
}

/// Events in emission order, optionally filtered by kind.
pub fn list(store: &Store, kind: Option<&str>) -> Result<Vec<EventRecord>, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "events.list", |conn| {
        registry::load(conn)?;
        let mut stmt = conn.prepare(
            "SELECT seq, event_id, ts, payload FROM events
             WHERE (?1 IS NULL OR kind = ?1) ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![kind], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, event_id, ts, payload) = row?;
            out.push(EventRecord {
                seq,
                event_id,
                ts,
                event: serde_json::from_str(&payload)?,
            });
        }
        Ok(out)
    })
}
