//! Adoption index: which agreement each adopter currently endorses, plus the
//! full history of its adoptions.
//!
//! History is an append-only arena keyed by `(adopter, seq)`; each record
//! links to the one it superseded. The current pointer lives in its own table
//! so `resolve` is a single keyed read and never walks history.
//!
//! The binding for an `(adopter, agreement)` pair sits at [`record_key`], a
//! hash of the pair, so its location is computable without a scan.

use crate::core::broker::DbBroker;
use crate::core::error::HarborError;
use crate::core::store::Store;
use crate::core::time;
use crate::harbor::agreement;
use crate::harbor::events::{self, HarborEvent};
use crate::harbor::guard;
use crate::harbor::registry;
use crate::harbor::types::{AgreementId, Identity};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const RECORD_KEY_DOMAIN: &str = "adoption";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoptionRecord {
    pub adopter: Identity,
    pub agreement: AgreementId,
    pub seq: i64,
    pub timestamp: i64,
    /// Sequence number of the record this one superseded.
    pub previous: Option<i64>,
    pub record_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoptionBinding {
    pub record_key: String,
    pub adopter: Identity,
    pub agreement: AgreementId,
    pub first_adopted_at: i64,
    pub last_adopted_at: i64,
    pub times_adopted: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "agreement", rename_all = "snake_case")]
pub enum AdoptionStatus {
    Unadopted,
    Adopted(AgreementId),
    /// The current agreement has been closed since it was adopted.
    Dangling(AgreementId),
}

impl AdoptionStatus {
    pub fn agreement(&self) -> Option<&AgreementId> {
        match self {
            AdoptionStatus::Unadopted => None,
            AdoptionStatus::Adopted(id) | AdoptionStatus::Dangling(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentAdoption {
    pub adopter: Identity,
    pub agreement: AgreementId,
    pub head_seq: i64,
}

/// Deterministic, collision-free location of the `(adopter, agreement)` binding.
/// Each part is length-prefixed so no two distinct pairs hash the same input.
pub fn record_key(adopter: &Identity, agreement: &AgreementId) -> String {
    let mut hasher = Sha256::new();
    for part in [RECORD_KEY_DOMAIN, adopter.as_str(), agreement.as_str()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Bind `adopter` to `agreement`. Self-service: the caller must be the adopter.
pub fn adopt(
    store: &Store,
    caller: &Identity,
    adopter: &Identity,
    agreement: &AgreementId,
) -> Result<AdoptionRecord, HarborError> {
    guard::require_identity(caller, adopter, "adopt")?;
    let broker = DbBroker::new(&store.root);
    broker.with_tx(&store.db_path(), caller.as_str(), "adoption.adopt", |conn| {
        adopt_in(conn, adopter, agreement)
    })
}

pub(crate) fn adopt_in(
    conn: &Connection,
    adopter: &Identity,
    agreement: &AgreementId,
) -> Result<AdoptionRecord, HarborError> {
    if adopter.as_str().trim().is_empty() {
        return Err(HarborError::invalid_input("adopter", "must not be empty"));
    }
    registry::load(conn)?;
    agreement::load_header(conn, agreement)?;

    let head = load_current(conn, adopter)?;
    let previous = match &head {
        Some(current) => Some(load_record(conn, adopter, current.head_seq)?),
        None => None,
    };

    let now = time::now_epoch_secs();
    let record = AdoptionRecord {
        adopter: adopter.clone(),
        agreement: agreement.clone(),
        seq: previous.as_ref().map_or(1, |p| p.seq + 1),
        timestamp: previous.as_ref().map_or(now, |p| now.max(p.timestamp)),
        previous: previous.as_ref().map(|p| p.seq),
        record_key: record_key(adopter, agreement),
    };

    conn.execute(
        "INSERT INTO adoption_history
            (adopter, seq, agreement_id, record_key, ts, previous_seq)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            adopter.as_str(),
            record.seq,
            agreement.as_str(),
            record.record_key,
            record.timestamp,
            record.previous
        ],
    )?;
    conn.execute(
        "INSERT INTO adoption_bindings
            (record_key, adopter, agreement_id, first_adopted_at, last_adopted_at, times_adopted)
         VALUES (?1, ?2, ?3, ?4, ?4, 1)
         ON CONFLICT(record_key) DO UPDATE SET
            last_adopted_at = excluded.last_adopted_at,
            times_adopted = times_adopted + 1",
        params![
            record.record_key,
            adopter.as_str(),
            agreement.as_str(),
            record.timestamp
        ],
    )?;
    conn.execute(
        "INSERT INTO current_adoptions (adopter, agreement_id, record_key, head_seq)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(adopter) DO UPDATE SET
            agreement_id = excluded.agreement_id,
            record_key = excluded.record_key,
            head_seq = excluded.head_seq",
        params![
            adopter.as_str(),
            agreement.as_str(),
            record.record_key,
            record.seq
        ],
    )?;

    events::emit(
        conn,
        &HarborEvent::AgreementAdopted {
            agreement: agreement.clone(),
            adopter: adopter.clone(),
            timestamp: record.timestamp,
            previous: previous.map(|p| p.agreement),
        },
    )?;
    Ok(record)
}

/// O(1) lookup of what `adopter` currently endorses.
pub fn resolve(store: &Store, adopter: &Identity) -> Result<AdoptionStatus, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "adoption.resolve", |conn| {
        registry::load(conn)?;
        let Some(current) = load_current(conn, adopter)? else {
            return Ok(AdoptionStatus::Unadopted);
        };
        let live = conn
            .query_row(
                "SELECT 1 FROM agreements WHERE id = ?1",
                params![current.agreement.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(if live {
            AdoptionStatus::Adopted(current.agreement)
        } else {
            AdoptionStatus::Dangling(current.agreement)
        })
    })
}

/// Adoption records for `adopter`, newest first, following `previous` links.
pub fn history(store: &Store, adopter: &Identity) -> Result<Vec<AdoptionRecord>, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "adoption.history", |conn| {
        registry::load(conn)?;
        let mut out = Vec::new();
        let mut next = load_current(conn, adopter)?.map(|c| c.head_seq);
        while let Some(seq) = next {
            let record = load_record(conn, adopter, seq)?;
            next = record.previous;
            out.push(record);
        }
        Ok(out)
    })
}

pub fn record(store: &Store, adopter: &Identity, seq: i64) -> Result<AdoptionRecord, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "adoption.record", |conn| {
        registry::load(conn)?;
        load_record(conn, adopter, seq)
    })
}

pub fn binding(
    store: &Store,
    adopter: &Identity,
    agreement: &AgreementId,
) -> Result<Option<AdoptionBinding>, HarborError> {
    let key = record_key(adopter, agreement);
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "adoption.binding", |conn| {
        registry::load(conn)?;
        let binding = conn
            .query_row(
                "SELECT adopter, agreement_id, first_adopted_at, last_adopted_at, times_adopted
                 FROM adoption_bindings WHERE record_key = ?1",
                params![key],
                |row| {
                    Ok(AdoptionBinding {
                        record_key: key.clone(),
                        adopter: Identity::from(row.get::<_, String>(0)?.as_str()),
                        agreement: AgreementId::from(row.get::<_, String>(1)?),
                        first_adopted_at: row.get(2)?,
                        last_adopted_at: row.get(3)?,
                        times_adopted: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(binding)
    })
}

pub fn list_adopters(store: &Store) -> Result<Vec<CurrentAdoption>, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "adoption.list", |conn| {
        registry::load(conn)?;
        let mut stmt = conn.prepare(
            "SELECT adopter, agreement_id, head_seq FROM current_adoptions ORDER BY adopter",
        )?;
        let rows = stmt.query_map([], current_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

pub fn adopters_of(store: &Store, agreement: &AgreementId) -> Result<Vec<Identity>, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "adoption.adopters_of", |conn| {
        registry::load(conn)?;
        let mut stmt = conn.prepare(
            "SELECT adopter FROM current_adoptions WHERE agreement_id = ?1 ORDER BY adopter",
        )?;
        let rows = stmt.query_map(params![agreement.as_str()], |row| {
            Ok(Identity::from(row.get::<_, String>(0)?.as_str()))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

pub(crate) fn current_adopter_count(
    conn: &Connection,
    agreement: &AgreementId,
) -> Result<usize, HarborError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM current_adoptions WHERE agreement_id = ?1",
        params![agreement.as_str()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as usize)
}

fn load_current(
    conn: &Connection,
    adopter: &Identity,
) -> Result<Option<CurrentAdoption>, HarborError> {
    let current = conn
        .query_row(
            "SELECT adopter, agreement_id, head_seq FROM current_adoptions WHERE adopter = ?1",
            params![adopter.as_str()],
            current_from_row,
        )
        .optional()?;
    Ok(current)
}

fn current_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CurrentAdoption> {
    Ok(CurrentAdoption {
        adopter: Identity::from(row.get::<_, String>(0)?.as_str()),
        agreement: AgreementId::from(row.get::<_, String>(1)?),
        head_seq: row.get(2)?,
    })
}

fn load_record(
    conn: &Connection,
    adopter: &Identity,
    seq: i64,
) -> Result<AdoptionRecord, HarborError> {
    conn.query_row(
        "SELECT agreement_id, record_key, ts, previous_seq FROM adoption_history
         WHERE adopter = ?1 AND seq = ?2",
        params![adopter.as_str(), seq],
        |row| {
            Ok(AdoptionRecord {
                adopter: adopter.clone(),
                agreement: AgreementId::from(row.get::<_, String>(0)?),
                seq,
                record_key: row.get(1)?,
                timestamp: row.get(2)?,
                previous: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| HarborError::NotFound(format!("adoption record {} #{}", adopter, seq)))
}
