//! Process-wide registry record: owner, chain allow-list, fallback pointer.
//!
//! The registry is a single row created once by `initialize`. Every other
//! operation on a store fails with `NotFound("registry")` until then.

use crate::core::broker::DbBroker;
use crate::core::error::HarborError;
use crate::core::store::Store;
use crate::core::time;
use crate::harbor::events::{self, HarborEvent};
use crate::harbor::guard::{self, Owned};
use crate::harbor::limits;
use crate::harbor::types::Identity;
use rusqlite::{Connection, OptionalExtension, params};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub owner: Identity,
    pub fallback_registry: Option<String>,
    pub version: String,
    pub created_at: i64,
}

impl Owned for Registry {
    fn owner(&self) -> &Identity {
        &self.owner
    }
}

/// Effect of one `set_valid_chains` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainUpdate {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Adds of present ids and removes of absent ids.
    pub unchanged: Vec<String>,
}

pub fn version() -> &'static str {
    VERSION
}

pub fn initialize(store: &Store, owner: &Identity) -> Result<Registry, HarborError> {
    if owner.as_str().trim().is_empty() {
        return Err(HarborError::invalid_input("owner", "must not be empty"));
    }
    let broker = DbBroker::new(&store.root);
    broker.with_tx(&store.db_path(), owner.as_str(), "registry.initialize", |conn| {
        if load_optional(conn)?.is_some() {
            return Err(HarborError::AlreadyInitialized);
        }
        let registry = Registry {
            owner: owner.clone(),
            fallback_registry: None,
            version: VERSION.to_string(),
            created_at: time::now_epoch_secs(),
        };
        conn.execute(
            "INSERT INTO registry (id, owner, fallback_registry, version, created_at)
             VALUES (1, ?1, NULL, ?2, ?3)",
            params![registry.owner.as_str(), registry.version, registry.created_at],
        )?;
        events::emit(
            conn,
            &HarborEvent::RegistryInitialized {
                owner: owner.clone(),
            },
        )?;
        Ok(registry)
    })
}

pub fn registry(store: &Store) -> Result<Registry, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "registry.get", load)
}

pub(crate) fn load(conn: &Connection) -> Result<Registry, HarborError> {
    load_optional(conn)?.ok_or_else(|| HarborError::NotFound("registry".to_string()))
}

fn load_optional(conn: &Connection) -> Result<Option<Registry>, HarborError> {
    let registry = conn
        .query_row(
            "SELECT owner, fallback_registry, version, created_at FROM registry WHERE id = 1",
            [],
            |row| {
                Ok(Registry {
                    owner: Identity::from(row.get::<_, String>(0)?.as_str()),
                    fallback_registry: row.get(1)?,
                    version: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(registry)
}

/// Add then remove chain ids. Only the registry owner may call this.
pub fn set_valid_chains(
    store: &Store,
    caller: &Identity,
    add: &[String],
    remove: &[String],
) -> Result<ChainUpdate, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_tx(&store.db_path(), caller.as_str(), "registry.set_valid_chains", |conn| {
        let registry = load(conn)?;
        guard::require_owner(caller, &registry, "set_valid_chains")?;
        if let Some(empty) = add.iter().chain(remove).find(|id| id.is_empty()) {
            return Err(HarborError::InvalidChain(empty.clone()));
        }
        limits::check_write(&store.config.limits, "set_valid_chains", &(add, remove))?;

        let mut update = ChainUpdate::default();
        for id in add {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO valid_chains (chain_id) VALUES (?1)",
                params![id],
            )?;
            if inserted > 0 {
                events::emit(
                    conn,
                    &HarborEvent::ChainValiditySet {
                        chain_id: id.clone(),
                        valid: true,
                    },
                )?;
                update.added.push(id.clone());
            } else {
                update.unchanged.push(id.clone());
            }
        }
        for id in remove {
            let deleted =
                conn.execute("DELETE FROM valid_chains WHERE chain_id = ?1", params![id])?;
            if deleted > 0 {
                events::emit(
                    conn,
                    &HarborEvent::ChainValiditySet {
                        chain_id: id.clone(),
                        valid: false,
                    },
                )?;
                update.removed.push(id.clone());
            } else {
                update.unchanged.push(id.clone());
            }
        }
        Ok(update)
    })
}

pub fn is_chain_valid(store: &Store, chain_id: &str) -> Result<bool, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "registry.is_chain_valid", |conn| {
        load(conn)?;
        chain_is_valid(conn, chain_id)
    })
}

pub(crate) fn chain_is_valid(conn: &Connection, chain_id: &str) -> Result<bool, HarborError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM valid_chains WHERE chain_id = ?1",
            params![chain_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Allow-listed chain ids in insertion order. The order is for display only.
pub fn list_valid_chains(store: &Store) -> Result<Vec<String>, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "registry.list_valid_chains", |conn| {
        load(conn)?;
        list_in(conn)
    })
}

fn list_in(conn: &Connection) -> Result<Vec<String>, HarborError> {
    let mut stmt = conn.prepare("SELECT chain_id FROM valid_chains ORDER BY position")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Snapshot of the allow-list for planning batched writes.
pub fn valid_chain_set(store: &Store) -> Result<FxHashSet<String>, HarborError> {
    Ok(list_valid_chains(store)?.into_iter().collect())
}

pub fn set_fallback_registry(
    store: &Store,
    caller: &Identity,
    fallback: Option<&str>,
) -> Result<(), HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_tx(&store.db_path(), caller.as_str(), "registry.set_fallback", |conn| {
        let registry = load(conn)?;
        guard::require_owner(caller, &registry, "set_fallback_registry")?;
        if fallback.is_some_and(str::is_empty) {
            return Err(HarborError::invalid_input(
                "fallback_registry",
                "must not be empty; pass none to clear",
            ));
        }
        conn.execute(
            "UPDATE registry SET fallback_registry = ?1 WHERE id = 1",
            params![fallback],
        )?;
        events::emit(
            conn,
            &HarborEvent::FallbackRegistrySet {
                fallback: fallback.map(str::to_string),
            },
        )
    })
}

pub fn fallback_registry(store: &Store) -> Result<Option<String>, HarborError> {
    Ok(registry(store)?.fallback_registry)
}
