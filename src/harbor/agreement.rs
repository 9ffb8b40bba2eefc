//! Agreement records: protocol identity, contacts, per-chain scope, bounty terms.
//!
//! Every mutation runs as one broker transaction: load the header and check
//! the caller against the current owner before anything else, then validate
//! and size-check the payload, apply it, bump `updated_at`, and emit
//! `AgreementUpdated`. A failed check rolls the whole call back.
//!
//! `add_chains` and `add_accounts` are merges keyed by chain id and account
//! address, so resubmitting a batch never duplicates entries.

use crate::core::broker::DbBroker;
use crate::core::config::CloseAdoptedPolicy;
use crate::core::error::HarborError;
use crate::core::store::Store;
use crate::core::time;
use crate::harbor::adoption::{self, AdoptionRecord};
use crate::harbor::events::{self, HarborEvent};
use crate::harbor::guard::{self, Owned};
use crate::harbor::limits;
use crate::harbor::registry;
use crate::harbor::types::{
    self, AccountInScope, AgreementId, AgreementParams, AgreementSnapshot, BountyTerms, Chain,
    ChildContractScope, Contact, Identity,
};
use rusqlite::{Connection, OptionalExtension, params};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

pub(crate) struct AgreementHeader {
    pub id: AgreementId,
    pub owner: Identity,
}

impl Owned for AgreementHeader {
    fn owner(&self) -> &Identity {
        &self.owner
    }
}

/// What a merge operation actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub chains_added: Vec<String>,
    pub accounts_added: usize,
    pub accounts_skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementSummary {
    pub id: AgreementId,
    pub owner: Identity,
    pub protocol_name: String,
    pub chain_count: usize,
}

/// Create an agreement in one write. Every chain id must be allow-listed;
/// the first one that is not fails the call with `InvalidChain`.
///
/// `caller` pays for the record and need not be `owner`.
pub fn create(
    store: &Store,
    caller: &Identity,
    owner: &Identity,
    params: &AgreementParams,
) -> Result<AgreementId, HarborError> {
    prepare_create(store, owner, params)?;
    let broker = DbBroker::new(&store.root);
    broker.with_tx(&store.db_path(), caller.as_str(), "agreement.create", |conn| {
        insert_agreement(conn, owner, params)
    })
}

/// Create an agreement and adopt it as `caller` in the same transaction.
pub fn create_and_adopt(
    store: &Store,
    caller: &Identity,
    owner: &Identity,
    params: &AgreementParams,
) -> Result<(AgreementId, AdoptionRecord), HarborError> {
    prepare_create(store, owner, params)?;
    let broker = DbBroker::new(&store.root);
    broker.with_tx(
        &store.db_path(),
        caller.as_str(),
        "agreement.create_and_adopt",
        |conn| {
            let id = insert_agreement(conn, owner, params)?;
            let record = adoption::adopt_in(conn, caller, &id)?;
            Ok((id, record))
        },
    )
}

fn prepare_create(
    store: &Store,
    owner: &Identity,
    params: &AgreementParams,
) -> Result<(), HarborError> {
    if owner.as_str().trim().is_empty() {
        return Err(HarborError::invalid_input("owner", "must not be empty"));
    }
    params.validate()?;
    limits::check_write(&store.config.limits, "create", params)?;
    Ok(())
}

fn insert_agreement(
    conn: &Connection,
    owner: &Identity,
    params: &AgreementParams,
) -> Result<AgreementId, HarborError> {
    registry::load(conn)?;
    for chain in &params.chains {
        if !registry::chain_is_valid(conn, &chain.chain_id)? {
            return Err(HarborError::InvalidChain(chain.chain_id.clone()));
        }
    }

    let id = AgreementId::generate();
    let now = time::now_epoch_secs();
    conn.execute(
        "INSERT INTO agreements
            (id, owner, protocol_name, contact_details, bounty_terms, agreement_uri, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id.as_str(),
            owner.as_str(),
            params.protocol_name,
            serde_json::to_string(&params.contact_details)?,
            serde_json::to_string(&params.bounty_terms)?,
            params.agreement_uri,
            now,
        ],
    )?;
    merge_chains_in(conn, &id, types::merge_chains(params.chains.clone()))?;
    events::emit(
        conn,
        &HarborEvent::AgreementUpdated {
            agreement: id.clone(),
            op: "create".to_string(),
        },
    )?;
    Ok(id)
}

pub fn fetch(store: &Store, id: &AgreementId) -> Result<AgreementSnapshot, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "agreement.fetch", |conn| {
        registry::load(conn)?;
        load_snapshot(conn, id)
    })
}

pub fn exists(store: &Store, id: &AgreementId) -> Result<bool, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "agreement.exists", |conn| {
        registry::load(conn)?;
        Ok(load_header_optional(conn, id)?.is_some())
    })
}

pub fn chain_ids(store: &Store, id: &AgreementId) -> Result<Vec<String>, HarborError> {
    Ok(fetch(store, id)?
        .chains
        .into_iter()
        .map(|c| c.chain_id)
        .collect())
}

pub fn list_agreements(store: &Store) -> Result<Vec<AgreementSummary>, HarborError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "safe-harbor", "agreement.list", |conn| {
        registry::load(conn)?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.owner, a.protocol_name,
                    (SELECT COUNT(*) FROM agreement_chains c WHERE c.agreement_id = a.id)
             FROM agreements a ORDER BY a.created_at, a.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AgreementSummary {
                id: AgreementId::from(row.get::<_, String>(0)?),
                owner: Identity::from(row.get::<_, String>(1)?.as_str()),
                protocol_name: row.get(2)?,
                chain_count: row.get::<_, i64>(3)?.max(0) as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

pub fn set_protocol_name(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    protocol_name: &str,
) -> Result<(), HarborError> {
    mutate(store, caller, id, "set_protocol_name", &protocol_name, |conn, header| {
        types::validate_protocol_name(protocol_name)?;
        conn.execute(
            "UPDATE agreements SET protocol_name = ?1 WHERE id = ?2",
            params![protocol_name, header.id.as_str()],
        )?;
        Ok(())
    })
}

pub fn set_agreement_uri(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    agreement_uri: &str,
) -> Result<(), HarborError> {
    mutate(store, caller, id, "set_agreement_uri", &agreement_uri, |conn, header| {
        types::validate_agreement_uri(agreement_uri)?;
        conn.execute(
            "UPDATE agreements SET agreement_uri = ?1 WHERE id = ?2",
            params![agreement_uri, header.id.as_str()],
        )?;
        Ok(())
    })
}

pub fn set_bounty_terms(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    terms: &BountyTerms,
) -> Result<(), HarborError> {
    mutate(store, caller, id, "set_bounty_terms", terms, |conn, header| {
        terms.validate()?;
        conn.execute(
            "UPDATE agreements SET bounty_terms = ?1 WHERE id = ?2",
            params![serde_json::to_string(terms)?, header.id.as_str()],
        )?;
        Ok(())
    })
}

/// Replace the contact list wholesale.
pub fn set_contact_details(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    contacts: &[Contact],
) -> Result<(), HarborError> {
    mutate(store, caller, id, "set_contact_details", contacts, |conn, header| {
        conn.execute(
            "UPDATE agreements SET contact_details = ?1 WHERE id = ?2",
            params![serde_json::to_string(contacts)?, header.id.as_str()],
        )?;
        Ok(())
    })
}

pub fn set_asset_recovery_address(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    chain_id: &str,
    address: &str,
) -> Result<(), HarborError> {
    mutate(
        store,
        caller,
        id,
        "set_asset_recovery_address",
        &(chain_id, address),
        |conn, header| {
            require_chain(conn, &header.id, chain_id)?;
            conn.execute(
                "UPDATE agreement_chains SET asset_recovery_address = ?1
                 WHERE agreement_id = ?2 AND chain_id = ?3",
                params![address, header.id.as_str(), chain_id],
            )?;
            Ok(())
        },
    )
}

/// Merge chains into the agreement. New ids append an entry; ids already
/// present keep their entry and recovery address and gain only accounts they
/// do not already list.
pub fn add_chains(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    chains: &[Chain],
) -> Result<MergeOutcome, HarborError> {
    mutate(store, caller, id, "add_chains", chains, |conn, header| {
        for chain in chains {
            if !registry::chain_is_valid(conn, &chain.chain_id)? {
                return Err(HarborError::InvalidChain(chain.chain_id.clone()));
            }
        }
        merge_chains_in(conn, &header.id, types::merge_chains(chains.to_vec()))
    })
}

/// Replace existing chain entries wholesale, accounts included.
pub fn set_chains(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    chains: &[Chain],
) -> Result<(), HarborError> {
    mutate(store, caller, id, "set_chains", chains, |conn, header| {
        for chain in types::merge_chains(chains.to_vec()) {
            if !registry::chain_is_valid(conn, &chain.chain_id)? {
                return Err(HarborError::InvalidChain(chain.chain_id.clone()));
            }
            require_chain(conn, &header.id, &chain.chain_id)?;
            conn.execute(
                "DELETE FROM agreement_accounts WHERE agreement_id = ?1 AND chain_id = ?2",
                params![header.id.as_str(), chain.chain_id],
            )?;
            conn.execute(
                "UPDATE agreement_chains SET asset_recovery_address = ?1
                 WHERE agreement_id = ?2 AND chain_id = ?3",
                params![chain.asset_recovery_address, header.id.as_str(), chain.chain_id],
            )?;
            merge_accounts_in(conn, &header.id, &chain.chain_id, &chain.accounts)?;
        }
        Ok(())
    })
}

/// Remove chain entries and their accounts. All ids must be present; repeated
/// ids are removed once.
pub fn remove_chains(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    chain_ids: &[String],
) -> Result<(), HarborError> {
    mutate(store, caller, id, "remove_chains", chain_ids, |conn, header| {
        let mut seen = FxHashSet::default();
        for chain_id in chain_ids.iter().filter(|c| seen.insert(c.as_str())) {
            require_chain(conn, &header.id, chain_id)?;
            conn.execute(
                "DELETE FROM agreement_chains WHERE agreement_id = ?1 AND chain_id = ?2",
                params![header.id.as_str(), chain_id],
            )?;
        }
        Ok(())
    })
}

/// Append accounts to a chain already on the agreement, skipping addresses it
/// already lists.
pub fn add_accounts(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    chain_id: &str,
    accounts: &[AccountInScope],
) -> Result<MergeOutcome, HarborError> {
    mutate(
        store,
        caller,
        id,
        "add_accounts",
        &(chain_id, accounts),
        |conn, header| {
            require_chain(conn, &header.id, chain_id)?;
            let (added, skipped) = merge_accounts_in(conn, &header.id, chain_id, accounts)?;
            Ok(MergeOutcome {
                chains_added: Vec::new(),
                accounts_added: added,
                accounts_skipped: skipped,
            })
        },
    )
}

pub fn remove_account(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    chain_id: &str,
    account_address: &str,
) -> Result<(), HarborError> {
    mutate(
        store,
        caller,
        id,
        "remove_account",
        &(chain_id, account_address),
        |conn, header| {
            require_chain(conn, &header.id, chain_id)?;
            let deleted = conn.execute(
                "DELETE FROM agreement_accounts
                 WHERE agreement_id = ?1 AND chain_id = ?2 AND account_address = ?3",
                params![header.id.as_str(), chain_id, account_address],
            )?;
            if deleted == 0 {
                return Err(HarborError::NotFound(format!(
                    "account {} on chain {} of agreement {}",
                    account_address, chain_id, header.id
                )));
            }
            Ok(())
        },
    )
}

/// Hand the agreement to `new_owner`. The call itself is checked against the
/// current owner; the next call is checked against `new_owner`.
pub fn transfer_ownership(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    new_owner: &Identity,
) -> Result<(), HarborError> {
    mutate(store, caller, id, "transfer_ownership", new_owner, |conn, header| {
        if new_owner.as_str().trim().is_empty() {
            return Err(HarborError::invalid_input("new_owner", "must not be empty"));
        }
        conn.execute(
            "UPDATE agreements SET owner = ?1 WHERE id = ?2",
            params![new_owner.as_str(), header.id.as_str()],
        )?;
        events::emit(
            conn,
            &HarborEvent::OwnershipTransferred {
                agreement: header.id.clone(),
                previous_owner: header.owner.clone(),
                new_owner: new_owner.clone(),
            },
        )
    })
}

/// Delete the agreement with its chains and accounts. Adoption history that
/// points at it is kept and resolves as dangling afterwards.
pub fn close(store: &Store, caller: &Identity, id: &AgreementId) -> Result<(), HarborError> {
    let policy = store.config.agreement.close_adopted;
    let broker = DbBroker::new(&store.root);
    broker.with_tx(&store.db_path(), caller.as_str(), "agreement.close", |conn| {
        registry::load(conn)?;
        let header = load_header(conn, id)?;
        guard::require_owner(caller, &header, "close")?;

        let adopters = adoption::current_adopter_count(conn, id)?;
        if adopters > 0 && policy == CloseAdoptedPolicy::Blocked {
            return Err(HarborError::AgreementInUse {
                agreement: id.to_string(),
                adopters,
            });
        }
        conn.execute("DELETE FROM agreements WHERE id = ?1", params![id.as_str()])?;
        events::emit(
            conn,
            &HarborEvent::AgreementClosed {
                agreement: id.clone(),
            },
        )
    })
}

fn mutate<P, F, R>(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    op: &str,
    payload: &P,
    f: F,
) -> Result<R, HarborError>
where
    P: Serialize + ?Sized,
    F: FnOnce(&Connection, &AgreementHeader) -> Result<R, HarborError>,
{
    let broker = DbBroker::new(&store.root);
    let op_name = format!("agreement.{}", op);
    broker.with_tx(&store.db_path(), caller.as_str(), &op_name, |conn| {
        registry::load(conn)?;
        let header = load_header(conn, id)?;
        guard::require_owner(caller, &header, op)?;
        limits::check_write(&store.config.limits, op, payload)?;
        let value = f(conn, &header)?;
        conn.execute(
            "UPDATE agreements SET updated_at = ?1 WHERE id = ?2",
            params![time::now_epoch_secs(), id.as_str()],
        )?;
        events::emit(
            conn,
            &HarborEvent::AgreementUpdated {
                agreement: id.clone(),
                op: op.to_string(),
            },
        )?;
        Ok(value)
    })
}

pub(crate) fn load_header(
    conn: &Connection,
    id: &AgreementId,
) -> Result<AgreementHeader, HarborError> {
    load_header_optional(conn, id)?
        .ok_or_else(|| HarborError::NotFound(format!("agreement {}", id)))
}

fn load_header_optional(
    conn: &Connection,
    id: &AgreementId,
) -> Result<Option<AgreementHeader>, HarborError> {
    let owner = conn
        .query_row(
            "SELECT owner FROM agreements WHERE id = ?1",
            params![id.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(owner.map(|owner| AgreementHeader {
        id: id.clone(),
        owner: Identity::from(owner.as_str()),
    }))
}

pub(crate) fn load_snapshot(
    conn: &Connection,
    id: &AgreementId,
) -> Result<AgreementSnapshot, HarborError> {
    let row = conn
        .query_row(
            "SELECT owner, protocol_name, contact_details, bounty_terms, agreement_uri,
                    created_at, updated_at
             FROM agreements WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            },
        )
        .optional()?;
    let Some((owner, protocol_name, contacts, terms, agreement_uri, created_at, updated_at)) = row
    else {
        return Err(HarborError::NotFound(format!("agreement {}", id)));
    };

    let mut chains = {
        let mut stmt = conn.prepare(
            "SELECT chain_id, asset_recovery_address FROM agreement_chains
             WHERE agreement_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok(Chain {
                chain_id: row.get(0)?,
                asset_recovery_address: row.get(1)?,
                accounts: Vec::new(),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let mut stmt = conn.prepare(
        "SELECT account_address, child_contract_scope FROM agreement_accounts
         WHERE agreement_id = ?1 AND chain_id = ?2 ORDER BY position",
    )?;
    for chain in &mut chains {
        let rows = stmt.query_map(params![id.as_str(), chain.chain_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (account_address, scope) = row?;
            chain.accounts.push(AccountInScope {
                account_address,
                child_contract_scope: ChildContractScope::parse(&scope)?,
            });
        }
    }

    Ok(AgreementSnapshot {
        id: id.clone(),
        owner: Identity::from(owner.as_str()),
        protocol_name,
        contact_details: serde_json::from_str(&contacts)?,
        chains,
        bounty_terms: serde_json::from_str(&terms)?,
        agreement_uri,
        created_at,
        updated_at,
    })
}

fn require_chain(conn: &Connection, id: &AgreementId, chain_id: &str) -> Result<(), HarborError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM agreement_chains WHERE agreement_id = ?1 AND chain_id = ?2",
            params![id.as_str(), chain_id],
            |_| Ok(()),
        )
        .optional()?;
    if found.is_none() {
        return Err(HarborError::UnknownChain {
            agreement: id.to_string(),
            chain_id: chain_id.to_string(),
        });
    }
    Ok(())
}

/// `chains` must already be deduplicated by chain id.
fn merge_chains_in(
    conn: &Connection,
    id: &AgreementId,
    chains: Vec<Chain>,
) -> Result<MergeOutcome, HarborError> {
    let mut outcome = MergeOutcome::default();
    let mut position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM agreement_chains WHERE agreement_id = ?1",
        params![id.as_str()],
        |row| row.get(0),
    )?;

    for chain in chains {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO agreement_chains
                (agreement_id, chain_id, asset_recovery_address, position)
             VALUES (?1, ?2, ?3, ?4)",
            params![id.as_str(), chain.chain_id, chain.asset_recovery_address, position],
        )?;
        if inserted > 0 {
            position += 1;
            outcome.chains_added.push(chain.chain_id.clone());
        }
        let (added, skipped) = merge_accounts_in(conn, id, &chain.chain_id, &chain.accounts)?;
        outcome.accounts_added += added;
        outcome.accounts_skipped += skipped;
    }
    Ok(outcome)
}

fn merge_accounts_in(
    conn: &Connection,
    id: &AgreementId,
    chain_id: &str,
    accounts: &[AccountInScope],
) -> Result<(usize, usize), HarborError> {
    let mut position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM agreement_accounts
         WHERE agreement_id = ?1 AND chain_id = ?2",
        params![id.as_str(), chain_id],
        |row| row.get(0),
    )?;

    let (mut added, mut skipped) = (0, 0);
    for account in accounts {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO agreement_accounts
                (agreement_id, chain_id, account_address, child_contract_scope, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                chain_id,
                account.account_address,
                account.child_contract_scope.as_str(),
                position
            ],
        )?;
        if inserted > 0 {
            position += 1;
            added += 1;
        } else {
            skipped += 1;
        }
    }
    Ok((added, skipped))
}
