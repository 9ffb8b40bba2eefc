//! Database schema for the registry's single SQLite store.
//!
//! One file (`harbor.db`) holds the registry row, the chain allow-list,
//! agreements with their chains and accounts, the adoption arena with its
//! current-pointer index, and the event log.

pub const HARBOR_DB_NAME: &str = "harbor.db";

pub const HARBOR_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS registry (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        owner TEXT NOT NULL,
        fallback_registry TEXT,
        version TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS valid_chains (
        position INTEGER PRIMARY KEY AUTOINCREMENT,
        chain_id TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS agreements (
        id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        protocol_name TEXT NOT NULL,
        contact_details TEXT NOT NULL, -- JSON array of {name, contact}
        bounty_terms TEXT NOT NULL,    -- JSON object
        agreement_uri TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS agreement_chains (
        agreement_id TEXT NOT NULL,
        chain_id TEXT NOT NULL,
        asset_recovery_address TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (agreement_id, chain_id),
        FOREIGN KEY (agreement_id) REFERENCES agreements(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS agreement_accounts (
        agreement_id TEXT NOT NULL,
        chain_id TEXT NOT NULL,
        account_address TEXT NOT NULL,
        child_contract_scope TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (agreement_id, chain_id, account_address),
        FOREIGN KEY (agreement_id, chain_id)
            REFERENCES agreement_chains(agreement_id, chain_id) ON DELETE CASCADE
    );

    -- Append-only arena. No foreign key on agreement_id: history outlives closed agreements.
    CREATE TABLE IF NOT EXISTS adoption_history (
        adopter TEXT NOT NULL,
        seq INTEGER NOT NULL,
        agreement_id TEXT NOT NULL,
        record_key TEXT NOT NULL,
        ts INTEGER NOT NULL,
        previous_seq INTEGER,
        PRIMARY KEY (adopter, seq)
    );

    CREATE TABLE IF NOT EXISTS adoption_bindings (
        record_key TEXT PRIMARY KEY,
        adopter TEXT NOT NULL,
        agreement_id TEXT NOT NULL,
        first_adopted_at INTEGER NOT NULL,
        last_adopted_at INTEGER NOT NULL,
        times_adopted INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS current_adoptions (
        adopter TEXT PRIMARY KEY,
        agreement_id TEXT NOT NULL,
        record_key TEXT NOT NULL,
        head_seq INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_current_adoptions_agreement
        ON current_adoptions(agreement_id);

    CREATE TABLE IF NOT EXISTS events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL UNIQUE,
        ts INTEGER NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL -- JSON
    );
";
