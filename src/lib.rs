//! Safe Harbor: a registry of security-disclosure agreements.
//!
//! Protocols publish an **agreement** describing what whitehats may do during
//! an active exploit: which accounts on which chains are in scope, where
//! recovered funds go, and what bounty they may keep. Adopters bind
//! themselves to one agreement at a time; every adoption is kept as history.
//!
//! # Architecture
//!
//! All state lives in one store root (`harbor.db` plus `broker.events.jsonl`).
//! Every read and write goes through `DbBroker`, which serializes access,
//! wraps mutations in a transaction, and appends an audit line per call.
//!
//! Mutations are bounded: a payload larger than `limits.max_write_bytes`
//! is rejected, so large agreements are built incrementally
//! ([`harbor::construct`]).
//!
//! # Crate Structure
//!
//! - [`core`]: store, broker, configuration, errors, and schema
//! - [`harbor`]: registry, agreements, adoptions, and batched construction

mod cli;
pub mod core;
pub mod harbor;

use crate::cli::{AgreementCommand, ChainsCommand, Cli, Command, FallbackCommand};
use crate::core::error::HarborError;
use crate::core::output;
use crate::core::store::Store;
use crate::core::time;
use crate::harbor::construct::ConstructionReport;
use crate::harbor::document::{AccountDocument, AgreementDocument, BountyDocument, ChainDocument};
use crate::harbor::types::{AgreementId, Contact, Identity};
use crate::harbor::{adoption, agreement, construct, events, registry};

use clap::Parser;
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use std::path::Path;
use std::process::ExitCode;

/// Exit status for a construction that left planned parts missing.
pub const EXIT_PARTIAL: u8 = 2;

/// Parse arguments, run one command, and print its envelope on stdout.
pub fn run() -> Result<ExitCode, HarborError> {
    let cli = Cli::parse();
    if let Command::Version = cli.command {
        return emit("version", json!({ "version": registry::version() }));
    }
    let store = Store::open(&cli.store)?;
    let caller = cli.caller.as_deref();

    match cli.command {
        Command::Version => emit("version", json!({ "version": registry::version() })),
        Command::Init { owner } => {
            let registry = registry::initialize(&store, &Identity::new(owner)?)?;
            emit("init", json!({ "registry": registry }))
        }
        Command::Chains(chains) => match chains.command {
            ChainsCommand::Add { ids } => {
                let update = registry::set_valid_chains(&store, &require_caller(caller)?, &ids, &[])?;
                emit("chains.add", json!({ "update": update }))
            }
            ChainsCommand::Remove { ids } => {
                let update = registry::set_valid_chains(&store, &require_caller(caller)?, &[], &ids)?;
                emit("chains.remove", json!({ "update": update }))
            }
            ChainsCommand::List => {
                let chains = registry::list_valid_chains(&store)?;
                emit("chains.list", json!({ "chains": chains }))
            }
            ChainsCommand::Check { id } => {
                let valid = registry::is_chain_valid(&store, &id)?;
                emit("chains.check", json!({ "chain_id": id, "valid": valid }))
            }
        },
        Command::Fallback(fallback) => match fallback.command {
            FallbackCommand::Set { registry: target, clear } => {
                let target = if clear { None } else { target };
                registry::set_fallback_registry(&store, &require_caller(caller)?, target.as_deref())?;
                emit("fallback.set", json!({ "fallback_registry": target }))
            }
            FallbackCommand::Show => {
                let target = registry::fallback_registry(&store)?;
                emit("fallback.show", json!({ "fallback_registry": target }))
            }
        },
        Command::Agreement(cmd) => run_agreement(&store, caller, cmd.command),
        Command::Adopt { agreement } => {
            let caller = require_caller(caller)?;
            let record = adoption::adopt(&store, &caller, &caller, &AgreementId::from(agreement))?;
            emit("adopt", json!({ "adoption": record }))
        }
        Command::Resolve { adopter } => {
            let status = adoption::resolve(&store, &Identity::new(adopter)?)?;
            emit("resolve", json!({ "adoption": status }))
        }
        Command::History { adopter } => {
            let history = adoption::history(&store, &Identity::new(adopter)?)?;
            emit("history", json!({ "history": history }))
        }
        Command::Adopters { agreement } => match agreement {
            Some(id) => {
                let adopters = adoption::adopters_of(&store, &AgreementId::from(id.as_str()))?;
                emit("adopters", json!({ "agreement": id, "adopters": adopters }))
            }
            None => {
                let adopters = adoption::list_adopters(&store)?;
                emit("adopters", json!({ "adopters": adopters }))
            }
        },
        Command::Events { kind } => {
            let events = events::list(&store, kind.as_deref())?;
            emit("events", json!({ "events": events }))
        }
    }
}

fn run_agreement(
    store: &Store,
    caller: Option<&str>,
    command: AgreementCommand,
) -> Result<ExitCode, HarborError> {
    match command {
        AgreementCommand::Create {
            file,
            owner,
            direct,
            adopt,
        } => {
            let caller = require_caller(caller)?;
            let owner = match owner {
                Some(owner) => Identity::new(owner)?,
                None => caller.clone(),
            };
            let params = AgreementDocument::read(&file)?.into_params()?;

            if direct {
                if adopt {
                    let (id, record) = agreement::create_and_adopt(store, &caller, &owner, &params)?;
                    return emit("agreement.create", json!({ "agreement": id, "adoption": record }));
                }
                let id = agreement::create(store, &caller, &owner, &params)?;
                return emit("agreement.create", json!({ "agreement": id }));
            }

            if owner != caller {
                return Err(HarborError::invalid_input(
                    "owner",
                    "batched construction writes as the owner; pass --direct to create for someone else",
                ));
            }
            let report = construct::build(store, &owner, &params)?;
            let record = if adopt && report.is_complete() {
                Some(adoption::adopt(store, &caller, &caller, &report.agreement)?)
            } else {
                None
            };
            emit_report("agreement.create", &report, json!({ "adoption": record }))
        }
        AgreementCommand::Resume { id, file } => {
            let params = AgreementDocument::read(&file)?.into_params()?;
            let report = construct::resume(
                store,
                &require_caller(caller)?,
                &AgreementId::from(id),
                &params,
            )?;
            emit_report("agreement.resume", &report, json!({}))
        }
        AgreementCommand::Show { id, document } => {
            let snapshot = agreement::fetch(store, &AgreementId::from(id))?;
            if document {
                let doc = AgreementDocument::from_snapshot(&snapshot);
                emit("agreement.show", json!({ "document": doc }))
            } else {
                emit("agreement.show", json!({ "agreement": snapshot }))
            }
        }
        AgreementCommand::List => {
            let agreements = agreement::list_agreements(store)?;
            emit("agreement.list", json!({ "agreements": agreements }))
        }
        AgreementCommand::SetName { id, name } => {
            let id = AgreementId::from(id);
            agreement::set_protocol_name(store, &require_caller(caller)?, &id, &name)?;
            emit("agreement.set-name", json!({ "agreement": id }))
        }
        AgreementCommand::SetUri { id, uri } => {
            let id = AgreementId::from(id);
            agreement::set_agreement_uri(store, &require_caller(caller)?, &id, &uri)?;
            emit("agreement.set-uri", json!({ "agreement": id }))
        }
        AgreementCommand::SetContacts { id, file } => {
            let id = AgreementId::from(id);
            let contacts: Vec<Contact> = read_json(&file)?;
            agreement::set_contact_details(store, &require_caller(caller)?, &id, &contacts)?;
            emit("agreement.set-contacts", json!({ "agreement": id }))
        }
        AgreementCommand::SetBounty { id, file } => {
            let id = AgreementId::from(id);
            let terms = read_json::<BountyDocument>(&file)?.into_terms()?;
            agreement::set_bounty_terms(store, &require_caller(caller)?, &id, &terms)?;
            emit("agreement.set-bounty", json!({ "agreement": id }))
        }
        AgreementCommand::SetRecovery { id, chain, address } => {
            let id = AgreementId::from(id);
            agreement::set_asset_recovery_address(store, &require_caller(caller)?, &id, &chain, &address)?;
            emit("agreement.set-recovery", json!({ "agreement": id, "chain_id": chain }))
        }
        AgreementCommand::AddChains { id, file } => {
            let id = AgreementId::from(id);
            let chains = read_chains(&file)?;
            let outcome = agreement::add_chains(store, &require_caller(caller)?, &id, &chains)?;
            emit("agreement.add-chains", json!({ "agreement": id, "outcome": outcome }))
        }
        AgreementCommand::SetChains { id, file } => {
            let id = AgreementId::from(id);
            let chains = read_chains(&file)?;
            agreement::set_chains(store, &require_caller(caller)?, &id, &chains)?;
            emit("agreement.set-chains", json!({ "agreement": id }))
        }
        AgreementCommand::RemoveChains { id, chains } => {
            let id = AgreementId::from(id);
            agreement::remove_chains(store, &require_caller(caller)?, &id, &chains)?;
            emit("agreement.remove-chains", json!({ "agreement": id, "removed": chains }))
        }
        AgreementCommand::AddAccounts { id, chain, file } => {
            let id = AgreementId::from(id);
            let accounts = read_json::<Vec<AccountDocument>>(&file)?
                .into_iter()
                .map(AccountDocument::into_account)
                .collect::<Result<Vec<_>, _>>()?;
            let outcome =
                agreement::add_accounts(store, &require_caller(caller)?, &id, &chain, &accounts)?;
            emit("agreement.add-accounts", json!({ "agreement": id, "outcome": outcome }))
        }
        AgreementCommand::RemoveAccount { id, chain, account } => {
            let id = AgreementId::from(id);
            agreement::remove_account(store, &require_caller(caller)?, &id, &chain, &account)?;
            emit("agreement.remove-account", json!({ "agreement": id }))
        }
        AgreementCommand::Transfer { id, to } => {
            let id = AgreementId::from(id);
            let new_owner = Identity::new(to)?;
            agreement::transfer_ownership(store, &require_caller(caller)?, &id, &new_owner)?;
            emit("agreement.transfer", json!({ "agreement": id, "owner": new_owner }))
        }
        AgreementCommand::Close { id } => {
            let id = AgreementId::from(id);
            agreement::close(store, &require_caller(caller)?, &id)?;
            emit("agreement.close", json!({ "agreement": id }))
        }
    }
}

fn require_caller(caller: Option<&str>) -> Result<Identity, HarborError> {
    match caller {
        Some(caller) => Identity::new(caller),
        None => Err(HarborError::invalid_input(
            "caller",
            "pass --caller or set SAFE_HARBOR_CALLER",
        )),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, HarborError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn read_chains(path: &Path) -> Result<Vec<harbor::types::Chain>, HarborError> {
    read_json::<Vec<ChainDocument>>(path)?
        .into_iter()
        .map(ChainDocument::into_chain)
        .collect()
}

fn emit(cmd: &str, extra: JsonValue) -> Result<ExitCode, HarborError> {
    let envelope = time::command_envelope(cmd, "ok", extra);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(ExitCode::SUCCESS)
}

fn emit_report(
    cmd: &str,
    report: &ConstructionReport,
    extra: JsonValue,
) -> Result<ExitCode, HarborError> {
    let status = if report.is_complete() { "ok" } else { "partial" };
    let mut body = json!({ "report": report });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        body.extend(extra.clone());
    }
    let envelope = time::command_envelope(cmd, status, body);
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if !report.dropped_chains.is_empty() {
        eprintln!(
            "{} dropped chains not in allow-list: {}",
            "warning:".yellow().bold(),
            output::preview_messages(&report.dropped_chains, 5, 40)
        );
    }
    if report.is_complete() {
        return Ok(ExitCode::SUCCESS);
    }
    let failures: Vec<String> = report
        .failed_batches()
        .iter()
        .map(|b| match &b.chain_id {
            Some(chain) => format!("{:?} {} #{}", b.phase, chain, b.index),
            None => format!("{:?} #{}", b.phase, b.index),
        })
        .collect();
    eprintln!(
        "{} agreement {} is incomplete ({} chains, {} accounts missing); failed batches: {}",
        "partial:".yellow().bold(),
        report.agreement,
        report.missing_chains.len(),
        report.missing_accounts.len(),
        output::preview_messages(&failures, 5, 60)
    );
    Ok(ExitCode::from(EXIT_PARTIAL))
}
