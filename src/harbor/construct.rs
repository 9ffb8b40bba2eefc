//! Incremental construction of agreements too large for one bounded write.
//!
//! Construction runs in three phases, each leaving a readable agreement:
//!
//! 1. **Skeleton**: `create` with contacts and bounty terms in full and the
//!    first *k* chains without accounts, *k* being the longest prefix that fits
//!    the write bound (capped by `max_skeleton_chains`).
//! 2. **Chains**: the remaining chains through `add_chains` in fixed-size
//!    batches. A failed batch is recorded; under `Continue` later batches run.
//! 3. **Accounts**: each chain's accounts through `add_accounts` in fixed-size
//!    batches. Under `Abort` a failed batch ends that chain's population; other
//!    chains still proceed.
//!
//! Planning is pure: chains missing from the allow-list are dropped (or fail
//! the plan under `InvalidChainPolicy::Fail`) and duplicate chain ids are
//! merged before any batch is cut. Nothing here is transactional across
//! phases; `resume` re-plans against what is already stored and relies on the
//! merge semantics of `add_chains`/`add_accounts` to stay idempotent.

use crate::core::config::{BatchFailurePolicy, HarborConfig, InvalidChainPolicy};
use crate::core::error::HarborError;
use crate::core::store::Store;
use crate::harbor::agreement;
use crate::harbor::limits;
use crate::harbor::registry;
use crate::harbor::types::{
    self, AccountInScope, AgreementId, AgreementParams, AgreementSnapshot, Chain, Identity,
};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Chains,
    Accounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Committed,
    Failed { code: String, message: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub phase: Phase,
    /// Target chain for account batches.
    pub chain_id: Option<String>,
    pub index: usize,
    /// Chain ids or account addresses carried by the batch.
    pub items: Vec<String>,
    pub status: BatchStatus,
}

impl BatchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, BatchStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAccountsPlan {
    pub chain_id: String,
    pub batches: Vec<Vec<AccountInScope>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionPlan {
    /// Phase 1 payload. `None` when resuming an existing agreement.
    pub skeleton: Option<AgreementParams>,
    pub chain_batches: Vec<Vec<Chain>>,
    pub account_batches: Vec<ChainAccountsPlan>,
    pub dropped_chains: Vec<String>,
    /// Merged target contents the agreement should end up with.
    pub target: Vec<Chain>,
}

impl ConstructionPlan {
    pub fn expected_chains(&self) -> usize {
        self.target.len()
    }

    pub fn expected_accounts(&self) -> usize {
        self.target.iter().map(|c| c.accounts.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionReport {
    pub agreement: AgreementId,
    pub dropped_chains: Vec<String>,
    pub skeleton_chains: usize,
    pub batches: Vec<BatchOutcome>,
    pub expected_chains: usize,
    pub actual_chains: usize,
    pub expected_accounts: usize,
    pub actual_accounts: usize,
    pub missing_chains: Vec<String>,
    /// `chain_id/account_address` pairs absent after the run.
    pub missing_accounts: Vec<String>,
}

impl ConstructionReport {
    /// Every planned chain and account is on the agreement.
    pub fn is_complete(&self) -> bool {
        self.missing_chains.is_empty() && self.missing_accounts.is_empty()
    }

    pub fn failed_batches(&self) -> Vec<&BatchOutcome> {
        self.batches.iter().filter(|b| b.is_failed()).collect()
    }
}

/// Split `params` into bounded operations. `existing` is the stored agreement
/// when resuming; its chains and accounts are left out of the plan.
pub fn plan(
    params: &AgreementParams,
    valid_chains: &FxHashSet<String>,
    existing: Option<&AgreementSnapshot>,
    config: &HarborConfig,
) -> Result<ConstructionPlan, HarborError> {
    let policy = &config.construction;

    let mut dropped_chains: Vec<String> = Vec::new();
    let mut kept = Vec::with_capacity(params.chains.len());
    for chain in &params.chains {
        if valid_chains.contains(&chain.chain_id) {
            kept.push(chain.clone());
            continue;
        }
        match policy.invalid_chains {
            InvalidChainPolicy::Fail => return Err(HarborError::InvalidChain(chain.chain_id.clone())),
            InvalidChainPolicy::Drop => {
                warn!(chain_id = %chain.chain_id, "dropping chain missing from registry allow-list");
                if !dropped_chains.contains(&chain.chain_id) {
                    dropped_chains.push(chain.chain_id.clone());
                }
            }
        }
    }
    let target = types::merge_chains(kept);

    let (skeleton, pending_chains, pending_accounts) = match existing {
        None => {
            params.validate()?;
            let mut skeleton = AgreementParams {
                protocol_name: params.protocol_name.clone(),
                contact_details: params.contact_details.clone(),
                chains: Vec::new(),
                bounty_terms: params.bounty_terms.clone(),
                agreement_uri: params.agreement_uri.clone(),
            };
            limits::check_write(&config.limits, "create", &skeleton)?;

            for chain in target.iter().take(policy.max_skeleton_chains) {
                skeleton.chains.push(chain.skeleton());
                if !limits::fits(&config.limits, &skeleton)? {
                    skeleton.chains.pop();
                    break;
                }
            }
            let k = skeleton.chains.len();
            let pending_chains: Vec<Chain> = target[k..].iter().map(Chain::skeleton).collect();
            let pending_accounts: Vec<(String, Vec<AccountInScope>)> = target
                .iter()
                .map(|c| (c.chain_id.clone(), c.accounts.clone()))
                .collect();
            (Some(skeleton), pending_chains, pending_accounts)
        }
        Some(snapshot) => {
            let mut pending_chains = Vec::new();
            let mut pending_accounts = Vec::new();
            for chain in &target {
                let stored = snapshot.chain(&chain.chain_id);
                if stored.is_none() {
                    pending_chains.push(chain.skeleton());
                }
                let missing: Vec<AccountInScope> = chain
                    .accounts
                    .iter()
                    .filter(|a| !stored.is_some_and(|s| has_account(s, &a.account_address)))
                    .cloned()
                    .collect();
                pending_accounts.push((chain.chain_id.clone(), missing));
            }
            (None, pending_chains, pending_accounts)
        }
    };

    let chain_batches = pending_chains
        .chunks(policy.chain_batch_size)
        .map(<[Chain]>::to_vec)
        .collect();
    let account_batches = pending_accounts
        .into_iter()
        .filter(|(_, accounts)| !accounts.is_empty())
        .map(|(chain_id, accounts)| ChainAccountsPlan {
            chain_id,
            batches: accounts
                .chunks(policy.account_batch_size)
                .map(<[AccountInScope]>::to_vec)
                .collect(),
        })
        .collect();

    Ok(ConstructionPlan {
        skeleton,
        chain_batches,
        account_batches,
        dropped_chains,
        target,
    })
}

/// Run all three phases for a new agreement owned (and written) by `owner`.
///
/// A skeleton failure is returned as an error since nothing was created.
/// Later failures are reported in the returned [`ConstructionReport`].
pub fn build(
    store: &Store,
    owner: &Identity,
    params: &AgreementParams,
) -> Result<ConstructionReport, HarborError> {
    let valid = registry::valid_chain_set(store)?;
    let plan = plan(params, &valid, None, &store.config)?;
    let skeleton = plan
        .skeleton
        .as_ref()
        .ok_or_else(|| HarborError::invalid_input("skeleton", "plan has no skeleton"))?;
    let id = agreement::create(store, owner, owner, skeleton)?;
    debug!(agreement = %id, chains = skeleton.chains.len(), "skeleton created");
    execute(store, owner, &id, plan)
}

/// Submit whatever part of `params` is not yet stored on agreement `id`.
pub fn resume(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    params: &AgreementParams,
) -> Result<ConstructionReport, HarborError> {
    let valid = registry::valid_chain_set(store)?;
    let snapshot = agreement::fetch(store, id)?;
    let plan = plan(params, &valid, Some(&snapshot), &store.config)?;
    execute(store, caller, id, plan)
}

fn execute(
    store: &Store,
    caller: &Identity,
    id: &AgreementId,
    plan: ConstructionPlan,
) -> Result<ConstructionReport, HarborError> {
    let policy = &store.config.construction;
    let mut batches = Vec::new();
    let mut failed_chains: FxHashSet<String> = FxHashSet::default();

    let mut chains_aborted = false;
    for (index, batch) in plan.chain_batches.iter().enumerate() {
        let items: Vec<String> = batch.iter().map(|c| c.chain_id.clone()).collect();
        let status = if chains_aborted {
            BatchStatus::Skipped {
                reason: "an earlier chain batch failed".to_string(),
            }
        } else {
            match agreement::add_chains(store, caller, id, batch) {
                Ok(_) => {
                    debug!(agreement = %id, index, "chain batch committed");
                    BatchStatus::Committed
                }
                Err(err) => {
                    warn!(agreement = %id, index, error = %err, "chain batch failed");
                    chains_aborted = policy.chain_batch_failure == BatchFailurePolicy::Abort;
                    failed(&err)
                }
            }
        };
        if !matches!(status, BatchStatus::Committed) {
            failed_chains.extend(items.iter().cloned());
        }
        batches.push(BatchOutcome {
            phase: Phase::Chains,
            chain_id: None,
            index,
            items,
            status,
        });
    }

    for chain_plan in &plan.account_batches {
        let mut stop_reason = failed_chains
            .contains(&chain_plan.chain_id)
            .then(|| "chain was not added".to_string());
        for (index, batch) in chain_plan.batches.iter().enumerate() {
            let items: Vec<String> = batch.iter().map(|a| a.account_address.clone()).collect();
            let status = match &stop_reason {
                Some(reason) => BatchStatus::Skipped {
                    reason: reason.clone(),
                },
                None => match agreement::add_accounts(store, caller, id, &chain_plan.chain_id, batch)
                {
                    Ok(outcome) => {
                        debug!(
                            agreement = %id,
                            chain_id = %chain_plan.chain_id,
                            index,
                            added = outcome.accounts_added,
                            "account batch committed"
                        );
                        BatchStatus::Committed
                    }
                    Err(err) => {
                        warn!(
                            agreement = %id,
                            chain_id = %chain_plan.chain_id,
                            index,
                            error = %err,
                            "account batch failed"
                        );
                        if policy.account_batch_failure == BatchFailurePolicy::Abort {
                            stop_reason = Some(format!("account batch {} failed", index));
                        }
                        failed(&err)
                    }
                },
            };
            batches.push(BatchOutcome {
                phase: Phase::Accounts,
                chain_id: Some(chain_plan.chain_id.clone()),
                index,
                items,
                status,
            });
        }
    }

    let snapshot = agreement::fetch(store, id)?;
    let (missing_chains, missing_accounts) = diff(&plan.target, &snapshot);
    Ok(ConstructionReport {
        agreement: id.clone(),
        expected_chains: plan.expected_chains(),
        expected_accounts: plan.expected_accounts(),
        dropped_chains: plan.dropped_chains,
        skeleton_chains: plan.skeleton.map_or(0, |s| s.chains.len()),
        batches,
        actual_chains: snapshot.chains.len(),
        actual_accounts: snapshot.account_count(),
        missing_chains,
        missing_accounts,
    })
}

fn failed(err: &HarborError) -> BatchStatus {
    BatchStatus::Failed {
        code: err.code().to_string(),
        message: err.to_string(),
    }
}

fn has_account(chain: &Chain, address: &str) -> bool {
    chain.accounts.iter().any(|a| a.account_address == address)
}

/// Target chains and accounts absent from `snapshot`.
pub fn diff(target: &[Chain], snapshot: &AgreementSnapshot) -> (Vec<String>, Vec<String>) {
    let mut missing_chains = Vec::new();
    let mut missing_accounts = Vec::new();
    for chain in target {
        let stored = snapshot.chain(&chain.chain_id);
        if stored.is_none() {
            missing_chains.push(chain.chain_id.clone());
        }
        for account in &chain.accounts {
            if !stored.is_some_and(|s| has_account(s, &account.account_address)) {
                missing_accounts.push(format!("{}/{}", chain.chain_id, account.account_address));
            }
        }
    }
    (missing_chains, missing_accounts)
}
