//! Value types shared by the registry, agreements, and the adoption index.

use crate::core::error::HarborError;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_PROTOCOL_NAME_BYTES: usize = 128;
pub const MAX_BOUNTY_PERCENTAGE: u64 = 100;

/// Opaque caller identity. Authorization compares identities byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Result<Self, HarborError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(HarborError::invalid_input("identity", "must not be empty"));
        }
        Ok(Identity(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Identity(value.to_string())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of an agreement record, assigned at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgreementId(String);

impl AgreementId {
    pub fn generate() -> Self {
        AgreementId(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgreementId {
    fn from(value: &str) -> Self {
        AgreementId(value.to_string())
    }
}

impl From<String> for AgreementId {
    fn from(value: String) -> Self {
        AgreementId(value)
    }
}

impl fmt::Display for AgreementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether contracts deployed by an in-scope account are themselves in scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChildContractScope {
    #[default]
    None,
    /// Only children that existed when the agreement was written.
    ExistingOnly,
    All,
    /// Only children deployed after the agreement was written.
    FutureOnly,
}

impl ChildContractScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildContractScope::None => "None",
            ChildContractScope::ExistingOnly => "ExistingOnly",
            ChildContractScope::All => "All",
            ChildContractScope::FutureOnly => "FutureOnly",
        }
    }

    pub fn parse(value: &str) -> Result<Self, HarborError> {
        match value {
            "None" => Ok(ChildContractScope::None),
            "ExistingOnly" => Ok(ChildContractScope::ExistingOnly),
            "All" => Ok(ChildContractScope::All),
            "FutureOnly" => Ok(ChildContractScope::FutureOnly),
            other => Err(HarborError::invalid_input(
                "child_contract_scope",
                format!("unknown scope '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityRequirement {
    #[default]
    Anonymous,
    Pseudonymous,
    Named,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub contact: String,
}

impl Contact {
    pub fn new(name: &str, contact: &str) -> Self {
        Self {
            name: name.to_string(),
            contact: contact.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInScope {
    pub account_address: String,
    #[serde(default)]
    pub child_contract_scope: ChildContractScope,
}

impl AccountInScope {
    pub fn new(address: &str, scope: ChildContractScope) -> Self {
        Self {
            account_address: address.to_string(),
            child_contract_scope: scope,
        }
    }
}

/// Scope entry for one chain. At most one per chain id within an agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: String,
    pub asset_recovery_address: String,
    #[serde(default)]
    pub accounts: Vec<AccountInScope>,
}

impl Chain {
    pub fn new(chain_id: &str, asset_recovery_address: &str, accounts: Vec<AccountInScope>) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            asset_recovery_address: asset_recovery_address.to_string(),
            accounts,
        }
    }

    /// Same chain entry with its accounts stripped.
    pub fn skeleton(&self) -> Chain {
        Chain {
            chain_id: self.chain_id.clone(),
            asset_recovery_address: self.asset_recovery_address.clone(),
            accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BountyTerms {
    pub bounty_percentage: u64,
    pub bounty_cap_usd: u64,
    /// 0 means no aggregate cap; individual caps apply per incident.
    #[serde(default)]
    pub aggregate_bounty_cap_usd: u64,
    pub retainable: bool,
    #[serde(default)]
    pub identity_requirement: IdentityRequirement,
    #[serde(default)]
    pub diligence_requirements: String,
}

impl BountyTerms {
    pub fn validate(&self) -> Result<(), HarborError> {
        if self.bounty_percentage > MAX_BOUNTY_PERCENTAGE {
            return Err(HarborError::invalid_input(
                "bounty_terms.bounty_percentage",
                format!("{} exceeds {}", self.bounty_percentage, MAX_BOUNTY_PERCENTAGE),
            ));
        }
        if self.aggregate_bounty_cap_usd > 0 && self.retainable {
            return Err(HarborError::invalid_input(
                "bounty_terms.aggregate_bounty_cap_usd",
                "cannot be set together with retainable",
            ));
        }
        Ok(())
    }
}

/// Everything a caller supplies to create an agreement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementParams {
    pub protocol_name: String,
    pub contact_details: Vec<Contact>,
    pub chains: Vec<Chain>,
    pub bounty_terms: BountyTerms,
    pub agreement_uri: String,
}

impl AgreementParams {
    /// Field checks that do not need the store.
    pub fn validate(&self) -> Result<(), HarborError> {
        validate_protocol_name(&self.protocol_name)?;
        validate_agreement_uri(&self.agreement_uri)?;
        self.bounty_terms.validate()
    }

    pub fn account_count(&self) -> usize {
        self.chains.iter().map(|c| c.accounts.len()).sum()
    }
}

pub fn validate_protocol_name(name: &str) -> Result<(), HarborError> {
    if name.is_empty() {
        return Err(HarborError::invalid_input("protocol_name", "must not be empty"));
    }
    if name.len() > MAX_PROTOCOL_NAME_BYTES {
        return Err(HarborError::invalid_input(
            "protocol_name",
            format!("longer than {} bytes", MAX_PROTOCOL_NAME_BYTES),
        ));
    }
    Ok(())
}

pub fn validate_agreement_uri(uri: &str) -> Result<(), HarborError> {
    if uri.is_empty() {
        return Err(HarborError::invalid_input("agreement_uri", "must not be empty"));
    }
    Ok(())
}

/// Read form of an agreement, independent of how rows are laid out on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementSnapshot {
    pub id: AgreementId,
    pub owner: Identity,
    pub protocol_name: String,
    pub contact_details: Vec<Contact>,
    pub chains: Vec<Chain>,
    pub bounty_terms: BountyTerms,
    pub agreement_uri: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AgreementSnapshot {
    pub fn chain(&self, chain_id: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    pub fn account_count(&self) -> usize {
        self.chains.iter().map(|c| c.accounts.len()).sum()
    }
}

/// Merge entries that share a chain id: first occurrence keeps its position
/// and recovery address, accounts are appended in arrival order, and a repeated
/// account address is kept only once.
pub fn merge_chains(chains: Vec<Chain>) -> Vec<Chain> {
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    let mut merged: Vec<Chain> = Vec::with_capacity(chains.len());

    for chain in chains {
        match index.get(&chain.chain_id) {
            Some(&i) => append_absent_accounts(&mut merged[i].accounts, chain.accounts),
            None => {
                index.insert(chain.chain_id.clone(), merged.len());
                let mut entry = chain.skeleton();
                append_absent_accounts(&mut entry.accounts, chain.accounts);
                merged.push(entry);
            }
        }
    }
    merged
}

fn append_absent_accounts(target: &mut Vec<AccountInScope>, incoming: Vec<AccountInScope>) {
    for account in incoming {
        if !target
            .iter()
            .any(|a| a.account_address == account.account_address)
        {
            target.push(account);
        }
    }
}
