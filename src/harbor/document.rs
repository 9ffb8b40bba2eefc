//! JSON agreement documents as published alongside deployments.
//!
//! Field names are camelCase (`protocolName`, `agreementURI`, ...). Enum
//! fields accept either their numeric code or their name, so
//! `"childContractScope": 2` and `"childContractScope": "All"` are equivalent.

use crate::core::error::HarborError;
use crate::harbor::types::{
    AccountInScope, AgreementParams, AgreementSnapshot, BountyTerms, Chain, ChildContractScope,
    Contact, IdentityRequirement,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnumField {
    Code(u8),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDocument {
    pub account_address: String,
    pub child_contract_scope: EnumField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDocument {
    pub id: String,
    pub asset_recovery_address: String,
    #[serde(default)]
    pub accounts: Vec<AccountDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BountyDocument {
    pub bounty_percentage: u64,
    #[serde(rename = "bountyCapUSD")]
    pub bounty_cap_usd: u64,
    pub retainable: bool,
    pub identity: EnumField,
    #[serde(default)]
    pub diligence_requirements: String,
    #[serde(rename = "aggregateBountyCapUSD", default)]
    pub aggregate_bounty_cap_usd: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementDocument {
    pub protocol_name: String,
    #[serde(default)]
    pub contact: Vec<Contact>,
    #[serde(default)]
    pub chains: Vec<ChainDocument>,
    pub bounty_terms: BountyDocument,
    #[serde(rename = "agreementURI")]
    pub agreement_uri: String,
}

impl AgreementDocument {
    pub fn parse(content: &str) -> Result<Self, HarborError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn read(path: &Path) -> Result<Self, HarborError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn into_params(self) -> Result<AgreementParams, HarborError> {
        let chains = self
            .chains
            .into_iter()
            .map(ChainDocument::into_chain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AgreementParams {
            protocol_name: self.protocol_name,
            contact_details: self.contact,
            chains,
            bounty_terms: self.bounty_terms.into_terms()?,
            agreement_uri: self.agreement_uri,
        })
    }

    pub fn from_snapshot(snapshot: &AgreementSnapshot) -> Self {
        AgreementDocument {
            protocol_name: snapshot.protocol_name.clone(),
            contact: snapshot.contact_details.clone(),
            chains: snapshot.chains.iter().map(ChainDocument::from_chain).collect(),
            bounty_terms: BountyDocument::from_terms(&snapshot.bounty_terms),
            agreement_uri: snapshot.agreement_uri.clone(),
        }
    }
}

impl ChainDocument {
    pub fn into_chain(self) -> Result<Chain, HarborError> {
        let accounts = self
            .accounts
            .into_iter()
            .map(AccountDocument::into_account)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Chain {
            chain_id: self.id,
            asset_recovery_address: self.asset_recovery_address,
            accounts,
        })
    }

    fn from_chain(chain: &Chain) -> Self {
        ChainDocument {
            id: chain.chain_id.clone(),
            asset_recovery_address: chain.asset_recovery_address.clone(),
            accounts: chain
                .accounts
                .iter()
                .map(|a| AccountDocument {
                    account_address: a.account_address.clone(),
                    child_contract_scope: EnumField::Name(a.child_contract_scope.as_str().to_string()),
                })
                .collect(),
        }
    }
}

impl AccountDocument {
    pub fn into_account(self) -> Result<AccountInScope, HarborError> {
        Ok(AccountInScope {
            account_address: self.account_address,
            child_contract_scope: scope_from_field(&self.child_contract_scope)?,
        })
    }
}

impl BountyDocument {
    pub fn into_terms(self) -> Result<BountyTerms, HarborError> {
        Ok(BountyTerms {
            bounty_percentage: self.bounty_percentage,
            bounty_cap_usd: self.bounty_cap_usd,
            aggregate_bounty_cap_usd: self.aggregate_bounty_cap_usd,
            retainable: self.retainable,
            identity_requirement: identity_from_field(&self.identity)?,
            diligence_requirements: self.diligence_requirements,
        })
    }

    fn from_terms(terms: &BountyTerms) -> Self {
        let identity = match terms.identity_requirement {
            IdentityRequirement::Anonymous => "Anonymous",
            IdentityRequirement::Pseudonymous => "Pseudonymous",
            IdentityRequirement::Named => "Named",
        };
        BountyDocument {
            bounty_percentage: terms.bounty_percentage,
            bounty_cap_usd: terms.bounty_cap_usd,
            retainable: terms.retainable,
            identity: EnumField::Name(identity.to_string()),
            diligence_requirements: terms.diligence_requirements.clone(),
            aggregate_bounty_cap_usd: terms.aggregate_bounty_cap_usd,
        }
    }
}

fn scope_from_field(field: &EnumField) -> Result<ChildContractScope, HarborError> {
    match field {
        EnumField::Code(0) => Ok(ChildContractScope::None),
        EnumField::Code(1) => Ok(ChildContractScope::ExistingOnly),
        EnumField::Code(2) => Ok(ChildContractScope::All),
        EnumField::Code(3) => Ok(ChildContractScope::FutureOnly),
        EnumField::Code(other) => Err(HarborError::invalid_input(
            "childContractScope",
            format!("unknown scope code {}", other),
        )),
        EnumField::Name(name) => ChildContractScope::parse(name),
    }
}

fn identity_from_field(field: &EnumField) -> Result<IdentityRequirement, HarborError> {
    match field {
        EnumField::Code(0) => Ok(IdentityRequirement::Anonymous),
        EnumField::Code(1) => Ok(IdentityRequirement::Pseudonymous),
        EnumField::Code(2) => Ok(IdentityRequirement::Named),
        EnumField::Name(name) if name == "Anonymous" => Ok(IdentityRequirement::Anonymous),
        EnumField::Name(name) if name == "Pseudonymous" => Ok(IdentityRequirement::Pseudonymous),
        EnumField::Name(name) if name == "Named" => Ok(IdentityRequirement::Named),
        other => Err(HarborError::invalid_input(
            "bountyTerms.identity",
            format!("unknown identity requirement {:?}", other),
        )),
    }
}
