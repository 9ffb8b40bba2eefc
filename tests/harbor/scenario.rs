#[path = "support.rs"]
mod support;

use safe_harbor::core::config::HarborConfig;
use safe_harbor::harbor::adoption::{self, AdoptionStatus};
use safe_harbor::harbor::agreement;
use safe_harbor::harbor::events;
use safe_harbor::harbor::registry;
use safe_harbor::harbor::types::{
    AccountInScope, AgreementParams, BountyTerms, Chain, ChildContractScope, IdentityRequirement,
};
use support::{id, open};

#[test]
fn acme_publishes_and_x_adopts() {
    let (_tmp, store) = open(HarborConfig::default());
    let (r, o, x) = (id("R"), id("O"), id("X"));

    registry::initialize(&store, &r).unwrap();
    registry::set_valid_chains(&store, &r, &["eip155:1".to_string()], &[]).unwrap();

    let params = AgreementParams {
        protocol_name: "Acme".to_string(),
        contact_details: Vec::new(),
        chains: vec![Chain::new(
            "eip155:1",
            "0xRECOVERY",
            vec![AccountInScope::new("0xAAA", ChildContractScope::All)],
        )],
        bounty_terms: BountyTerms {
            bounty_percentage: 10,
            bounty_cap_usd: 1000,
            retainable: true,
            identity_requirement: IdentityRequirement::Anonymous,
            ..Default::default()
        },
        agreement_uri: "ipfs://acme".to_string(),
    };
    let aid = agreement::create(&store, &o, &o, &params).unwrap();
    adoption::adopt(&store, &x, &x, &aid).unwrap();

    assert_eq!(adoption::resolve(&store, &x).unwrap(), AdoptionStatus::Adopted(aid.clone()));
    let snapshot = agreement::fetch(&store, &aid).unwrap();
    assert_eq!(snapshot.chains.len(), 1);
    assert_eq!(snapshot.chains[0].accounts.len(), 1);
    assert_eq!(
        snapshot.chains[0].accounts[0].child_contract_scope,
        ChildContractScope::All
    );

    let kinds: Vec<&'static str> = events::list(&store, None)
        .unwrap()
        .iter()
        .map(|e| e.event.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "registry_initialized",
            "chain_validity_set",
            "agreement_updated",
            "agreement_adopted"
        ]
    );
}
