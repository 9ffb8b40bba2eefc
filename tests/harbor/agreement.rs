#[path = "support.rs"]
mod support;

use safe_harbor::core::config::{CloseAdoptedPolicy, HarborConfig, LimitsConfig};
use safe_harbor::core::error::HarborError;
use safe_harbor::harbor::adoption::{self, AdoptionStatus};
use safe_harbor::harbor::agreement;
use safe_harbor::harbor::events::{self, HarborEvent};
use safe_harbor::harbor::types::{
    AccountInScope, AgreementId, BountyTerms, Chain, ChildContractScope, Contact,
};
use support::{OWNER, accounts, chain, id, params, registry_with};

fn addresses(chain: &Chain) -> Vec<&str> {
    chain.accounts.iter().map(|a| a.account_address.as_str()).collect()
}

#[test]
fn create_stores_every_field() {
    let (_tmp, store) = registry_with(&["eip155:1", "eip155:10"], HarborConfig::default());
    let input = params(vec![
        chain("eip155:1", accounts("0xA", 2)),
        chain("eip155:10", Vec::new()),
    ]);
    let aid = agreement::create(&store, &id("payer"), &id(OWNER), &input).unwrap();

    let snapshot = agreement::fetch(&store, &aid).unwrap();
    assert_eq!(snapshot.owner, id(OWNER));
    assert_eq!(snapshot.protocol_name, "Acme");
    assert_eq!(snapshot.contact_details, input.contact_details);
    assert_eq!(snapshot.bounty_terms, input.bounty_terms);
    assert_eq!(snapshot.agreement_uri, input.agreement_uri);
    assert_eq!(snapshot.chains, input.chains);
    assert!(agreement::exists(&store, &aid).unwrap());
    assert_eq!(
        agreement::chain_ids(&store, &aid).unwrap(),
        vec!["eip155:1".to_string(), "eip155:10".to_string()]
    );
}

#[test]
fn direct_create_fails_fast_on_invalid_chain() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());
    let input = params(vec![
        chain("eip155:1", accounts("0xA", 1)),
        chain("cosmos:hub-4", accounts("cosmos1", 1)),
    ]);
    let err = agreement::create(&store, &id(OWNER), &id(OWNER), &input).unwrap_err();
    assert!(matches!(err, HarborError::InvalidChain(ref c) if c == "cosmos:hub-4"));
    assert!(agreement::list_agreements(&store).unwrap().is_empty());
}

#[test]
fn create_rejects_bad_fields() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());

    let mut input = params(Vec::new());
    input.protocol_name = "x".repeat(129);
    assert_eq!(
        agreement::create(&store, &id(OWNER), &id(OWNER), &input).unwrap_err().code(),
        "invalid_input"
    );

    let mut input = params(Vec::new());
    input.bounty_terms.aggregate_bounty_cap_usd = 5000;
    assert_eq!(
        agreement::create(&store, &id(OWNER), &id(OWNER), &input).unwrap_err().code(),
        "invalid_input"
    );

    let mut input = params(Vec::new());
    input.agreement_uri.clear();
    assert!(agreement::create(&store, &id(OWNER), &id(OWNER), &input).is_err());
}

#[test]
fn oversized_create_is_rejected() {
    let config = HarborConfig {
        limits: LimitsConfig { max_write_bytes: 400 },
        ..Default::default()
    };
    let (_tmp, store) = registry_with(&["eip155:1"], config);
    let input = params(vec![chain("eip155:1", accounts("0xACCOUNT", 20))]);
    let err = agreement::create(&store, &id(OWNER), &id(OWNER), &input).unwrap_err();
    assert!(matches!(err, HarborError::PayloadTooLarge { ref op, .. } if op == "create"));
}

#[test]
fn duplicate_chain_entries_merge_into_one() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());
    let input = params(vec![
        chain("eip155:1", accounts("0xA", 2)),
        chain("eip155:1", accounts("0xB", 2)),
    ]);
    let aid = agreement::create(&store, &id(OWNER), &id(OWNER), &input).unwrap();
    let snapshot = agreement::fetch(&store, &aid).unwrap();
    assert_eq!(snapshot.chains.len(), 1);
    assert_eq!(
        addresses(&snapshot.chains[0]),
        vec!["0xA000", "0xA001", "0xB000", "0xB001"]
    );

    agreement::add_chains(
        &store,
        &id(OWNER),
        &aid,
        &[Chain::new("eip155:1", "0xOTHER", accounts("0xC", 1))],
    )
    .unwrap();
    let snapshot = agreement::fetch(&store, &aid).unwrap();
    assert_eq!(snapshot.chains.len(), 1);
    assert_eq!(snapshot.chains[0].asset_recovery_address, "0xRECOVERY");
    assert_eq!(snapshot.chains[0].accounts.len(), 5);
}

#[test]
fn add_accounts_is_idempotent() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());
    let aid = agreement::create(
        &store,
        &id(OWNER),
        &id(OWNER),
        &params(vec![chain("eip155:1", Vec::new())]),
    )
    .unwrap();

    let batch = accounts("0xA", 3);
    let first = agreement::add_accounts(&store, &id(OWNER), &aid, "eip155:1", &batch).unwrap();
    assert_eq!((first.accounts_added, first.accounts_skipped), (3, 0));
    let second = agreement::add_accounts(&store, &id(OWNER), &aid, "eip155:1", &batch).unwrap();
    assert_eq!((second.accounts_added, second.accounts_skipped), (0, 3));

    let snapshot = agreement::fetch(&store, &aid).unwrap();
    assert_eq!(addresses(&snapshot.chains[0]), vec!["0xA000", "0xA001", "0xA002"]);
}

#[test]
fn add_accounts_requires_chain_on_agreement() {
    let (_tmp, store) = registry_with(&["eip155:1", "eip155:10"], HarborConfig::default());
    let aid = agreement::create(
        &store,
        &id(OWNER),
        &id(OWNER),
        &params(vec![chain("eip155:1", Vec::new())]),
    )
    .unwrap();
    let err = agreement::add_accounts(&store, &id(OWNER), &aid, "eip155:10", &accounts("0xA", 1))
        .unwrap_err();
    assert!(matches!(err, HarborError::UnknownChain { ref chain_id, .. } if chain_id == "eip155:10"));
}

#[test]
fn unauthorized_mutations_leave_agreement_unchanged() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());
    let aid = agreement::create(
        &store,
        &id(OWNER),
        &id(OWNER),
        &params(vec![chain("eip155:1", accounts("0xA", 1))]),
    )
    .unwrap();
    let before = agreement::fetch(&store, &aid).unwrap();
    let mallory = id("mallory");

    let attempts: Vec<Result<(), HarborError>> = vec![
        agreement::set_protocol_name(&store, &mallory, &aid, "Pwned"),
        agreement::set_agreement_uri(&store, &mallory, &aid, "ipfs://pwned"),
        agreement::set_bounty_terms(&store, &mallory, &aid, &BountyTerms::default()),
        agreement::set_contact_details(&store, &mallory, &aid, &[]),
        agreement::set_asset_recovery_address(&store, &mallory, &aid, "eip155:1", "0xBAD"),
        agreement::add_accounts(&store, &mallory, &aid, "eip155:1", &accounts("0xM", 1)).map(|_| ()),
        agreement::remove_account(&store, &mallory, &aid, "eip155:1", "0xA000"),
        agreement::remove_chains(&store, &mallory, &aid, &["eip155:1".to_string()]),
        agreement::transfer_ownership(&store, &mallory, &aid, &mallory),
        agreement::close(&store, &mallory, &aid),
        // Invalid or oversized payloads still fail on ownership first.
        agreement::set_protocol_name(&store, &mallory, &aid, ""),
        agreement::set_protocol_name(&store, &mallory, &aid, &"x".repeat(2000)),
        agreement::set_bounty_terms(
            &store,
            &mallory,
            &aid,
            &BountyTerms {
                bounty_percentage: 101,
                ..BountyTerms::default()
            },
        ),
        agreement::transfer_ownership(&store, &mallory, &aid, &id("")),
    ];
    for attempt in attempts {
        assert!(matches!(attempt, Err(HarborError::Unauthorized { .. })));
    }
    assert_eq!(agreement::fetch(&store, &aid).unwrap(), before);
}

#[test]
fn owner_setters_update_fields() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());
    let owner = id(OWNER);
    let aid = agreement::create(
        &store,
        &owner,
        &owner,
        &params(vec![chain("eip155:1", accounts("0xA", 2))]),
    )
    .unwrap();

    agreement::set_protocol_name(&store, &owner, &aid, "Acme v2").unwrap();
    agreement::set_agreement_uri(&store, &owner, &aid, "ipfs://acme-v2").unwrap();
    let terms = BountyTerms {
        bounty_percentage: 5,
        bounty_cap_usd: 50,
        aggregate_bounty_cap_usd: 500,
        retainable: false,
        ..Default::default()
    };
    agreement::set_bounty_terms(&store, &owner, &aid, &terms).unwrap();
    let contacts = vec![Contact::new("Ops", "ops@acme.test")];
    agreement::set_contact_details(&store, &owner, &aid, &contacts).unwrap();
    agreement::set_asset_recovery_address(&store, &owner, &aid, "eip155:1", "0xNEW").unwrap();
    agreement::remove_account(&store, &owner, &aid, "eip155:1", "0xA000").unwrap();

    let snapshot = agreement::fetch(&store, &aid).unwrap();
    assert_eq!(snapshot.protocol_name, "Acme v2");
    assert_eq!(snapshot.agreement_uri, "ipfs://acme-v2");
    assert_eq!(snapshot.bounty_terms, terms);
    assert_eq!(snapshot.contact_details, contacts);
    assert_eq!(snapshot.chains[0].asset_recovery_address, "0xNEW");
    assert_eq!(addresses(&snapshot.chains[0]), vec!["0xA001"]);
    assert!(snapshot.updated_at >= snapshot.created_at);

    let err = agreement::remove_account(&store, &owner, &aid, "eip155:1", "0xA000").unwrap_err();
    assert_eq!(err.code(), "not_found");
    let err = agreement::set_asset_recovery_address(&store, &owner, &aid, "eip155:10", "0x1")
        .unwrap_err();
    assert_eq!(err.code(), "unknown_chain");
}

#[test]
fn set_chains_replaces_and_remove_chains_deletes() {
    let (_tmp, store) = registry_with(&["eip155:1", "eip155:10"], HarborConfig::default());
    let owner = id(OWNER);
    let aid = agreement::create(
        &store,
        &owner,
        &owner,
        &params(vec![
            chain("eip155:1", accounts("0xA", 3)),
            chain("eip155:10", accounts("0xB", 1)),
        ]),
    )
    .unwrap();

    let replacement = Chain::new(
        "eip155:1",
        "0xREPLACED",
        vec![AccountInScope::new("0xZ", ChildContractScope::FutureOnly)],
    );
    agreement::set_chains(&store, &owner, &aid, &[replacement.clone()]).unwrap();
    let snapshot = agreement::fetch(&store, &aid).unwrap();
    assert_eq!(snapshot.chain("eip155:1"), Some(&replacement));

    let err = agreement::set_chains(&store, &owner, &aid, &[chain("eip155:137", Vec::new())])
        .unwrap_err();
    assert!(matches!(err, HarborError::InvalidChain(_)));

    agreement::remove_chains(
        &store,
        &owner,
        &aid,
        &["eip155:10".to_string(), "eip155:10".to_string()],
    )
    .unwrap();
    assert_eq!(
        agreement::chain_ids(&store, &aid).unwrap(),
        vec!["eip155:1".to_string()]
    );
    let err = agreement::remove_chains(&store, &owner, &aid, &["eip155:10".to_string()]).unwrap_err();
    assert_eq!(err.code(), "unknown_chain");
}

#[test]
fn add_chains_rejects_invalid_chain_atomically() {
    let (_tmp, store) = registry_with(&["eip155:1", "eip155:10"], HarborConfig::default());
    let owner = id(OWNER);
    let aid = agreement::create(&store, &owner, &owner, &params(Vec::new())).unwrap();
    let err = agreement::add_chains(
        &store,
        &owner,
        &aid,
        &[chain("eip155:10", Vec::new()), chain("eip155:666", Vec::new())],
    )
    .unwrap_err();
    assert!(matches!(err, HarborError::InvalidChain(_)));
    assert!(agreement::chain_ids(&store, &aid).unwrap().is_empty());
}

#[test]
fn ownership_transfer_moves_authority() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());
    let (old, new) = (id(OWNER), id("N"));
    let aid = agreement::create(&store, &old, &old, &params(Vec::new())).unwrap();

    agreement::transfer_ownership(&store, &old, &aid, &new).unwrap();
    let err = agreement::set_protocol_name(&store, &old, &aid, "Old").unwrap_err();
    assert!(matches!(err, HarborError::Unauthorized { .. }));
    agreement::set_protocol_name(&store, &new, &aid, "New").unwrap();
    assert_eq!(agreement::fetch(&store, &aid).unwrap().owner, new);

    let transfers = events::list(&store, Some("ownership_transferred")).unwrap();
    assert!(matches!(
        &transfers[0].event,
        HarborEvent::OwnershipTransferred { previous_owner, new_owner, .. }
            if *previous_owner == old && *new_owner == new
    ));
}

#[test]
fn close_is_blocked_while_adopted() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());
    let owner = id(OWNER);
    let aid = agreement::create(&store, &owner, &owner, &params(Vec::new())).unwrap();
    adoption::adopt(&store, &id("X"), &id("X"), &aid).unwrap();

    let err = agreement::close(&store, &owner, &aid).unwrap_err();
    assert!(matches!(err, HarborError::AgreementInUse { adopters: 1, .. }));
    assert!(agreement::exists(&store, &aid).unwrap());
}

#[test]
fn close_may_leave_dangling_adoptions_when_configured() {
    let mut config = HarborConfig::default();
    config.agreement.close_adopted = CloseAdoptedPolicy::AllowDangling;
    let (_tmp, store) = registry_with(&["eip155:1"], config);
    let owner = id(OWNER);
    let aid = agreement::create(
        &store,
        &owner,
        &owner,
        &params(vec![chain("eip155:1", accounts("0xA", 2))]),
    )
    .unwrap();
    adoption::adopt(&store, &id("X"), &id("X"), &aid).unwrap();

    agreement::close(&store, &owner, &aid).unwrap();
    assert!(!agreement::exists(&store, &aid).unwrap());
    assert_eq!(agreement::fetch(&store, &aid).unwrap_err().code(), "not_found");
    assert_eq!(
        adoption::resolve(&store, &id("X")).unwrap(),
        AdoptionStatus::Dangling(aid.clone())
    );
    assert_eq!(adoption::history(&store, &id("X")).unwrap().len(), 1);
}

#[test]
fn unknown_agreement_is_not_found() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());
    let missing = AgreementId::from("01MISSING");
    assert_eq!(agreement::fetch(&store, &missing).unwrap_err().code(), "not_found");
    assert_eq!(
        agreement::set_protocol_name(&store, &id(OWNER), &missing, "x")
            .unwrap_err()
            .code(),
        "not_found"
    );
}

#[test]
fn list_agreements_summarizes() {
    let (_tmp, store) = registry_with(&["eip155:1", "eip155:10"], HarborConfig::default());
    let owner = id(OWNER);
    let first = agreement::create(
        &store,
        &owner,
        &owner,
        &params(vec![chain("eip155:1", Vec::new()), chain("eip155:10", Vec::new())]),
    )
    .unwrap();
    let second = agreement::create(&store, &owner, &id("P"), &params(Vec::new())).unwrap();

    let listed = agreement::list_agreements(&store).unwrap();
    assert_eq!(listed.len(), 2);
    let first_summary = listed.iter().find(|s| s.id == first).unwrap();
    assert_eq!(first_summary.chain_count, 2);
    let second_summary = listed.iter().find(|s| s.id == second).unwrap();
    assert_eq!(second_summary.owner, id("P"));
}
