#[path = "support.rs"]
mod support;

use safe_harbor::core::config::{BatchFailurePolicy, HarborConfig, InvalidChainPolicy, LimitsConfig};
use safe_harbor::core::error::HarborError;
use safe_harbor::core::store::Store;
use safe_harbor::harbor::agreement;
use safe_harbor::harbor::construct::{self, BatchStatus, ConstructionReport, Phase};
use safe_harbor::harbor::types::{AccountInScope, Chain, ChildContractScope, Contact};
use support::{OWNER, accounts, chain, id, params, registry_with};
use tempfile::TempDir;

const CHAINS: [&str; 6] = [
    "eip155:1",
    "eip155:10",
    "eip155:56",
    "eip155:137",
    "eip155:8453",
    "eip155:42161",
];

fn tight(max_write_bytes: usize) -> HarborConfig {
    HarborConfig {
        limits: LimitsConfig { max_write_bytes },
        ..Default::default()
    }
}

/// Accounts whose addresses are long enough that five of them overflow a
/// 600-byte write while one or two still fit.
fn wide_accounts(prefix: &str, count: usize) -> Vec<AccountInScope> {
    (0..count)
        .map(|i| {
            AccountInScope::new(
                &format!("{}{:03}{}", prefix, i, "f".repeat(120)),
                ChildContractScope::ExistingOnly,
            )
        })
        .collect()
}

#[test]
fn builds_agreement_too_large_for_one_write() {
    let (_tmp, store) = registry_with(&CHAINS, tight(600));
    let input = params(CHAINS.iter().map(|c| chain(c, accounts("0xACCT", 12))).collect());
    assert!(agreement::create(&store, &id(OWNER), &id(OWNER), &input).is_err());

    let report = construct::build(&store, &id(OWNER), &input).unwrap();
    assert!(report.is_complete());
    assert!(report.failed_batches().is_empty());
    assert!(report.skeleton_chains >= 1);
    assert_eq!(report.expected_chains, CHAINS.len());
    assert_eq!(report.actual_chains, CHAINS.len());
    assert_eq!(report.expected_accounts, CHAINS.len() * 12);
    assert_eq!(report.actual_accounts, CHAINS.len() * 12);
    let batched_chains: usize = report
        .batches
        .iter()
        .filter(|b| b.phase == Phase::Chains)
        .map(|b| b.items.len())
        .sum();
    assert_eq!(report.skeleton_chains + batched_chains, CHAINS.len());
    assert!(
        report
            .batches
            .iter()
            .filter(|b| b.phase == Phase::Accounts)
            .all(|b| b.items.len() <= store.config.construction.account_batch_size)
    );

    let snapshot = agreement::fetch(&store, &report.agreement).unwrap();
    assert_eq!(snapshot.owner, id(OWNER));
    assert_eq!(snapshot.chains, input.chains);
}

#[test]
fn invalid_chains_are_dropped_and_reported() {
    let (_tmp, store) = registry_with(&["eip155:1"], HarborConfig::default());
    let input = params(vec![
        chain("eip155:1", accounts("0xA", 2)),
        chain("solana:mainnet", accounts("So1", 2)),
    ]);
    let report = construct::build(&store, &id(OWNER), &input).unwrap();
    assert_eq!(report.dropped_chains, vec!["solana:mainnet".to_string()]);
    assert!(report.is_complete());
    assert_eq!(
        agreement::chain_ids(&store, &report.agreement).unwrap(),
        vec!["eip155:1".to_string()]
    );
}

#[test]
fn fail_policy_rejects_invalid_chains_before_writing() {
    let mut config = HarborConfig::default();
    config.construction.invalid_chains = InvalidChainPolicy::Fail;
    let (_tmp, store) = registry_with(&["eip155:1"], config);
    let input = params(vec![chain("solana:mainnet", Vec::new())]);
    let err = construct::build(&store, &id(OWNER), &input).unwrap_err();
    assert!(matches!(err, HarborError::InvalidChain(_)));
    assert!(agreement::list_agreements(&store).unwrap().is_empty());
}

#[test]
fn oversized_skeleton_creates_nothing() {
    let (_tmp, store) = registry_with(&["eip155:1"], tight(300));
    let mut input = params(vec![chain("eip155:1", Vec::new())]);
    input.contact_details = (0..10)
        .map(|i| Contact::new(&format!("Responder {}", i), "responder@acme.test"))
        .collect();
    let err = construct::build(&store, &id(OWNER), &input).unwrap_err();
    assert!(matches!(err, HarborError::PayloadTooLarge { .. }));
    assert!(agreement::list_agreements(&store).unwrap().is_empty());
}

#[test]
fn failed_account_batch_aborts_only_its_chain() {
    let (_tmp, store) = registry_with(&["eip155:1", "eip155:10"], tight(600));
    let input = params(vec![
        chain("eip155:1", wide_accounts("0xW", 7)),
        chain("eip155:10", accounts("0xS", 7)),
    ]);
    let report = construct::build(&store, &id(OWNER), &input).unwrap();
    assert!(!report.is_complete());

    let wide: Vec<&BatchStatus> = report
        .batches
        .iter()
        .filter(|b| b.chain_id.as_deref() == Some("eip155:1"))
        .map(|b| &b.status)
        .collect();
    assert!(matches!(wide[0], BatchStatus::Failed { code, .. } if code == "payload_too_large"));
    assert!(matches!(wide[1], BatchStatus::Skipped { .. }));

    let narrow_ok = report
        .batches
        .iter()
        .filter(|b| b.chain_id.as_deref() == Some("eip155:10"))
        .all(|b| b.status == BatchStatus::Committed);
    assert!(narrow_ok);
    assert_eq!(report.failed_batches().len(), 1);
    assert_eq!(report.missing_accounts.len(), 7);
    assert!(report.missing_chains.is_empty());
}

/// One chain per batch, with `eip155:10` carrying a recovery address too large
/// for a single write.
fn oversized_middle_chain(
    chain_batch_failure: BatchFailurePolicy,
) -> (TempDir, Store, ConstructionReport) {
    let mut config = tight(600);
    config.construction.max_skeleton_chains = 1;
    config.construction.chain_batch_size = 1;
    config.construction.chain_batch_failure = chain_batch_failure;
    let (tmp, store) = registry_with(&["eip155:1", "eip155:10", "eip155:56"], config);
    let input = params(vec![
        chain("eip155:1", accounts("0xA", 2)),
        Chain::new("eip155:10", &format!("0x{}", "e".repeat(700)), accounts("0xB", 2)),
        chain("eip155:56", accounts("0xC", 2)),
    ]);
    let report = construct::build(&store, &id(OWNER), &input).unwrap();
    (tmp, store, report)
}

fn status_of<'a>(
    report: &'a ConstructionReport,
    phase: Phase,
    item: &str,
) -> &'a BatchStatus {
    &report
        .batches
        .iter()
        .find(|b| {
            b.phase == phase
                && match phase {
                    Phase::Chains => b.items.iter().any(|i| i == item),
                    Phase::Accounts => b.chain_id.as_deref() == Some(item),
                }
        })
        .unwrap()
        .status
}

#[test]
fn failed_chain_batch_continues_with_later_chains() {
    let (_tmp, store, report) = oversized_middle_chain(BatchFailurePolicy::Continue);
    assert_eq!(report.skeleton_chains, 1);
    assert!(matches!(
        status_of(&report, Phase::Chains, "eip155:10"),
        BatchStatus::Failed { code, .. } if code == "payload_too_large"
    ));
    assert_eq!(status_of(&report, Phase::Chains, "eip155:56"), &BatchStatus::Committed);

    assert_eq!(status_of(&report, Phase::Accounts, "eip155:1"), &BatchStatus::Committed);
    assert!(matches!(
        status_of(&report, Phase::Accounts, "eip155:10"),
        BatchStatus::Skipped { reason } if reason == "chain was not added"
    ));
    assert_eq!(status_of(&report, Phase::Accounts, "eip155:56"), &BatchStatus::Committed);

    assert_eq!(report.failed_batches().len(), 1);
    assert_eq!(report.missing_chains, vec!["eip155:10".to_string()]);
    assert_eq!(report.missing_accounts.len(), 2);
    assert_eq!(
        agreement::chain_ids(&store, &report.agreement).unwrap(),
        vec!["eip155:1".to_string(), "eip155:56".to_string()]
    );
}

#[test]
fn abort_policy_skips_chain_batches_after_a_failure() {
    let (_tmp, store, report) = oversized_middle_chain(BatchFailurePolicy::Abort);
    assert!(matches!(
        status_of(&report, Phase::Chains, "eip155:10"),
        BatchStatus::Failed { .. }
    ));
    assert!(matches!(
        status_of(&report, Phase::Chains, "eip155:56"),
        BatchStatus::Skipped { .. }
    ));
    for chain_id in ["eip155:10", "eip155:56"] {
        assert!(matches!(
            status_of(&report, Phase::Accounts, chain_id),
            BatchStatus::Skipped { reason } if reason == "chain was not added"
        ));
    }
    assert_eq!(status_of(&report, Phase::Accounts, "eip155:1"), &BatchStatus::Committed);
    assert_eq!(
        report.missing_chains,
        vec!["eip155:10".to_string(), "eip155:56".to_string()]
    );
    assert_eq!(
        agreement::chain_ids(&store, &report.agreement).unwrap(),
        vec!["eip155:1".to_string()]
    );
}

#[test]
fn continue_policy_runs_later_account_batches() {
    let mut config = tight(600);
    config.construction.account_batch_failure = BatchFailurePolicy::Continue;
    let (_tmp, store) = registry_with(&["eip155:1"], config);
    let input = params(vec![chain("eip155:1", wide_accounts("0xW", 7))]);

    let report = construct::build(&store, &id(OWNER), &input).unwrap();
    let statuses: Vec<&BatchStatus> = report
        .batches
        .iter()
        .filter(|b| b.phase == Phase::Accounts)
        .map(|b| &b.status)
        .collect();
    assert!(matches!(statuses[0], BatchStatus::Failed { .. }));
    assert_eq!(statuses[1], &BatchStatus::Committed);
    assert_eq!(report.actual_accounts, 2);
    assert_eq!(report.missing_accounts.len(), 5);
}

#[test]
fn resume_completes_a_partial_agreement() {
    let (tmp, store) = registry_with(&["eip155:1", "eip155:10"], tight(600));
    let input = params(vec![
        chain("eip155:1", wide_accounts("0xW", 7)),
        chain("eip155:10", accounts("0xS", 3)),
    ]);
    let partial = construct::build(&store, &id(OWNER), &input).unwrap();
    assert!(!partial.is_complete());

    let mut config = tight(600);
    config.construction.account_batch_size = 2;
    let reopened = Store::open_with_config(tmp.path(), config).unwrap();
    let report = construct::resume(&reopened, &id(OWNER), &partial.agreement, &input).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.skeleton_chains, 0);
    assert!(report.batches.iter().all(|b| b.phase == Phase::Accounts));

    let snapshot = agreement::fetch(&reopened, &partial.agreement).unwrap();
    assert_eq!(snapshot.chains, input.chains);

    let again = construct::resume(&reopened, &id(OWNER), &partial.agreement, &input).unwrap();
    assert!(again.is_complete());
    assert!(again.batches.is_empty());
}

#[test]
fn resume_requires_agreement_owner() {
    let (_tmp, store) = registry_with(&["eip155:1", "eip155:10"], HarborConfig::default());
    let input = params(vec![chain("eip155:1", accounts("0xA", 1))]);
    let report = construct::build(&store, &id(OWNER), &input).unwrap();

    let mut larger = input.clone();
    larger.chains.push(chain("eip155:10", accounts("0xB", 1)));
    let report = construct::resume(&store, &id("mallory"), &report.agreement, &larger).unwrap();
    assert!(!report.is_complete());
    assert!(matches!(
        &report.failed_batches()[0].status,
        BatchStatus::Failed { code, .. } if code == "unauthorized"
    ));
    assert_eq!(report.missing_chains, vec!["eip155:10".to_string()]);
}
