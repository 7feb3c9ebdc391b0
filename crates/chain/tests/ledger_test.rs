use authchain_chain::{Chain, ChainError, Ledger, LedgerError};
use authchain_consensus::{ConsensusError, PoAConfig, PoAConsensus, RATE_WINDOW_MS};
use authchain_core::{Block, Ed25519Key, ErrorKind, Transaction};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn signed(id: &str, payload: &str, key: &Ed25519Key) -> Transaction<String> {
    Transaction::new(id, payload.to_string(), 1)
        .signed(key)
        .unwrap()
}

#[test]
fn test_double_spend_scenario() {
    let key = Ed25519Key::generate();
    let mut chain = Chain::new("scenario", "init".to_string(), &key).unwrap();
    chain.register_participant("p1", "active", BTreeMap::new());
    chain.grant_capability("p1", "write");

    chain.check_authorization("p1", "write").unwrap();
    chain
        .add_block(Block::new(vec![signed("tx-1", "hello", &key)]))
        .unwrap();
    assert_eq!(chain.len(), 2);
    assert!(chain.is_transaction_used("tx-1"));

    let before = chain.authenticator().clone();
    let err = chain
        .add_block(Block::new(vec![signed("tx-1", "again", &key)]))
        .unwrap_err();
    assert!(matches!(err, ChainError::DuplicateTransaction(_)));
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.authenticator(), &before);
    assert!(chain.is_valid());
}

#[test]
fn test_rejected_block_with_fresh_and_used_ids() {
    let key = Ed25519Key::generate();
    let mut chain = Chain::new("scenario", "init".to_string(), &key).unwrap();
    chain
        .add_block(Block::new(vec![signed("tx-1", "a", &key)]))
        .unwrap();

    let mixed = Block::new(vec![signed("tx-2", "b", &key), signed("tx-1", "c", &key)]);
    assert!(chain.add_block(mixed).is_err());
    assert!(!chain.is_transaction_used("tx-2"));
}

#[test]
fn test_corrupted_transaction_invalidates_chain() {
    let key = Ed25519Key::generate();
    let mut chain = Chain::new("scenario", "init".to_string(), &key).unwrap();
    chain
        .add_block(Block::new(vec![signed("tx-1", "a", &key), signed("tx-2", "b", &key)]))
        .unwrap();

    let mut json: serde_json::Value = serde_json::from_str(&chain.to_json().unwrap()).unwrap();
    json["blocks"][1]["transactions"][1]["payload"] = "tampered".into();
    let tampered = json.to_string();
    assert!(Chain::<String>::from_json(&tampered).is_err());
}

#[test]
fn test_quorum_follows_active_validators() {
    let poa = PoAConsensus::new(PoAConfig::new(3, 1)).unwrap();
    let ids: Vec<String> = (0..5)
        .map(|i| {
            poa.add_validator(format!("v{i}"), Arc::new(Ed25519Key::generate()), 1)
                .unwrap()
        })
        .collect();
    assert_eq!(poa.required_signatures(), 3);

    for (offline, id) in ids.iter().enumerate().map(|(i, id)| (i + 1, id)) {
        poa.mark_offline(id).unwrap();
        let active = ids.len() - offline;
        if active < 3 {
            assert_eq!(poa.required_signatures(), active.max(1));
        }
    }

    for id in &ids {
        poa.mark_online(id).unwrap();
    }
    assert_eq!(poa.required_signatures(), 3);
}

#[test]
fn test_finalization_with_three_validators() {
    let poa = PoAConsensus::new(PoAConfig::new(2, 1)).unwrap();
    let a = poa.add_validator("a", Arc::new(Ed25519Key::generate()), 1).unwrap();
    let b = poa.add_validator("b", Arc::new(Ed25519Key::generate()), 1).unwrap();
    let c = poa.add_validator("c", Arc::new(Ed25519Key::generate()), 1).unwrap();

    let pid = poa.create_proposal("block-hash", &a).unwrap();
    poa.sign_proposal(&pid, &a).unwrap();
    assert!(!poa.is_proposal_ready(&pid));

    poa.sign_proposal(&pid, &b).unwrap();
    assert!(poa.is_proposal_ready(&pid));
    assert_eq!(poa.finalized_signatures(&pid).unwrap().len(), 2);

    poa.sign_proposal(&pid, &c).unwrap();
    assert!(poa.is_proposal_ready(&pid));

    let err = poa.sign_proposal(&pid, &a).unwrap_err();
    assert!(matches!(err, ConsensusError::AlreadySigned { .. }));
}

#[test]
fn test_hourly_rate_limit() {
    let config = PoAConfig {
        max_proposals_per_hour: 3,
        ..PoAConfig::default()
    };
    let poa = PoAConsensus::new(config).unwrap();
    let v = poa.add_validator("v", Arc::new(Ed25519Key::generate()), 1).unwrap();

    let start = 10_000_000;
    let mut now = start;
    for _ in 0..3 {
        poa.can_propose_at(&v, now).unwrap();
        poa.record_proposal_at(&v, now).unwrap();
        now += 60_000;
    }
    assert!(poa.can_propose_at(&v, now).is_err());

    now += RATE_WINDOW_MS;
    assert!(poa.can_propose_at(&v, now).is_ok());
}

#[test]
fn test_ledger_end_to_end() {
    let consensus = Arc::new(PoAConsensus::new(PoAConfig::new(2, 1)).unwrap());
    let alice = consensus
        .add_validator("alice", Arc::new(Ed25519Key::generate()), 1)
        .unwrap();
    let bob = consensus
        .add_validator("bob", Arc::new(Ed25519Key::generate()), 1)
        .unwrap();

    let key = Ed25519Key::generate();
    let mut ledger = Ledger::new(Chain::new("e2e", "init".to_string(), &key).unwrap(), consensus);
    ledger
        .chain_mut()
        .register_participant("p1", "active", BTreeMap::new());
    ledger.chain_mut().grant_capability("p1", "write");
    ledger.chain().check_authorization("p1", "write").unwrap();

    let pid = ledger
        .propose(Block::new(vec![signed("tx-1", "hello", &key)]), &alice)
        .unwrap();
    ledger.sign(&pid, &alice).unwrap();
    assert!(ledger.sign(&pid, &bob).unwrap());
    ledger.commit(&pid).unwrap();
    assert_eq!(ledger.chain().len(), 2);

    // A replayed transaction is refused before any proposal is opened.
    let err = ledger
        .propose(Block::new(vec![signed("tx-1", "replay", &key)]), &bob)
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Chain(ChainError::DuplicateTransaction(_))
    ));
    assert_eq!(ledger.consensus().proposal_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_chain_links_hold(sizes in prop::collection::vec(1usize..5, 1..6)) {
        let key = Ed25519Key::generate();
        let mut chain = Chain::new("prop", "init".to_string(), &key).unwrap();
        let mut next = 0;
        for size in &sizes {
            let txs = (0..*size)
                .map(|_| {
                    next += 1;
                    signed(&format!("tx-{next}"), "payload", &key)
                })
                .collect();
            chain.add_block(Block::new(txs)).unwrap();
        }

        prop_assert_eq!(chain.len(), sizes.len() + 1);
        for i in 1..chain.len() {
            let (prev, block) = (chain.block(i - 1).unwrap(), chain.block(i).unwrap());
            prop_assert_eq!(&block.previous_hash, &prev.hash);
            prop_assert!(block.is_valid());
            for t in 0..block.tx_count() {
                prop_assert!(chain.verify_transaction(i, t));
            }
        }
        prop_assert!(chain.is_valid());
    }
}
