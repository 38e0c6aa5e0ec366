//! Membership scenarios: pledge, accept, depart and remove end to end

use kernel_common::{NodeState, OutputType, Snapshot};
use kernel_storage::Store;

use super::{key, signing_key, test_config, Harness, EPOCH};
use crate::{compute_round_hash, select_closest, KernelError, ValidationError, HOUR};

#[test]
fn test_second_pledge_rejected_while_pledging() {
    let mut harness = Harness::new(2, test_config());
    let first = signing_key(10);
    let second = signing_key(11);

    harness.pledge(&first, EPOCH + 2 * HOUR);
    assert_eq!(harness.kernel.validators().pledging.as_ref().unwrap().signer, key(&first));

    let timestamp = EPOCH + 2 * HOUR + 1;
    harness.clock.set(timestamp);
    let tx = harness.node_tx(OutputType::NodePledge, &second, None);
    let producer = harness.keys[0].clone();
    let snapshot = harness.snapshot(&producer, harness.round_of(&producer), timestamp, &tx);

    let err = harness.kernel.verify_snapshot(&snapshot).unwrap_err();
    assert!(err.to_string().starts_with("invalid node state"), "{}", err);
    assert!(!err.is_fatal());
}

#[test]
fn test_accept_without_pledge() {
    let harness = Harness::new(2, test_config());
    let candidate = signing_key(10);
    let fake_pledge = harness.node_tx(OutputType::NodePledge, &candidate, None);
    let snapshot = harness.accept_snapshot(&candidate, &fake_pledge, 0, EPOCH + 3 * HOUR);

    assert_eq!(
        harness.kernel.verify_snapshot(&snapshot),
        Err(KernelError::Validation(ValidationError::InvalidConsensusStatus))
    );
}

#[test]
fn test_accept_rejects_mismatched_payload() {
    let mut harness = Harness::new(2, test_config());
    let candidate = signing_key(10);
    let pledge = harness.pledge(&candidate, EPOCH + 2 * HOUR);

    let mut tx = harness.node_tx(OutputType::NodeAccept, &candidate, Some(pledge.hash()));
    tx.extra[40] ^= 0xff;
    let snapshot = harness.snapshot(&candidate, 0, EPOCH + 3 * HOUR, &tx);

    let err = harness.kernel.verify_snapshot(&snapshot).unwrap_err();
    assert!(err.to_string().starts_with("invalid pledge and accept key"), "{}", err);
}

#[test]
fn test_accept_rejects_nonzero_round() {
    let mut harness = Harness::new(2, test_config());
    let candidate = signing_key(10);
    let pledge = harness.pledge(&candidate, EPOCH + 2 * HOUR);

    let snapshot = harness.accept_snapshot(&candidate, &pledge, 1, EPOCH + 3 * HOUR);
    let err = harness.kernel.verify_snapshot(&snapshot).unwrap_err();
    assert_eq!(err.to_string(), "invalid snapshot round 1");
}

#[test]
fn test_accept_rejects_wrong_signer() {
    let mut harness = Harness::new(2, test_config());
    let candidate = signing_key(10);
    let pledge = harness.pledge(&candidate, EPOCH + 2 * HOUR);

    let mut snapshot = harness.accept_snapshot(&candidate, &pledge, 0, EPOCH + 3 * HOUR);
    snapshot.signatures.clear();
    snapshot.sign(&signing_key(99));
    assert!(matches!(
        harness.kernel.verify_snapshot(&snapshot),
        Err(KernelError::Validation(ValidationError::InvalidSignature(_)))
    ));
}

#[test]
fn test_accept_hour_window() {
    let config = crate::KernelConfig {
        accept_time_begin: 1,
        accept_time_end: 23,
        ..test_config()
    };
    let mut harness = Harness::new(2, config);
    let candidate = signing_key(10);
    let pledge = harness.pledge(&candidate, EPOCH + 20 * HOUR);

    // 24 hours after epoch is hour 0 of the next day
    let early = harness.accept_snapshot(&candidate, &pledge, 0, EPOCH + 24 * HOUR);
    assert_eq!(
        harness.kernel.verify_snapshot(&early),
        Err(KernelError::Validation(ValidationError::InvalidAcceptHour(0)))
    );

    let on_time = harness.accept_snapshot(&candidate, &pledge, 0, EPOCH + 25 * HOUR);
    harness.kernel.verify_snapshot(&on_time).unwrap();
}

#[test]
fn test_accept_with_unbounded_reference_window() {
    let config = crate::KernelConfig {
        snapshot_reference_threshold: u64::MAX,
        ..test_config()
    };
    let mut harness = Harness::new(2, config);
    let candidate = signing_key(10);
    let pledge = harness.pledge(&candidate, EPOCH + 2 * HOUR);

    let accept = harness.accept_snapshot(&candidate, &pledge, 0, EPOCH + 3 * HOUR);
    harness.kernel.process_snapshot(&accept).unwrap();
    assert_eq!(
        harness.kernel.validators().find_by_signer(&key(&candidate)).unwrap().state,
        NodeState::Accepted
    );
}

#[test]
fn test_accept_period_expires() {
    let mut harness = Harness::new(2, test_config());
    let candidate = signing_key(10);
    let pledge = harness.pledge(&candidate, EPOCH + 2 * HOUR);

    let late = harness.accept_snapshot(&candidate, &pledge, 0, EPOCH + 15 * HOUR);
    assert!(matches!(
        harness.kernel.verify_snapshot(&late),
        Err(KernelError::Validation(ValidationError::InvalidAcceptPeriod { .. }))
    ));
}

#[test]
fn test_pledge_then_accept_opens_round_one() {
    let mut harness = Harness::new(3, test_config());
    let candidate = signing_key(10);
    let candidate_id = harness.node_id(&candidate);
    assert_eq!(harness.kernel.membership_epoch(), 1);

    let pledge = harness.pledge(&candidate, EPOCH + 2 * HOUR);
    assert_eq!(harness.kernel.membership_epoch(), 2);

    let accept_time = EPOCH + 3 * HOUR;
    let accept = harness.accept_snapshot(&candidate, &pledge, 0, accept_time);
    harness.kernel.process_snapshot(&accept).unwrap();
    assert_eq!(harness.kernel.membership_epoch(), 3);

    let validators = harness.kernel.validators();
    assert!(validators.pledging.is_none());
    assert_eq!(validators.accepted.len(), 4);
    let node = validators.find_by_signer(&key(&candidate)).unwrap();
    assert_eq!(node.state, NodeState::Accepted);
    assert_eq!(node.timestamp, accept_time);

    let graph = harness.kernel.graph();
    let final_round = graph.final_round(&candidate_id).unwrap();
    assert_eq!(final_round.number, 0);
    assert_eq!(final_round.hash, compute_round_hash(&candidate_id, 0, &[accept.clone()]).2);

    let cache = graph.cache_round(&candidate_id).unwrap();
    assert_eq!(cache.number, 1);
    assert_eq!(cache.timestamp, accept_time + harness.kernel.config().snapshot_round_gap + 1);
    assert!(cache.snapshots.is_empty());

    let references = cache.references.unwrap();
    assert_eq!(references.self_hash, final_round.hash);

    let closest = select_closest(&candidate_id, harness.kernel.genesis_nodes()).unwrap();
    let closest_round: Vec<Snapshot> = harness
        .store
        .read_snapshots_for_node_round(&closest, 0)
        .unwrap()
        .into_iter()
        .map(|topo| topo.snapshot)
        .collect();
    assert_eq!(references.external, compute_round_hash(&closest, 0, &closest_round).2);

    let record = harness.kernel.read_round(&candidate_id).unwrap().unwrap();
    assert_eq!(record.number, 1);
    assert_eq!(record.references, Some(references));
}

#[test]
fn test_reload_is_idempotent() {
    let mut harness = Harness::new(3, test_config());
    harness.pledge(&signing_key(10), EPOCH + 2 * HOUR);

    harness.kernel.load_consensus_nodes().unwrap();
    let first_graph = harness.kernel.graph();
    let first_validators = harness.kernel.validators();

    harness.kernel.load_consensus_nodes().unwrap();
    let second_graph = harness.kernel.graph();
    let second_validators = harness.kernel.validators();

    assert_eq!(first_graph.cache_round, second_graph.cache_round);
    assert_eq!(first_graph.final_round, second_graph.final_round);
    assert_eq!(first_graph.graph_timestamp, second_graph.graph_timestamp);
    assert_eq!(first_validators.all, second_validators.all);
    assert_eq!(first_validators.pledging, second_validators.pledging);
    assert_eq!(second_graph.epoch, first_graph.epoch + 1);
}

#[test]
fn test_depart_after_period() {
    let config = test_config();
    let depart_minimum = config.depart_period_minimum;
    let mut harness = Harness::new(3, config);
    let leaving = harness.keys[2].clone();
    let leaving_id = harness.node_id(&leaving);
    let source = harness.kernel.validators().find_by_signer(&key(&leaving)).unwrap().transaction;

    let tx = harness.node_tx(OutputType::NodeDepart, &leaving, Some(source));
    let early = harness.snapshot(&leaving, 1, EPOCH + depart_minimum / 2, &tx);
    assert!(matches!(
        harness.kernel.verify_snapshot(&early),
        Err(KernelError::Validation(ValidationError::InvalidDepartPeriod { .. }))
    ));

    let snapshot = harness.snapshot(&leaving, 1, EPOCH + depart_minimum + HOUR, &tx);
    harness.kernel.process_snapshot(&snapshot).unwrap();

    let validators = harness.kernel.validators();
    assert_eq!(validators.find_by_signer(&key(&leaving)).unwrap().state, NodeState::Departed);
    assert_eq!(validators.accepted.len(), 2);
    assert!(harness.kernel.graph().cache_round(&leaving_id).is_none());
    assert_eq!(harness.store.node_operation().unwrap().transaction, tx.hash());
}

#[test]
fn test_remove_inactive_node() {
    let config = test_config();
    let inactivity = config.remove_inactivity_threshold;
    let mut harness = Harness::new(3, config);
    let producer = harness.keys[0].clone();
    let target = harness.keys[2].clone();
    let source = harness.kernel.validators().find_by_signer(&key(&target)).unwrap().transaction;
    let tx = harness.node_tx(OutputType::NodeRemove, &target, Some(source));

    let own = harness.snapshot(&target, 1, EPOCH + inactivity + HOUR, &tx);
    assert!(matches!(
        harness.kernel.verify_snapshot(&own),
        Err(KernelError::Validation(ValidationError::SelfRemoval(_)))
    ));

    let snapshot = harness.snapshot(&producer, 1, EPOCH + inactivity + HOUR, &tx);
    harness.kernel.process_snapshot(&snapshot).unwrap();

    let validators = harness.kernel.validators();
    assert_eq!(validators.find_by_signer(&key(&target)).unwrap().state, NodeState::Removed);
    assert!(harness.kernel.graph().cache_round(&harness.node_id(&target)).is_none());

    // a removed signer cannot come back
    let again = harness.node_tx(OutputType::NodePledge, &target, None);
    harness.clock.set(EPOCH + inactivity + 2 * HOUR);
    let pledge = harness.snapshot(&producer, 1, EPOCH + inactivity + HOUR + 1, &again);
    assert!(matches!(
        harness.kernel.verify_snapshot(&pledge),
        Err(KernelError::Validation(ValidationError::InvalidNodeState { .. }))
    ));
}
