//! End-to-end scenarios for the governance worker: finalization, timeouts,
//! on-chain discovery, runtime failures, the funding barrier, and the
//! idempotent cancellation pipeline, all driven through the public surface
//! with mock peers.

use gridbroker_chain::MockChainAdapter;
use gridbroker_config::{AgentConfig, EdgeConfig, GovernanceConfig};
use gridbroker_governance::GovernanceWorker;
use gridbroker_persistence::{AgreementStore, EstablishedAgreement, InMemoryStore};
use gridbroker_registry::MockRegistry;
use gridbroker_types::{
    ApiSpec, CancelSource, Deployment, EventId, InboundEvent, OutboundEvent, Policy, PolicyHeader,
    PolicyManager, Proposal, ServiceConfig, PROTOCOL_NAME,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const AGREEMENT_TIMEOUT_S: u64 = 30;

/// Several scan ticks worth of wall time.
const SETTLE: Duration = Duration::from_millis(300);

fn now() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

fn fast_config() -> AgentConfig {
    AgentConfig {
        edge: EdgeConfig {
            geth_url: "http://localhost:8545".to_string(),
            exchange_url: "http://localhost:8080".to_string(),
            agreement_timeout_s: AGREEMENT_TIMEOUT_S,
            device_id: Some("dev-1".to_string()),
        },
        governance: GovernanceConfig {
            finalization_interval_ms: 20,
            maintenance_interval_ms: 25,
            barrier_poll_ms: 10,
            registry_retry_delay_ms: 10,
        },
        log_level: String::new(),
    }
}

fn sealed_proposal(spec_ref: &str) -> String {
    let policy = |name: &str| Policy {
        header: PolicyHeader {
            name: name.to_string(),
            version: "2.0".to_string(),
        },
        api_specs: vec![ApiSpec {
            spec_ref: spec_ref.to_string(),
            version: "1".to_string(),
        }],
    };

    Proposal {
        ts_and_cs: policy("terms").marshal().unwrap(),
        producer_policy: policy("producer").marshal().unwrap(),
        address: "0xA".to_string(),
    }
    .marshal()
    .unwrap()
}

fn accepted_agreement(id: &str, creation_time: u64) -> EstablishedAgreement {
    let mut record = EstablishedAgreement::new(
        id,
        PROTOCOL_NAME,
        sealed_proposal("spec://foo"),
        "c0ffee",
        creation_time,
    );
    record.counterparty_address = "0xA".to_string();
    record.accepted_time = creation_time + 5;
    record
}

fn one_service() -> Deployment {
    let mut deployment = Deployment::new();
    deployment.insert(
        "worker".to_string(),
        ServiceConfig::new("registry/worker:2"),
    );
    deployment
}

struct Harness {
    worker: GovernanceWorker,
    store: Arc<InMemoryStore>,
    registry: Arc<MockRegistry>,
    chain: Arc<MockChainAdapter>,
    outbound: mpsc::Receiver<OutboundEvent>,
}

impl Harness {
    async fn start() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(MockRegistry::new());
        let chain = Arc::new(MockChainAdapter::new());

        let (worker, outbound) = GovernanceWorker::spawn(
            Arc::new(fast_config()),
            store.clone(),
            registry.clone(),
            chain.clone(),
            Arc::new(PolicyManager::new()),
        )
        .await
        .unwrap();

        Harness {
            worker,
            store,
            registry,
            chain,
            outbound,
        }
    }

    async fn fund(&self) {
        self.worker
            .handle_event(InboundEvent::AccountFunded {
                account: "0xFEED".to_string(),
            })
            .await;
    }

    async fn record(&self, id: &str) -> EstablishedAgreement {
        self.store
            .get_agreement(id, PROTOCOL_NAME)
            .await
            .unwrap()
            .unwrap()
    }

    async fn next_cancellation(&mut self) -> OutboundEvent {
        loop {
            let event = timeout(Duration::from_secs(2), self.outbound.recv())
                .await
                .expect("timed out waiting for cancellation event")
                .expect("outbound channel closed");
            if event.id() == EventId::AgreementEnded {
                return event;
            }
        }
    }
}

#[tokio::test]
async fn test_happy_finalization() {
    let harness = Harness::start().await;
    harness
        .store
        .save_agreement(&accepted_agreement("ag-1", now()))
        .await
        .unwrap();
    harness.chain.set_recorded("ag-1");

    harness.fund().await;
    tokio::time::sleep(SETTLE).await;

    let record = harness.record("ag-1").await;
    assert_ne!(record.finalized_time, 0, "agreement should be finalized");
    assert!(!record.terminated());
    assert!(!record.archived);

    // the registry saw the finalized label with the declared service spec
    let state = harness.registry.agreement_state("ag-1").unwrap();
    assert_eq!(state.state, "Finalized Agreement");
    assert_eq!(state.microservice, "spec://foo");

    let put = &harness.registry.put_calls()[0];
    assert_eq!(put.device_id, "dev-1");
    assert_eq!(put.agreement_id, "ag-1");

    assert_eq!(harness.chain.terminate_count("ag-1"), 0);
}

#[tokio::test]
async fn test_finalization_timeout_cancels_with_reason_100() {
    let mut harness = Harness::start().await;
    // created long enough ago that the timeout has already elapsed
    harness
        .store
        .save_agreement(&accepted_agreement("ag-1", now() - AGREEMENT_TIMEOUT_S - 5))
        .await
        .unwrap();

    harness.fund().await;
    tokio::time::sleep(SETTLE).await;

    let record = harness.record("ag-1").await;
    assert!(record.terminated());
    assert!(record.archived);
    assert_eq!(harness.chain.terminate_reasons("ag-1"), vec![100]);
    assert_eq!(harness.registry.delete_count("ag-1"), 1);

    let event = harness.next_cancellation().await;
    assert_eq!(event.agreement_id(), "ag-1");
}

#[tokio::test]
async fn test_on_chain_discovery_cancels_with_reason_106() {
    let mut harness = Harness::start().await;
    let mut record = accepted_agreement("ag-1", now());
    record.finalized_time = now();
    harness.store.save_agreement(&record).await.unwrap();
    // never marked recorded on the mock chain: the counterparty cancelled

    harness.fund().await;
    tokio::time::sleep(SETTLE).await;

    let record = harness.record("ag-1").await;
    assert!(record.archived);
    assert_eq!(harness.chain.terminate_reasons("ag-1"), vec![106]);

    let event = harness.next_cancellation().await;
    assert_eq!(event.agreement_id(), "ag-1");
}

#[tokio::test]
async fn test_prelaunch_timeout_cancels_with_reason_104() {
    let mut harness = Harness::start().await;
    let mut record = accepted_agreement("ag-1", now() - 4000);
    record.accepted_time = now() - 3700; // over the 60 minute prelaunch cap
    record.finalized_time = now() - 3600;
    harness.store.save_agreement(&record).await.unwrap();
    harness.chain.set_recorded("ag-1");

    harness.fund().await;
    tokio::time::sleep(SETTLE).await;

    let record = harness.record("ag-1").await;
    assert!(record.archived);
    assert_eq!(harness.chain.terminate_reasons("ag-1"), vec![104]);

    let event = harness.next_cancellation().await;
    assert_eq!(event.agreement_id(), "ag-1");
}

#[tokio::test]
async fn test_container_failure_event_cancels_with_reason_103() {
    let mut harness = Harness::start().await;

    // counterparty is still unset, so the scan loops must leave the record
    // alone; only the command path may touch it
    let record = EstablishedAgreement::new(
        "ag-1",
        PROTOCOL_NAME,
        sealed_proposal("spec://foo"),
        "c0ffee",
        now(),
    );
    harness.store.save_agreement(&record).await.unwrap();

    harness.fund().await;
    harness
        .worker
        .handle_event(InboundEvent::ExecutionFailed {
            protocol: PROTOCOL_NAME.to_string(),
            agreement_id: "ag-1".to_string(),
            deployment: Some(one_service()),
        })
        .await;
    tokio::time::sleep(SETTLE).await;

    let record = harness.record("ag-1").await;
    assert!(record.archived);
    assert_eq!(harness.chain.terminate_reasons("ag-1"), vec![103]);
    assert_eq!(harness.chain.verify_count("ag-1"), 0);

    // exactly one teardown request went out
    let event = harness.next_cancellation().await;
    assert_eq!(event.agreement_id(), "ag-1");
    match timeout(Duration::from_millis(100), harness.outbound.recv()).await {
        Err(_) => {}
        Ok(event) => panic!("unexpected extra outbound event: {:?}", event),
    }
}

#[tokio::test]
async fn test_double_cancel_race_terminates_on_chain_once() {
    let mut harness = Harness::start().await;
    // timed out for the scanner, and about to be user-cancelled too
    harness
        .store
        .save_agreement(&accepted_agreement("ag-1", now() - AGREEMENT_TIMEOUT_S - 5))
        .await
        .unwrap();

    harness.fund().await;
    harness
        .worker
        .handle_event(InboundEvent::CancellationRequested {
            source: CancelSource::Api,
            protocol: PROTOCOL_NAME.to_string(),
            agreement_id: "ag-1".to_string(),
            deployment: None,
        })
        .await;
    tokio::time::sleep(SETTLE).await;

    let record = harness.record("ag-1").await;
    assert!(record.archived);
    assert_eq!(
        harness.chain.terminate_count("ag-1"),
        1,
        "concurrent cancellations must reach the chain at most once"
    );
    assert!(harness.registry.delete_count("ag-1") >= 1);

    let event = harness.next_cancellation().await;
    assert_eq!(event.agreement_id(), "ag-1");
}

#[tokio::test]
async fn test_funding_barrier_holds_and_preserves_order() {
    let harness = Harness::start().await;
    harness
        .store
        .save_agreement(&accepted_agreement("ag-1", now()))
        .await
        .unwrap();

    // queue work before the account is funded: start execution, then cancel
    harness
        .worker
        .handle_event(InboundEvent::ExecutionBegun {
            protocol: PROTOCOL_NAME.to_string(),
            agreement_id: "ag-1".to_string(),
            deployment: one_service(),
        })
        .await;
    harness
        .worker
        .handle_event(InboundEvent::CancellationRequested {
            source: CancelSource::Internal,
            protocol: PROTOCOL_NAME.to_string(),
            agreement_id: "ag-1".to_string(),
            deployment: Some(one_service()),
        })
        .await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let record = harness.record("ag-1").await;
    assert_eq!(
        record.execution_start_time, 0,
        "no command may run before funding"
    );
    assert!(!record.terminated());

    harness.fund().await;
    tokio::time::sleep(SETTLE).await;

    // both queued commands ran, in arrival order: execution start landed
    // before the cleanup archived the record
    let record = harness.record("ag-1").await;
    assert_ne!(record.execution_start_time, 0);
    assert!(record.terminated());
    assert!(record.archived);
}

#[tokio::test]
async fn test_loops_skip_records_outside_their_filters() {
    let harness = Harness::start().await;

    // no counterparty address yet
    let unaccepted = EstablishedAgreement::new(
        "ag-anon",
        PROTOCOL_NAME,
        sealed_proposal("spec://foo"),
        "c0ffee",
        now() - AGREEMENT_TIMEOUT_S - 100,
    );
    harness.store.save_agreement(&unaccepted).await.unwrap();

    // already terminated but not yet archived
    let mut terminated = accepted_agreement("ag-done", now() - AGREEMENT_TIMEOUT_S - 100);
    terminated.execution_start_time = now() - 50;
    terminated.terminated_time = now() - 10;
    harness.store.save_agreement(&terminated).await.unwrap();

    harness.fund().await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.chain.verify_count("ag-anon"), 0);
    assert_eq!(harness.chain.verify_count("ag-done"), 0);
    assert_eq!(harness.chain.terminate_count("ag-anon"), 0);
    assert_eq!(harness.chain.terminate_count("ag-done"), 0);
    assert!(harness.registry.put_calls().is_empty());
    assert_eq!(harness.registry.delete_count("ag-anon"), 0);
    assert_eq!(harness.registry.delete_count("ag-done"), 0);
}

#[tokio::test]
async fn test_archived_record_is_never_mutated_again() {
    let mut harness = Harness::start().await;
    harness
        .store
        .save_agreement(&accepted_agreement("ag-1", now() - AGREEMENT_TIMEOUT_S - 5))
        .await
        .unwrap();

    harness.fund().await;
    tokio::time::sleep(SETTLE).await;

    let archived = harness.record("ag-1").await;
    assert!(archived.archived);
    let _ = harness.next_cancellation().await;

    // several more scan cycles pass without touching the record
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.record("ag-1").await, archived);
    assert_eq!(harness.chain.terminate_count("ag-1"), 1);
}

#[tokio::test]
async fn test_maintenance_probes_running_agreements() {
    let mut harness = Harness::start().await;
    let mut record = accepted_agreement("ag-1", now());
    record.finalized_time = now();
    record.execution_start_time = now();
    record.current_deployment = one_service();
    harness.store.save_agreement(&record).await.unwrap();
    harness.chain.set_recorded("ag-1");

    harness.fund().await;

    let mut probes = 0;
    for _ in 0..2 {
        let event = timeout(Duration::from_secs(2), harness.outbound.recv())
            .await
            .expect("timed out waiting for maintenance probe")
            .expect("outbound channel closed");
        if let OutboundEvent::Maintenance {
            agreement_id,
            deployment,
            ..
        } = event
        {
            assert_eq!(agreement_id, "ag-1");
            assert!(deployment.contains_key("worker"));
            probes += 1;
        }
    }
    assert_eq!(probes, 2, "maintenance probes should repeat every interval");
}

#[tokio::test]
async fn test_contract_init_failures_delay_but_do_not_disable_governance() {
    let mut harness = Harness::start().await;
    harness.chain.fail_init_times(1);
    harness
        .store
        .save_agreement(&accepted_agreement("ag-1", now() - AGREEMENT_TIMEOUT_S - 5))
        .await
        .unwrap();

    harness.fund().await;

    // first tick burns the injected failure, the 1s backoff passes, and the
    // loop still converges on cancellation
    let event = harness.next_cancellation().await;
    assert_eq!(event.agreement_id(), "ag-1");
    assert!(harness.chain.init_count() >= 2);

    let record = harness.record("ag-1").await;
    assert!(record.archived);
}

#[tokio::test]
async fn test_device_registration_rotates_registry_token() {
    let harness = Harness::start().await;

    // rotate the token and let the command land before any agreement exists
    harness.fund().await;
    harness
        .worker
        .handle_event(InboundEvent::EdgeRegistered {
            token: "rotated-token".to_string(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness
        .store
        .save_agreement(&accepted_agreement("ag-1", now()))
        .await
        .unwrap();
    harness.chain.set_recorded("ag-1");
    tokio::time::sleep(SETTLE).await;

    let puts = harness.registry.put_calls();
    assert!(!puts.is_empty());
    assert_eq!(
        puts.last().unwrap().token,
        "rotated-token",
        "finalization PUTs should use the rotated token"
    );
}
