use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zkpf_consolidation_fixtures::{Fixture, MockProver};
use zkpf_sapling_consolidation::{
    BuilderError, ConsolidationConfig, ConsolidationContext, ConsolidationScheduler,
    ConsolidationTransaction, OperationState, SaplingConsolidation, TransactionProver,
    TransactionRequest,
};

fn enabled_config() -> ConsolidationConfig {
    ConsolidationConfig {
        enabled: true,
        interval: 100,
        ..Default::default()
    }
}

fn funded_fixture() -> Fixture {
    let fixture = Fixture::mainnet();
    let x = fixture.wallet.add_account();
    fixture.wallet.receive_many(x, &[100_000; 4], 20);
    fixture
}

async fn wait_until_terminal(op: &SaplingConsolidation) {
    for _ in 0..200 {
        if op.state().is_terminal() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {} did not finish", op.id());
}

/// Prover that blocks each build until released.
struct GatedProver {
    release: Mutex<std_mpsc::Receiver<()>>,
    inner: MockProver,
}

impl TransactionProver for GatedProver {
    fn build(&self, request: &TransactionRequest) -> Result<ConsolidationTransaction, BuilderError> {
        self.release
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| BuilderError::Other("gate closed".into()))?;
        self.inner.build(request)
    }
}

#[tokio::test]
async fn runs_only_on_interval_heights() {
    let fixture = funded_fixture();
    let scheduler = ConsolidationScheduler::new(enabled_config(), fixture.context()).unwrap();

    assert!(scheduler.on_new_tip(1_000_050).unwrap().is_none());
    assert!(scheduler.current().is_none());

    let run = scheduler.on_new_tip(1_000_000).unwrap().unwrap();
    assert_eq!(run.operation.target_height(), 1_000_001);
    run.handle.await.unwrap();

    assert_eq!(run.operation.state(), OperationState::Success);
    assert_eq!(run.operation.result().unwrap().num_tx_created, 1);
    assert_eq!(fixture.sink.submitted().len(), 1);
    assert_eq!(
        scheduler.current().unwrap().id(),
        run.operation.id()
    );
}

#[tokio::test]
async fn disabled_scheduler_never_runs() {
    let fixture = funded_fixture();
    let scheduler =
        ConsolidationScheduler::new(ConsolidationConfig::default(), fixture.context()).unwrap();

    assert!(!scheduler.is_due(1_000_000));
    assert!(scheduler.on_new_tip(1_000_000).unwrap().is_none());
    assert_eq!(fixture.wallet.snapshot_count(), 0);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let fixture = funded_fixture();
    let config = ConsolidationConfig {
        interval: 0,
        ..enabled_config()
    };
    assert!(ConsolidationScheduler::new(config, fixture.context()).is_err());
}

#[tokio::test]
async fn overlapping_runs_are_not_started() {
    let fixture = funded_fixture();
    let (release, gate) = std_mpsc::channel();
    let ctx = ConsolidationContext {
        prover: Arc::new(GatedProver {
            release: Mutex::new(gate),
            inner: MockProver::new(),
        }),
        ..fixture.context()
    };
    let scheduler = ConsolidationScheduler::new(enabled_config(), ctx).unwrap();

    let first = scheduler.on_new_tip(1_000_000).unwrap().unwrap();
    assert!(scheduler.on_new_tip(1_000_100).unwrap().is_none());

    release.send(()).unwrap();
    first.handle.await.unwrap();
    assert_eq!(first.operation.state(), OperationState::Success);

    let second = scheduler.on_new_tip(1_000_200).unwrap().unwrap();
    assert_eq!(second.operation.target_height(), 1_000_201);
    release.send(()).unwrap();
    second.handle.await.unwrap();
}

#[tokio::test]
async fn tip_loop_schedules_and_stops_on_channel_close() {
    let fixture = funded_fixture();
    let scheduler =
        Arc::new(ConsolidationScheduler::new(enabled_config(), fixture.context()).unwrap());

    let (tips_tx, tips_rx) = mpsc::channel(8);
    let loop_handle = tokio::spawn(Arc::clone(&scheduler).run(tips_rx, CancellationToken::new()));

    tips_tx.send(999_999).await.unwrap();
    tips_tx.send(1_000_000).await.unwrap();
    drop(tips_tx);
    loop_handle.await.unwrap().unwrap();

    let op = scheduler.current().unwrap();
    assert_eq!(op.target_height(), 1_000_001);
    wait_until_terminal(&op).await;
    assert_eq!(op.state(), OperationState::Success);
}

#[tokio::test]
async fn shutdown_cancels_running_operation() {
    let fixture = funded_fixture();
    let (release, gate) = std_mpsc::channel();
    let ctx = ConsolidationContext {
        prover: Arc::new(GatedProver {
            release: Mutex::new(gate),
            inner: MockProver::new(),
        }),
        ..fixture.context()
    };
    let scheduler = Arc::new(ConsolidationScheduler::new(enabled_config(), ctx).unwrap());

    let shutdown = CancellationToken::new();
    let (tips_tx, tips_rx) = mpsc::channel(8);
    let loop_handle = tokio::spawn(Arc::clone(&scheduler).run(tips_rx, shutdown.clone()));

    tips_tx.send(1_000_000).await.unwrap();
    let op = loop {
        if let Some(op) = scheduler.current() {
            break op;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    shutdown.cancel();
    loop_handle.await.unwrap().unwrap();
    assert_eq!(op.state(), OperationState::Cancelled);

    release.send(()).unwrap();
    wait_until_terminal(&op).await;
    assert_eq!(op.state(), OperationState::Cancelled);
    assert!(fixture.sink.submitted().is_empty());
}
