//! Retire scheduler driving the full pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{BlockFreezer, RetireConfig, RetireScheduler, StepRange, TxNum};
use strata_testkit::prelude::*;

const TXS_PER_BLOCK: u64 = 5;
const BLOCKS: u64 = 20;

fn setup() -> (TestAggregator, Model) {
    let t = TestAggregator::new();
    let changes: Vec<Change> = (0..BLOCKS * TXS_PER_BLOCK)
        .map(|tx: TxNum| Change::put("accounts", &[b'k', (tx % 4) as u8], &tx.to_be_bytes(), tx))
        .collect();
    t.write(&changes).unwrap();
    t.write_blocks(BLOCKS, TXS_PER_BLOCK).unwrap();
    let mut model = Model::new();
    model.apply(&changes);
    (t, model)
}

fn retire_config() -> RetireConfig {
    RetireConfig::default().min_batch(10).immutability_threshold(0)
}

fn account_ranges(t: &TestAggregator) -> Vec<StepRange> {
    t.files()
        .into_iter()
        .filter(|f| f.domain == "accounts")
        .map(|f| f.range)
        .collect()
}

#[test]
fn ticks_freeze_merge_and_index() {
    let (t, model) = setup();
    let freezer = Arc::new(MemBlockFreezer::new());
    let scheduler = RetireScheduler::new(
        Arc::clone(&t.agg),
        Arc::clone(&freezer) as Arc<dyn BlockFreezer>,
        retire_config(),
    );
    let cancel = CancelToken::new();

    let first = scheduler.tick(BLOCKS, &cancel);
    assert!(first.is_ok(), "{:?}", first.errors);
    assert_eq!(first.retired, Some((0, 10)));
    assert_eq!(first.frozen.len(), 5);
    assert_eq!(t.end_tx_num_frozen(), 50);
    assert_eq!(
        account_ranges(&t),
        vec![StepRange::new(0, 4).unwrap(), StepRange::new(4, 5).unwrap()]
    );
    assert!(!t.needs_index_rebuild());

    let second = scheduler.tick(BLOCKS, &cancel);
    assert!(second.is_ok(), "{:?}", second.errors);
    assert_eq!(second.retired, Some((10, 20)));
    assert_eq!(t.end_tx_num_frozen(), 100);
    assert_eq!(
        account_ranges(&t),
        vec![StepRange::new(0, 8).unwrap(), StepRange::new(8, 10).unwrap()]
    );

    let idle = scheduler.tick(BLOCKS, &cancel);
    assert_eq!(idle.retired, None);
    assert!(idle.frozen.is_empty());
    assert_eq!(idle.merged, 0);
    assert_eq!(freezer.calls(), vec![(0, 10), (10, 20)]);

    let view = t.begin_view().unwrap();
    for key in model.keys("accounts") {
        assert_eq!(view.get_latest("accounts", &key).unwrap(), model.latest("accounts", &key));
    }
}

#[test]
fn failed_block_freeze_is_retried_next_tick() {
    let (t, _) = setup();
    let freezer = Arc::new(MemBlockFreezer::new());
    let scheduler = RetireScheduler::new(
        Arc::clone(&t.agg),
        Arc::clone(&freezer) as Arc<dyn BlockFreezer>,
        retire_config(),
    );
    let cancel = CancelToken::new();

    freezer.fail_next();
    let failed = scheduler.tick(BLOCKS, &cancel);
    assert!(!failed.is_ok());
    assert_eq!(failed.retired, None);
    assert_eq!(t.end_tx_num_frozen(), 0);

    let retried = scheduler.tick(BLOCKS, &cancel);
    assert!(retried.is_ok());
    assert_eq!(retried.retired, Some((0, 10)));
    assert_eq!(t.end_tx_num_frozen(), 50);
}

#[test]
fn retention_prunes_behind_the_frozen_end() {
    let (t, _) = setup();
    let freezer = Arc::new(MemBlockFreezer::new());
    let scheduler = RetireScheduler::new(
        Arc::clone(&t.agg),
        Arc::clone(&freezer) as Arc<dyn BlockFreezer>,
        retire_config().retention_steps(Some(2)),
    );
    let cancel = CancelToken::new();
    scheduler.tick(BLOCKS, &cancel);
    let outcome = scheduler.tick(BLOCKS, &cancel);

    let pruned = outcome.pruned.expect("prune ran");
    assert_eq!(pruned.horizon, 8);
    assert_eq!(account_ranges(&t), vec![StepRange::new(8, 10).unwrap()]);
    // storage is not prunable
    let storage: Vec<_> = t.files().into_iter().filter(|f| f.domain == "storage").collect();
    assert_eq!(storage.first().map(|f| f.range.from), Some(0));
}

#[test]
fn spawned_scheduler_catches_up_and_stops() {
    let (t, _) = setup();
    let freezer = Arc::new(MemBlockFreezer::new());
    let scheduler = Arc::new(RetireScheduler::new(
        Arc::clone(&t.agg),
        freezer as Arc<dyn BlockFreezer>,
        retire_config(),
    ));
    let handle = scheduler.spawn(Duration::from_millis(5), || BLOCKS).unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    while t.end_tx_num_frozen() < 100 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    handle.stop();
    assert_eq!(t.end_tx_num_frozen(), 100);
}
