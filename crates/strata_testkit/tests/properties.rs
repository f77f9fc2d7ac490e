//! Property tests: coverage, reads against a reference model, context
//! stability across merges, and the codec round trip.

use proptest::prelude::*;
use strata_codec::{compress_from, uncompress_to, write_interchange, CompressorConfig, Decompressor};
use strata_core::{CoreError, Order, TxNum};
use strata_testkit::prelude::*;

const DOMAINS: &[&str] = &["accounts", "storage"];
const MAX_TX: TxNum = 80;

fn run(t: &TestAggregator, action: Action) {
    let cancel = CancelToken::new();
    match action {
        Action::BuildFiles => {
            t.build_files(MAX_TX, &cancel).unwrap();
        }
        Action::Merge => {
            t.merge_loop(&cancel).unwrap();
        }
        Action::Prune(behind) => {
            let end_step = t.end_tx_num_frozen() / TEST_STEP;
            t.prune(end_step.saturating_sub(behind), &cancel).unwrap();
        }
        Action::BuildIndices => {
            t.build_optional_missed_indices(&cancel).unwrap();
        }
    }
}

/// Every domain's chain is contiguous from its pruned boundary to the
/// frozen end.
fn check_coverage(t: &TestAggregator) -> Result<(), TestCaseError> {
    let ctx = t.make_context().unwrap();
    let end_step = t.end_tx_num_frozen() / TEST_STEP;
    for d in ctx.domains() {
        let mut at = d.pruned_to();
        for r in d.ranges() {
            prop_assert_eq!(r.from, at, "gap or overlap in {}", d.name());
            at = r.to;
        }
        prop_assert_eq!(at, end_step, "{} does not reach the frozen end", d.name());
    }
    Ok(())
}

fn check_reads(t: &TestAggregator, model: &Model) -> Result<(), TestCaseError> {
    let view = t.begin_view().unwrap();
    for &domain in DOMAINS {
        let boundary = view.context().domain(domain).unwrap().pruned_to() * TEST_STEP;
        for key in model.keys(domain) {
            let latest = view.get_latest(domain, &key).unwrap();
            match model.last_change(domain, &key) {
                Some(tx) if tx >= boundary => {
                    prop_assert_eq!(latest, model.latest(domain, &key));
                }
                _ => {
                    prop_assert_eq!(latest, None);
                }
            }

            for at in (boundary..=MAX_TX).step_by(7) {
                match view.get_as_of(domain, &key, at) {
                    Ok(v) => {
                        prop_assert_eq!(v, model.as_of(domain, &key, at));
                    }
                    Err(CoreError::RetentionViolation { .. }) => {
                        prop_assert!(boundary > 0);
                        prop_assert!(model.tx_nums(domain, &key, boundary, at, Order::Asc).is_empty());
                    }
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                }
            }

            let asc: Vec<TxNum> = view
                .index_range(domain, &key, None, None, Order::Asc, None)
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            prop_assert_eq!(&asc, &model.tx_nums(domain, &key, boundary, TxNum::MAX, Order::Asc));

            let desc: Vec<TxNum> = view
                .index_range(domain, &key, None, None, Order::Desc, Some(3))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            let expected: Vec<TxNum> = asc.iter().rev().take(3).copied().collect();
            prop_assert_eq!(desc, expected);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn maintenance_keeps_coverage_and_reads(
        changes in history_strategy(DOMAINS, 6, MAX_TX),
        actions in prop::collection::vec(action_strategy(), 1..8),
    ) {
        let t = TestAggregator::new();
        t.write(&changes).unwrap();
        let mut model = Model::new();
        model.apply(&changes);

        for action in actions {
            run(&t, action);
            check_coverage(&t)?;
            check_reads(&t, &model)?;
        }
    }

    #[test]
    fn context_survives_merge(changes in history_strategy(DOMAINS, 4, MAX_TX)) {
        let t = TestAggregator::new();
        t.write(&changes).unwrap();
        let mut model = Model::new();
        model.apply(&changes);
        t.build_files(MAX_TX, &CancelToken::new()).unwrap();

        let view = t.begin_view().unwrap();
        let read = |v: &strata_core::AggregatorView| -> Vec<_> {
            model
                .keys("accounts")
                .into_iter()
                .map(|k| {
                    let latest = v.get_latest("accounts", &k).unwrap();
                    let txs: Vec<TxNum> = v
                        .index_range("accounts", &k, None, None, Order::Asc, None)
                        .unwrap()
                        .collect::<Result<_, _>>()
                        .unwrap();
                    (latest, txs)
                })
                .collect()
        };
        let before = read(&view);
        let merges = t.merge_loop(&CancelToken::new()).unwrap();
        prop_assert!(merges > 0);
        prop_assert_eq!(&read(&view), &before);
        prop_assert_eq!(&read(&t.begin_view().unwrap()), &before);
    }

    #[test]
    fn interchange_round_trip(words in words_strategy(200)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.seg");
        let mut input = Vec::new();
        for w in &words {
            write_interchange(&mut input, w).unwrap();
        }

        let config = CompressorConfig::default().pattern_len(2, 16).min_pattern_score(4).workers(2);
        let stats = compress_from(input.as_slice(), &path, config, &CancelToken::new()).unwrap();
        prop_assert_eq!(stats.words, words.len() as u64);

        let segment = Decompressor::open(&path).unwrap();
        let mut output = Vec::new();
        uncompress_to(&segment, &mut output, &CancelToken::new()).unwrap();
        prop_assert_eq!(output, input);
    }
}
