//! Property-based tests for progress aggregation and retry decisions

use std::sync::Arc;

use proptest::prelude::*;
use resilient_fetch::prelude::*;
use resilient_fetch::progress::ProgressTree;
use resilient_fetch::retry::{backoff_wait_ms, is_attempt_allowed};
use resilient_fetch::testing::{AttemptScript, ScriptedTransport};

fn leaf_params() -> impl Strategy<Value = (f64, f64, f64)> {
    (
        prop_oneof![any::<f64>(), 0.0..1_000.0f64],
        prop_oneof![Just(-1.0), Just(0.0), any::<f64>(), 0.0..1_000.0f64],
        prop_oneof![Just(0.0), 0.1..10.0f64],
    )
}

proptest! {
    #[test]
    fn prop_leaf_percentage_is_bounded((value, max, weight) in leaf_params()) {
        let mut tree = ProgressTree::new();
        let leaf = tree.new_leaf(max, weight);
        tree.set_value(leaf, value).unwrap();

        let p = tree.percentage(leaf).unwrap();
        prop_assert!((0.0..=100.0).contains(&p), "percentage {} out of range", p);
    }

    #[test]
    fn prop_aggregate_is_weighted_mean(
        leaves in prop::collection::vec((0.0..100.0f64, 1.0..100.0f64, 0.1..10.0f64), 1..12)
    ) {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for (value, max, weight) in leaves {
            let leaf = tree.new_leaf(max, weight);
            tree.set_value(leaf, value).unwrap();
            tree.add_child(root, leaf).unwrap();

            weighted += weight * tree.percentage(leaf).unwrap();
            total_weight += weight;
        }

        let p = tree.percentage(root).unwrap();
        prop_assert!((p - weighted / total_weight).abs() < 1e-9);
        prop_assert!((0.0..=100.0).contains(&p));
    }

    #[test]
    fn prop_zero_weight_child_changes_nothing(
        leaves in prop::collection::vec((0.0..100.0f64, 0.1..10.0f64), 1..8),
        extra in 0.0..100.0f64,
    ) {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        for (value, weight) in leaves {
            let leaf = tree.new_leaf(100.0, weight);
            tree.set_value(leaf, value).unwrap();
            tree.add_child(root, leaf).unwrap();
        }
        let before = tree.percentage(root).unwrap();

        let ghost = tree.new_leaf(100.0, 0.0);
        tree.set_value(ghost, extra).unwrap();
        tree.add_child(root, ghost).unwrap();

        prop_assert_eq!(tree.percentage(root).unwrap(), before);
    }

    #[test]
    fn prop_disposing_children_resets_to_zero(
        values in prop::collection::vec(0.0..100.0f64, 0..8)
    ) {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        for value in values {
            let leaf = tree.new_leaf(100.0, 1.0);
            tree.set_value(leaf, value).unwrap();
            tree.add_child(root, leaf).unwrap();
        }

        tree.dispose_all_children(root).unwrap();
        prop_assert_eq!(tree.percentage(root).unwrap(), 0.0);
        prop_assert_eq!(tree.live_count(), 1);
    }

    #[test]
    fn prop_backoff_is_whole_seconds_in_range(attempt in 0u32..64, exponent in 0u32..=30) {
        let wait = backoff_wait_ms(attempt, exponent);
        let ceiling = 1u64 << attempt.min(exponent);

        prop_assert_eq!(wait % 1_000, 0);
        prop_assert!((1..=ceiling).contains(&(wait / 1_000)));
    }

    #[test]
    fn prop_attempt_allowed_matches_limit(limit in -5i32..20, retries_so_far in 0u32..40) {
        let expected = limit < 0 || retries_so_far < limit as u32;
        prop_assert_eq!(is_attempt_allowed(limit, retries_so_far), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_session_never_exceeds_retry_limit(limit in 0i32..6, failures in 0usize..10) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let mut transport = ScriptedTransport::new();
        for _ in 0..failures {
            transport = transport.push(AttemptScript::new().start().fail_with("reset"));
        }
        let transport = transport.repeat(AttemptScript::new().respond(200, "ok"));

        let outcome = runtime.block_on(async {
            let caller = FetchCaller::new(Arc::new(transport), ProgressParent::detached());
            let params = RetryWaitParams::default()
                .with_loading_timeout_ms(0)
                .with_retry_times_max(limit)
                .with_retry_backoff_exponent_max(2);
            caller
                .start_as_promise(FetchRequest::get("https://example.com"), params)
                .await
                .unwrap()
        });

        let limit = limit as usize;
        prop_assert!(outcome.attempts() as usize <= limit + 1);
        prop_assert_eq!(outcome.is_success(), failures <= limit);
        prop_assert_eq!(outcome.attempts() as usize, failures.min(limit) + 1);
    }
}
