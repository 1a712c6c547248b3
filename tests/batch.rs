//! Batch scheduling: grouping, ordering and cooldowns on paused time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sketchbook::batch::{BatchPolicy, run_batch};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn results_keep_input_order_when_items_finish_out_of_order() {
    let policy = BatchPolicy::default();
    // Later items in the group finish first.
    let delays = vec![30u64, 20, 10];

    let results = run_batch(&policy, delays, |index, delay| async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        format!("item-{index}")
    })
    .await;

    assert_eq!(results, vec!["item-0", "item-1", "item-2"]);
}

#[tokio::test(start_paused = true)]
async fn single_group_has_no_cooldown() {
    let start = Instant::now();
    let results =
        run_batch(&BatchPolicy::default(), vec![1, 2, 3], |_, x| async move { x * 2 }).await;

    assert_eq!(results, vec![2, 4, 6]);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn one_cooldown_between_two_groups() {
    let start = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));

    let seen = starts.clone();
    let results = run_batch(&BatchPolicy::default(), vec!["a", "b", "c", "d"], |index, s| {
        seen.lock().unwrap().push((index, start.elapsed()));
        async move { s.to_uppercase() }
    })
    .await;

    assert_eq!(results, vec!["A", "B", "C", "D"]);
    assert_eq!(start.elapsed(), Duration::from_secs(12));

    let starts = starts.lock().unwrap();
    assert_eq!(
        *starts,
        vec![
            (0, Duration::ZERO),
            (1, Duration::ZERO),
            (2, Duration::ZERO),
            (3, Duration::from_secs(12)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn group_runs_concurrently() {
    let start = Instant::now();
    let policy = BatchPolicy {
        group_size: 3,
        cooldown: Duration::from_secs(12),
    };

    run_batch(&policy, vec![5u64, 5, 5], |_, secs| async move {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    })
    .await;

    // Three 5s items in one group take 5s, not 15s.
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn seven_items_make_three_groups_and_two_cooldowns() {
    let start = Instant::now();
    let results = run_batch(&BatchPolicy::default(), (0..7).collect(), |index, x: i32| async move {
        assert_eq!(index as i32, x);
        x
    })
    .await;

    assert_eq!(results, (0..7).collect::<Vec<_>>());
    assert_eq!(start.elapsed(), Duration::from_secs(24));
}

#[tokio::test(start_paused = true)]
async fn failures_occupy_their_slot() {
    let results: Vec<Result<usize, String>> =
        run_batch(&BatchPolicy::default(), vec![0, 1, 2, 3], |index, _| async move {
            if index < 2 {
                Err(format!("failed {index}"))
            } else {
                Ok(index)
            }
        })
        .await;

    assert_eq!(
        results,
        vec![
            Err("failed 0".to_string()),
            Err("failed 1".to_string()),
            Ok(2),
            Ok(3),
        ]
    );
}

#[tokio::test]
async fn empty_input_returns_empty() {
    let results: Vec<u8> =
        run_batch(&BatchPolicy::default(), Vec::<u8>::new(), |_, x| async move { x }).await;
    assert!(results.is_empty());
}
