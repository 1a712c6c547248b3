//! Retry orchestration timing, on paused tokio time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use sketchbook::dispatch::retry::{AttemptResult, RetryPolicy, run_with_retry};
use sketchbook::error::SketchbookError;
use tokio::time::Instant;

fn transient() -> SketchbookError {
    SketchbookError::Provider {
        provider: "modelslab".into(),
        message: "Failed to generate image".into(),
    }
}

#[tokio::test(start_paused = true)]
async fn three_transient_failures_wait_two_then_four_seconds() {
    let start = Instant::now();
    let offsets = Arc::new(std::sync::Mutex::new(Vec::new()));

    let seen = offsets.clone();
    let err = run_with_retry(&RetryPolicy::default(), "modelslab", |_| {
        seen.lock().unwrap().push(start.elapsed());
        async { AttemptResult::Retryable(transient()) }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, SketchbookError::Provider { .. }));
    assert_eq!(
        *offsets.lock().unwrap(),
        vec![
            Duration::ZERO,
            Duration::from_secs(2),
            Duration::from_secs(6),
        ]
    );
    // No sleep after the final attempt.
    assert_eq!(start.elapsed(), Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_stops_immediately() {
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let err = run_with_retry(&RetryPolicy::default(), "openai", |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { AttemptResult::Fatal(SketchbookError::Config("no key".into())) }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, SketchbookError::Config(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn success_after_one_retry() {
    let start = Instant::now();

    let url = run_with_retry(&RetryPolicy::default(), "modelslab", |attempt| async move {
        if attempt == 1 {
            AttemptResult::Retryable(transient())
        } else {
            AttemptResult::Success(format!("https://cdn.test/attempt-{attempt}.mp4"))
        }
    })
    .await
    .unwrap();

    assert_eq!(url, "https://cdn.test/attempt-2.mp4");
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn attempt_numbers_are_one_based() {
    let numbers = std::sync::Mutex::new(Vec::new());

    let _ = run_with_retry(&RetryPolicy::default(), "modelslab", |attempt| {
        numbers.lock().unwrap().push(attempt);
        async { AttemptResult::Retryable(transient()) }
    })
    .await;

    assert_eq!(*numbers.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn classify_uses_predicate() {
    let is_signature = |e: &SketchbookError| {
        e.provider_message()
            .is_some_and(|m| m.contains("Failed to generate image"))
    };

    assert!(matches!(
        AttemptResult::classify(Ok("u".into()), is_signature),
        AttemptResult::Success(_)
    ));
    assert!(matches!(
        AttemptResult::classify(Err(transient()), is_signature),
        AttemptResult::Retryable(_)
    ));
    assert!(matches!(
        AttemptResult::classify(Err(SketchbookError::Parse("x".into())), is_signature),
        AttemptResult::Fatal(_)
    ));
}
