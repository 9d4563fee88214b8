//! End-to-end pipeline scenarios through the public API.

use breakwater::prelude::*;
use breakwater::testing::{assert_circuit_open, assert_retries_exhausted, ScriptedOperation, SlowOperation, Step};
use mockall::mock;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub Verdict {}

    impl Classifier<u16, String> for Verdict {
        fn classify(&self, outcome: &Outcome<u16, String>) -> Classification;
    }
}

fn breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig::new()
        .with_failure_ratio(0.2)
        .with_minimum_throughput(3)
        .with_sampling_duration_ms(30_000)
        .with_break_duration_ms(15_000)
        .with_should_handle(ShouldHandle::status_codes([408, 429]))
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_after_two_failures_and_a_success() {
    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(CollectingEventSink::new());
    let config = PipelineConfig::new()
        .with_retry(RetryConfig::new().with_should_handle(ShouldHandle::status_codes([408])))
        .with_circuit_breaker(breaker_config());
    let pipeline = Pipeline::<u16, String>::builder(config)
        .with_clock(clock.clone())
        .with_event_sink(sink.clone())
        .with_configured_rules()
        .build()
        .unwrap();
    let op = ScriptedOperation::new([Step::ok(429), Step::ok(429), Step::ok(200)], Step::ok(200));

    assert_eq!(pipeline.invoke_uncancellable(&op).await.unwrap(), 429);
    assert_eq!(pipeline.invoke_uncancellable(&op).await.unwrap(), 429);
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Closed);
    assert_eq!(pipeline.invoke_uncancellable(&op).await.unwrap(), 200);

    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Open);
    assert_eq!(sink.count(breakwater::events::BREAKER_OPENED), 1);

    let rejected = pipeline.invoke_uncancellable(&op).await;
    assert_circuit_open(&rejected, CircuitState::Open);
    assert_eq!(op.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn constant_backoff_exhausts_after_three_attempts() {
    let config = PipelineConfig::new().with_retry(
        RetryConfig::new()
            .with_max_attempts(3)
            .with_backoff(BackoffType::Constant)
            .with_base_delay_ms(1000)
            .with_jitter(false)
            .with_should_handle(ShouldHandle::status_codes([408])),
    );
    let pipeline = Pipeline::<u16, String>::new(config).unwrap();
    let op = ScriptedOperation::<u16, String>::always_ok(408);
    let started = tokio::time::Instant::now();

    let result = pipeline.invoke_uncancellable(&op).await;

    assert_retries_exhausted(&result, 3);
    assert_eq!(op.calls(), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    match result {
        Err(PipelineError::RetriesExhausted(e)) => {
            assert_eq!(e.total_delay, Duration::from_secs(2));
            assert_eq!(e.last, Outcome::Success(408));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn slow_operation_times_out_and_counts_everywhere() {
    let config = PipelineConfig::new()
        .with_retry(RetryConfig::new().with_max_attempts(1))
        .with_circuit_breaker(CircuitBreakerConfig::new().with_minimum_throughput(1))
        .with_timeout(TimeoutConfig::new(5000));
    let pipeline = Pipeline::<u16, String>::new(config).unwrap();
    let op = SlowOperation::new(Duration::from_secs(6), 200u16);

    let result = pipeline.invoke_uncancellable(&op).await;

    match result {
        Err(PipelineError::RetriesExhausted(e)) => assert!(e.last.is_timeout()),
        other => panic!("expected a handled timeout, got {other:?}"),
    }
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn breaker_classifies_the_aggregate_once() {
    let mut verdict = MockVerdict::new();
    verdict
        .expect_classify()
        .withf(|outcome| matches!(outcome, Outcome::Failure(e) if e == "down"))
        .times(1)
        .return_const(Classification::Handled);

    let config = PipelineConfig::new().with_retry(
        RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay_ms(10)
            .with_max_delay_ms(10),
    );
    let pipeline = Pipeline::<u16, String>::builder(config)
        .with_breaker_classifier(verdict)
        .with_configured_rules()
        .build()
        .unwrap();
    let op = ScriptedOperation::<u16, String>::always_err("down".into());

    let result = pipeline.invoke_uncancellable(&op).await;

    assert_retries_exhausted(&result, 3);
    assert_eq!(pipeline.circuit_breaker().snapshot().handled_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn seeded_jitter_is_reproducible() {
    async fn total_delay(seed: u64) -> Duration {
        let config = PipelineConfig::new().with_retry(
            RetryConfig::new()
                .with_max_attempts(4)
                .with_backoff(BackoffType::Exponential)
                .with_base_delay_ms(100)
                .with_jitter(true),
        );
        let pipeline = Pipeline::<u16, String>::builder(config)
            .with_random(Arc::new(SeededRandom::new(seed)))
            .with_configured_rules()
            .build()
            .unwrap();
        let op = ScriptedOperation::<u16, String>::always_err("down".into());
        match pipeline.invoke_uncancellable(&op).await {
            Err(PipelineError::RetriesExhausted(e)) => e.total_delay,
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    let first = total_delay(11).await;
    assert_eq!(first, total_delay(11).await);
    assert!(first <= Duration::from_millis(100 + 200 + 400));
}

#[test]
fn pipeline_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "retry": {{
                "max_attempts": 2,
                "backoff_type": "linear",
                "base_delay_ms": 5,
                "jitter": false,
                "should_handle": [{{"rule": "status_code", "codes": [408]}}]
            }},
            "circuit_breaker": {{
                "minimum_throughput": 1,
                "failure_ratio": 1.0,
                "should_handle": [{{"rule": "status_code", "codes": [503]}}]
            }},
            "timeout": {{"per_attempt_ms": 1000}}
        }}"#
    )
    .unwrap();

    let config = PipelineConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.retry.backoff_type, BackoffType::Linear);
    assert_eq!(config.circuit_breaker.break_duration_ms, 15_000);

    let pipeline = Pipeline::<u16, String>::new(config).unwrap();
    let op = ScriptedOperation::<u16, String>::always_ok(503);
    let result = tokio_test::block_on(pipeline.invoke_uncancellable(&op));

    assert_eq!(result.unwrap(), 503);
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Open);
}

#[test]
fn invalid_config_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"circuit_breaker": {{"failure_ratio": 1.5}}}}"#).unwrap();

    let err = PipelineConfig::from_json_file(file.path()).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "circuit_breaker.failure_ratio",
            ..
        }
    ));
}
