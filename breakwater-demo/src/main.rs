//! Console demo: a breakwater pipeline in front of a flaky HTTP backend.
//!
//! The backend answers `429 Too Many Requests` for 80 % of calls. Retries
//! handle `408` only, the breaker counts `408` and `429`, so a burst of 429s
//! opens the circuit and later calls fail fast.
//!
//! Usage: `breakwater-demo [config.json] [calls]`

use anyhow::{Context, Result};
use async_trait::async_trait;
use breakwater::prelude::*;
use rand::Rng;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const FAULT_RESPONSE_PROBABILITY: f64 = 0.8;
const DEFAULT_CALLS: usize = 10;

/// A minimal HTTP response carrying only its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HttpResponse {
    status: u16,
}

impl Signal for HttpResponse {
    fn status_code(&self) -> Option<u16> {
        Some(self.status)
    }
}

/// Simulated backend that rate-limits most requests.
#[derive(Debug)]
struct FlakyBackend {
    path: String,
}

#[async_trait]
impl Operation<HttpResponse, String> for FlakyBackend {
    async fn call(&self, cancel: CancellationToken) -> Result<HttpResponse, String> {
        let fault = rand::thread_rng().gen_bool(FAULT_RESPONSE_PROBABILITY);
        if fault {
            return Ok(HttpResponse { status: 429 });
        }
        tokio::select! {
            () = cancel.cancelled() => Err(format!("GET {} aborted", self.path)),
            () = tokio::time::sleep(Duration::from_millis(50)) => Ok(HttpResponse { status: 200 }),
        }
    }
}

fn demo_config() -> PipelineConfig {
    PipelineConfig::new()
        .with_retry(
            RetryConfig::new()
                .with_max_attempts(4)
                .with_backoff(BackoffType::Constant)
                .with_base_delay_ms(1000)
                .with_jitter(true)
                .with_should_handle(ShouldHandle::status_codes([408])),
        )
        .with_circuit_breaker(
            CircuitBreakerConfig::new()
                .with_break_duration_ms(15_000)
                .with_sampling_duration_ms(30_000)
                .with_failure_ratio(0.2)
                .with_minimum_throughput(3)
                .with_should_handle(ShouldHandle::status_codes([408, 429])),
        )
        .with_timeout(TimeoutConfig::new(5000))
}

/// Issues up to `calls` requests, stopping early once `shutdown` fires.
///
/// Returns the number of calls that were issued.
async fn drive<Op>(
    pipeline: &Pipeline<HttpResponse, String>,
    backend: &Op,
    calls: usize,
    shutdown: &CancellationToken,
) -> usize
where
    Op: Operation<HttpResponse, String>,
{
    for call in 1..=calls {
        match pipeline.invoke(backend, shutdown).await {
            Ok(response) => info!(call, "Http response status code: {}", response.status),
            Err(PipelineError::CircuitOpen(e)) => error!(call, "Http response error: {e}"),
            Err(PipelineError::Cancelled(e)) => {
                warn!(call, "Stopping: {e}");
                return call;
            }
            Err(e) => error!(call, "Http request failed: {e}"),
        }
    }
    calls
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PipelineConfig::from_json_file(&path)
            .with_context(|| format!("loading pipeline config from {path}"))?,
        None => demo_config(),
    };
    let calls = match args.next() {
        Some(raw) => raw.parse().with_context(|| format!("invalid call count: {raw}"))?,
        None => DEFAULT_CALLS,
    };

    let pipeline = Pipeline::<HttpResponse, String>::builder(config)
        .with_name("CustomPipeline")
        .with_event_sink(std::sync::Arc::new(LoggingEventSink::debug()))
        .with_configured_rules()
        .build()
        .context("building pipeline")?;

    let backend = FlakyBackend {
        path: "todos/1".to_string(),
    };
    let shutdown = CancellationToken::new();
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel("interrupted");
        }
    });

    drive(&pipeline, &backend, calls, &shutdown).await;

    let snapshot = pipeline.circuit_breaker().snapshot();
    info!(
        state = %snapshot.state,
        throughput = snapshot.throughput,
        failure_ratio = snapshot.failure_ratio,
        "Final breaker state"
    );
    Ok(())
}
