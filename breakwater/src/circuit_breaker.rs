//! Circuit breaker with a failure-ratio sliding window.
//!
//! # States
//! - Closed: calls pass through, outcomes are sampled
//! - Open: calls fail fast with [`CircuitOpenError`]
//! - HalfOpen: exactly one probe call is admitted
//! - Isolated: held open by hand until [`CircuitBreaker::reset`]
//!
//! # Transitions
//! ```text
//! Closed   → Open:     samples >= minimum_throughput and handled/total >= failure_ratio
//! Open     → HalfOpen: now - opened_at >= break_duration (checked lazily)
//! HalfOpen → Closed:   probe outcome not handled
//! HalfOpen → Open:     probe outcome handled
//! ```
//!
//! All state lives behind one mutex. Admission and recording each run in a
//! single critical section, and the window is pruned lazily inside them.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CircuitBreakerConfig;
use crate::errors::CircuitOpenError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::outcome::Classification;

/// Circuit breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the break duration elapses.
    Open,
    /// One probe call decides whether to close or reopen.
    HalfOpen,
    /// Calls are rejected until manually reset.
    Isolated,
}

impl CircuitState {
    /// Returns the state as a snake_case string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
            Self::Isolated => "isolated",
        }
    }

    fn event_type(self) -> &'static str {
        match self {
            Self::Closed => events::BREAKER_CLOSED,
            Self::Open => events::BREAKER_OPENED,
            Self::HalfOpen => events::BREAKER_HALF_OPENED,
            Self::Isolated => events::BREAKER_ISOLATED,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    handled: bool,
}

/// Time-ordered samples inside the trailing window, with running totals.
#[derive(Debug)]
struct SlidingWindow {
    span: Duration,
    samples: VecDeque<Sample>,
    handled: usize,
}

impl SlidingWindow {
    fn new(span: Duration) -> Self {
        Self {
            span,
            samples: VecDeque::new(),
            handled: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(oldest.at) <= self.span {
                break;
            }
            if oldest.handled {
                self.handled -= 1;
            }
            self.samples.pop_front();
        }
    }

    fn push(&mut self, sample: Sample) {
        if sample.handled {
            self.handled += 1;
        }
        self.samples.push_back(sample);
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.handled = 0;
    }

    fn total(&self) -> usize {
        self.samples.len()
    }

    fn failure_ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.handled as f64 / self.samples.len() as f64
    }
}

#[derive(Debug)]
struct BreakerState {
    phase: CircuitState,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    /// Bumped on every transition; permits from an older phase are stale.
    generation: u64,
}

/// A transition to report once the lock is released.
#[derive(Debug, Clone, Copy)]
struct StateChange {
    from: CircuitState,
    to: CircuitState,
    throughput: usize,
    failure_ratio: f64,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Samples inside the window.
    pub throughput: usize,
    /// Handled failures inside the window.
    pub handled_failures: usize,
    /// `handled_failures / throughput`, or 0 for an empty window.
    pub failure_ratio: f64,
    /// Whether a HalfOpen probe is running.
    pub probe_in_flight: bool,
}

/// Stateful gate in front of an unreliable dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker reading the system clock.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let window = SlidingWindow::new(config.sampling_duration());
        Self {
            name: "default".to_string(),
            config,
            clock: Arc::new(SystemClock),
            events: Arc::new(NoOpEventSink),
            state: Mutex::new(BreakerState {
                phase: CircuitState::Closed,
                window,
                opened_at: None,
                probe_in_flight: false,
                generation: 0,
            }),
        }
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the sink receiving state-change events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the name used in logs and events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the breaker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state, applying any due Open → HalfOpen transition.
    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    /// Returns the current state and window statistics.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut changes = Vec::new();
        let mut state = self.state.lock();
        self.refresh(&mut state, self.clock.now(), &mut changes);
        let snapshot = BreakerSnapshot {
            state: state.phase,
            throughput: state.window.total(),
            handled_failures: state.window.handled,
            failure_ratio: state.window.failure_ratio(),
            probe_in_flight: state.probe_in_flight,
        };
        drop(state);
        self.report(&changes);
        snapshot
    }

    /// Asks to run one call.
    ///
    /// In `Closed` every call is admitted. In `HalfOpen` the first caller
    /// becomes the probe and everyone else is rejected as if the breaker
    /// were open.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, CircuitOpenError> {
        let now = self.clock.now();
        let mut changes = Vec::new();
        let mut state = self.state.lock();
        self.refresh(&mut state, now, &mut changes);

        let admitted = match state.phase {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen if !state.probe_in_flight => {
                state.probe_in_flight = true;
                Ok(true)
            }
            CircuitState::HalfOpen => Err(CircuitOpenError::new(CircuitState::HalfOpen, None)),
            CircuitState::Open => {
                let retry_after = state.opened_at.map(|opened_at| {
                    (opened_at + self.config.break_duration()).saturating_duration_since(now)
                });
                Err(CircuitOpenError::new(CircuitState::Open, retry_after))
            }
            CircuitState::Isolated => Err(CircuitOpenError::new(CircuitState::Isolated, None)),
        };
        let generation = state.generation;
        drop(state);
        self.report(&changes);

        admitted.map(|probe| {
            if probe {
                debug!(breaker = %self.name, "Admitting half-open probe");
            }
            BreakerPermit {
                breaker: self,
                generation,
                probe,
                settled: false,
            }
        })
    }

    /// Holds the breaker open until [`reset`](Self::reset) is called.
    pub fn isolate(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let change = (state.phase != CircuitState::Isolated)
            .then(|| Self::transition(&mut state, CircuitState::Isolated, now));
        drop(state);
        self.report(change.as_slice());
    }

    /// Forces the breaker closed with an empty window.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let change = if state.phase == CircuitState::Closed {
            state.window.clear();
            None
        } else {
            Some(Self::transition(&mut state, CircuitState::Closed, now))
        };
        drop(state);
        self.report(change.as_slice());
    }

    fn record(&self, generation: u64, probe: bool, classification: Classification) {
        let now = self.clock.now();
        let handled = classification.is_handled();
        let mut changes = Vec::new();
        let mut state = self.state.lock();
        self.refresh(&mut state, now, &mut changes);

        if state.generation != generation {
            trace!(breaker = %self.name, "Ignoring sample from a previous breaker phase");
        } else {
            match state.phase {
                CircuitState::Closed => {
                    state.window.push(Sample { at: now, handled });
                    let throughput = state.window.total();
                    if throughput >= self.config.minimum_throughput as usize
                        && state.window.failure_ratio() >= self.config.failure_ratio
                    {
                        changes.push(Self::transition(&mut state, CircuitState::Open, now));
                    }
                }
                CircuitState::HalfOpen if probe => {
                    let next = if handled {
                        CircuitState::Open
                    } else {
                        CircuitState::Closed
                    };
                    changes.push(Self::transition(&mut state, next, now));
                }
                _ => {}
            }
        }
        drop(state);
        self.report(&changes);
    }

    fn release(&self, generation: u64, probe: bool) {
        let mut state = self.state.lock();
        if probe && state.generation == generation && state.phase == CircuitState::HalfOpen {
            state.probe_in_flight = false;
            trace!(breaker = %self.name, "Probe abandoned; slot released");
        }
    }

    /// Prunes the window and applies a due Open → HalfOpen transition.
    fn refresh(&self, state: &mut BreakerState, now: Instant, changes: &mut Vec<StateChange>) {
        state.window.prune(now);
        if state.phase == CircuitState::Open {
            let due = state.opened_at.map_or(true, |opened_at| {
                now.saturating_duration_since(opened_at) >= self.config.break_duration()
            });
            if due {
                changes.push(Self::transition(state, CircuitState::HalfOpen, now));
            }
        }
    }

    fn transition(state: &mut BreakerState, to: CircuitState, now: Instant) -> StateChange {
        let change = StateChange {
            from: state.phase,
            to,
            throughput: state.window.total(),
            failure_ratio: state.window.failure_ratio(),
        };
        state.phase = to;
        state.generation += 1;
        state.probe_in_flight = false;
        match to {
            CircuitState::Open => state.opened_at = Some(now),
            CircuitState::Closed => {
                state.opened_at = None;
                state.window.clear();
            }
            CircuitState::HalfOpen | CircuitState::Isolated => {}
        }
        change
    }

    fn report(&self, changes: &[StateChange]) {
        for change in changes {
            match change.to {
                CircuitState::Open => warn!(
                    breaker = %self.name,
                    from = %change.from,
                    throughput = change.throughput,
                    failure_ratio = change.failure_ratio,
                    break_ms = self.config.break_duration_ms,
                    "Circuit opened"
                ),
                CircuitState::Closed => info!(breaker = %self.name, from = %change.from, "Circuit closed"),
                CircuitState::HalfOpen => info!(breaker = %self.name, "Circuit half-open; awaiting probe"),
                CircuitState::Isolated => warn!(breaker = %self.name, from = %change.from, "Circuit isolated"),
            }
            self.events.try_emit(
                change.to.event_type(),
                Some(events::stamped(serde_json::json!({
                    "breaker": self.name,
                    "from": change.from,
                    "to": change.to,
                    "throughput": change.throughput,
                    "failure_ratio": change.failure_ratio,
                }))),
            );
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state.lock().phase)
            .finish_non_exhaustive()
    }
}

/// Admission ticket for one call.
///
/// Recording consumes the permit and adds exactly one sample. A permit
/// dropped without recording (the call was cancelled) leaves the window
/// untouched and frees the probe slot if it held it.
#[must_use = "an unrecorded permit does not feed the breaker"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Returns true if this permit is the HalfOpen probe.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Records the classified outcome of the call.
    pub fn record(mut self, classification: Classification) {
        self.settled = true;
        self.breaker.record(self.generation, self.probe, classification);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.generation, self.probe);
        }
    }
}

impl fmt::Debug for BreakerPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("breaker", &self.breaker.name)
            .field("generation", &self.generation)
            .field("probe", &self.probe)
            .finish()
    }
}
