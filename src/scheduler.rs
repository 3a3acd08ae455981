//! Fixed-period control loop driver.
//!
//! One dedicated thread owns the [`ControlService`] and its ports and runs
//! a tick per period.  Deadlines are absolute: each iteration's deadline is
//! the previous deadline plus the period, never "now + period", so the time
//! a tick takes does not accumulate as drift.
//!
//! ```text
//!   deadline₀ ──tick──▶ sleep ──▶ deadline₁ ──tick──▶ sleep ──▶ deadline₂ …
//!                 │                                   │
//!                 └── stop flag polled here ──────────┘
//! ```
//!
//! If a tick runs more than a full period late the loop records an overrun
//! and re-anchors to "now" rather than firing a burst of catch-up ticks.
//! Cancellation is cooperative through a shared `AtomicBool`, checked only
//! at tick boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::app::events::SessionSummary;
use crate::app::ports::{EventSink, LoopPorts, PumpPort, TelemetrySource};
use crate::app::service::ControlService;
use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════
//  Deadline ticker
// ═══════════════════════════════════════════════════════════════

/// Absolute-deadline period timer.
#[derive(Debug, Clone)]
pub struct DeadlineTicker {
    period: Duration,
    next_deadline: Instant,
    overruns: u64,
}

impl DeadlineTicker {
    pub fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next_deadline: start,
            overruns: 0,
        }
    }

    /// Advance to the next deadline and return how long to sleep from
    /// `now`, or `None` when the deadline has already passed.
    pub fn advance(&mut self, now: Instant) -> Option<Duration> {
        self.next_deadline += self.period;
        if now < self.next_deadline {
            return Some(self.next_deadline - now);
        }
        let late = now - self.next_deadline;
        if late > self.period {
            self.overruns += 1;
            warn!(
                "Control loop overrun: {:.1} ms behind schedule, re-anchoring",
                late.as_secs_f64() * 1000.0
            );
            self.next_deadline = now;
        }
        None
    }

    /// Block until the next deadline.
    pub fn wait(&mut self) {
        if let Some(delay) = self.advance(Instant::now()) {
            thread::sleep(delay);
        }
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

// ═══════════════════════════════════════════════════════════════
//  Control loop
// ═══════════════════════════════════════════════════════════════

/// Run the session on the calling thread until `stop` is set or
/// `max_ticks` ticks have run.
pub fn run<S, P, E>(
    mut service: ControlService,
    mut ports: LoopPorts<S, P, E>,
    stop: &AtomicBool,
    max_ticks: Option<u64>,
) -> SessionSummary
where
    S: TelemetrySource,
    P: PumpPort,
    E: EventSink,
{
    let period = Duration::from_millis(service.period_ms());
    let mut ticker = DeadlineTicker::new(period, Instant::now());
    service.start(&mut ports.sink);

    while !stop.load(Ordering::Acquire) {
        if max_ticks.is_some_and(|max| service.tick_count() >= max) {
            break;
        }
        service.tick(&mut ports.source, &mut ports.pump, &mut ports.sink);
        ticker.wait();
    }

    let summary = service.stop(&mut ports.pump, &mut ports.sink, ticker.overruns());
    info!(
        "Control loop exited: {} ticks, {:.2} ml delivered, {} overruns",
        summary.ticks, summary.cumulative_volume_ml, summary.overruns
    );
    summary
}

/// Handle to the control thread.
pub struct ControlLoop {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<SessionSummary>,
}

impl ControlLoop {
    /// Move the service and its ports onto a dedicated thread.
    pub fn spawn<S, P, E>(
        service: ControlService,
        ports: LoopPorts<S, P, E>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self>
    where
        S: TelemetrySource + Send + 'static,
        P: PumpPort + Send + 'static,
        E: EventSink + Send + 'static,
    {
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("ivctl-control".into())
            .spawn(move || run(service, ports, &flag, None))
            .map_err(|e| Error::Thread(format!("spawn control loop: {e}")))?;
        Ok(Self { stop, handle })
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Request a stop and wait for the thread.  Sinks are flushed and
    /// dropped on the control thread, so all buffered writes are on disk
    /// once this returns.
    pub fn shutdown(self) -> Result<SessionSummary> {
        self.stop.store(true, Ordering::Release);
        self.join()
    }

    pub fn join(self) -> Result<SessionSummary> {
        self.handle
            .join()
            .map_err(|_| Error::Thread("control loop panicked".into()))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
