//! Engine counters, health reporting and the structured event stream.

mod events;

pub use events::{Component, EngineEvent, EventKind, EventSink};

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe counters for the execution engine.
#[derive(Debug)]
pub struct EngineMetrics {
    // Counters
    ticks_received: AtomicU64,
    signals_generated: AtomicU64,
    orders_approved: AtomicU64,
    orders_rejected: AtomicU64,
    reservations_committed: AtomicU64,
    reservations_released: AtomicU64,
    positions_closed: AtomicU64,
    broker_errors: AtomicU64,

    // Timestamps
    inner: RwLock<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    start_time: Instant,
    last_tick_time: Option<Instant>,
    last_rejection_time: Option<Instant>,
    last_broker_error_time: Option<Instant>,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            ticks_received: AtomicU64::new(0),
            signals_generated: AtomicU64::new(0),
            orders_approved: AtomicU64::new(0),
            orders_rejected: AtomicU64::new(0),
            reservations_committed: AtomicU64::new(0),
            reservations_released: AtomicU64::new(0),
            positions_closed: AtomicU64::new(0),
            broker_errors: AtomicU64::new(0),
            inner: RwLock::new(MetricsInner {
                start_time: Instant::now(),
                last_tick_time: None,
                last_rejection_time: None,
                last_broker_error_time: None,
            }),
        }
    }

    // --- Increment methods ---

    pub fn inc_ticks_received(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_tick_time = Some(Instant::now());
    }

    pub fn inc_signals_generated(&self) {
        self.signals_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_approved(&self) {
        self.orders_approved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_rejected(&self) {
        self.orders_rejected.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_rejection_time = Some(Instant::now());
    }

    pub fn inc_reservations_committed(&self) {
        self.reservations_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reservations_released(&self) {
        self.reservations_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_positions_closed(&self) {
        self.positions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_broker_errors(&self) {
        self.broker_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_broker_error_time = Some(Instant::now());
    }

    // --- Getter methods ---

    pub fn ticks_received(&self) -> u64 {
        self.ticks_received.load(Ordering::Relaxed)
    }

    pub fn signals_generated(&self) -> u64 {
        self.signals_generated.load(Ordering::Relaxed)
    }

    pub fn orders_approved(&self) -> u64 {
        self.orders_approved.load(Ordering::Relaxed)
    }

    pub fn orders_rejected(&self) -> u64 {
        self.orders_rejected.load(Ordering::Relaxed)
    }

    pub fn reservations_committed(&self) -> u64 {
        self.reservations_committed.load(Ordering::Relaxed)
    }

    pub fn reservations_released(&self) -> u64 {
        self.reservations_released.load(Ordering::Relaxed)
    }

    pub fn positions_closed(&self) -> u64 {
        self.positions_closed.load(Ordering::Relaxed)
    }

    pub fn broker_errors(&self) -> u64 {
        self.broker_errors.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.inner.read().start_time.elapsed().as_secs_f64()
    }

    pub fn secs_since_last_tick(&self) -> Option<f64> {
        self.inner
            .read()
            .last_tick_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_rejection(&self) -> Option<f64> {
        self.inner
            .read()
            .last_rejection_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_broker_error(&self) -> Option<f64> {
        self.inner
            .read()
            .last_broker_error_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    /// Calculate ticks per second since start.
    pub fn ticks_per_second(&self) -> f64 {
        let uptime = self.uptime_secs();
        if uptime > 0.0 {
            self.ticks_received() as f64 / uptime
        } else {
            0.0
        }
    }

    /// Generate a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks_received: self.ticks_received(),
            signals_generated: self.signals_generated(),
            orders_approved: self.orders_approved(),
            orders_rejected: self.orders_rejected(),
            reservations_committed: self.reservations_committed(),
            reservations_released: self.reservations_released(),
            positions_closed: self.positions_closed(),
            broker_errors: self.broker_errors(),
            uptime_secs: self.uptime_secs(),
            ticks_per_second: self.ticks_per_second(),
            secs_since_last_tick: self.secs_since_last_tick(),
            secs_since_last_broker_error: self.secs_since_last_broker_error(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub ticks_received: u64,
    pub signals_generated: u64,
    pub orders_approved: u64,
    pub orders_rejected: u64,
    pub reservations_committed: u64,
    pub reservations_released: u64,
    pub positions_closed: u64,
    pub broker_errors: u64,
    pub uptime_secs: f64,
    pub ticks_per_second: f64,
    pub secs_since_last_tick: Option<f64>,
    pub secs_since_last_broker_error: Option<f64>,
}

/// Health status of the engine's market feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Ticks are flowing.
    Healthy,
    /// Feed is stale or the broker recently failed.
    Degraded,
    /// No ticks for an extended period.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

impl MetricsSnapshot {
    /// Threshold in seconds for considering the feed stale (degraded).
    const STALE_THRESHOLD_SECS: f64 = 30.0;
    /// Threshold in seconds for considering the feed dead.
    const UNHEALTHY_THRESHOLD_SECS: f64 = 60.0;
    /// A broker error this recent degrades health.
    const BROKER_ERROR_WINDOW_SECS: f64 = 60.0;

    /// Determine the health status based on metrics.
    pub fn health_status(&self) -> HealthStatus {
        let feed = match self.secs_since_last_tick {
            Some(secs) if secs > Self::UNHEALTHY_THRESHOLD_SECS => HealthStatus::Unhealthy,
            Some(secs) if secs > Self::STALE_THRESHOLD_SECS => HealthStatus::Degraded,
            Some(_) => HealthStatus::Healthy,
            // No ticks yet - startup grace period
            None if self.uptime_secs < Self::STALE_THRESHOLD_SECS => HealthStatus::Healthy,
            None if self.uptime_secs < Self::UNHEALTHY_THRESHOLD_SECS => HealthStatus::Degraded,
            None => HealthStatus::Unhealthy,
        };

        let recent_broker_error = self
            .secs_since_last_broker_error
            .map(|secs| secs <= Self::BROKER_ERROR_WINDOW_SECS)
            .unwrap_or(false);

        if feed == HealthStatus::Healthy && recent_broker_error {
            HealthStatus::Degraded
        } else {
            feed
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Engine Metrics ===")?;
        writeln!(f, "Uptime:              {:.1}s", self.uptime_secs)?;
        writeln!(f, "Ticks received:      {}", self.ticks_received)?;
        writeln!(f, "Ticks/sec:           {:.2}", self.ticks_per_second)?;
        writeln!(f, "Signals:             {}", self.signals_generated)?;
        writeln!(f, "Orders approved:     {}", self.orders_approved)?;
        writeln!(f, "Orders rejected:     {}", self.orders_rejected)?;
        writeln!(f, "Reservations filled: {}", self.reservations_committed)?;
        writeln!(f, "Reservations freed:  {}", self.reservations_released)?;
        writeln!(f, "Positions closed:    {}", self.positions_closed)?;
        writeln!(f, "Broker errors:       {}", self.broker_errors)?;
        if let Some(secs) = self.secs_since_last_tick {
            writeln!(f, "Since last tick:     {:.1}s", secs)?;
        }
        Ok(())
    }
}

/// Shared handle to metrics.
pub type SharedMetrics = Arc<EngineMetrics>;

pub fn create_metrics() -> SharedMetrics {
    Arc::new(EngineMetrics::new())
}
