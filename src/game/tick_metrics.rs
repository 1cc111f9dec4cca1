//! Tick metrics.
//!
//! Narrow metric interfaces plus the tick middleware that feeds them. The
//! interval histogram records the *configured* interval; the duration
//! histogram records how long subscribers actually took.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::game::ticker::{tick_middleware, TickMiddleware};

/// A distribution of observed values.
pub trait Histogram: Send + Sync {
    /// Record one value.
    fn observe(&self, value: f64);
}

/// A value that can go up and down.
pub trait Gauge: Send + Sync {
    /// Replace the current value.
    fn set(&self, value: f64);
}

/// Snapshot of a [`SummaryHistogram`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Summary {
    /// Observations.
    pub count: u64,
    /// Sum of observations.
    pub sum: f64,
    /// Largest observation.
    pub max: f64,
}

impl Summary {
    /// Mean of the observations, zero when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// In-process histogram keeping count, sum and max.
#[derive(Debug, Default)]
pub struct SummaryHistogram {
    summary: Mutex<Summary>,
}

impl SummaryHistogram {
    /// Current summary.
    pub fn summary(&self) -> Summary {
        *self.summary.lock()
    }

    /// Return the summary and start over.
    pub fn take(&self) -> Summary {
        std::mem::take(&mut *self.summary.lock())
    }
}

impl Histogram for SummaryHistogram {
    fn observe(&self, value: f64) {
        let mut summary = self.summary.lock();
        summary.count += 1;
        summary.sum += value;
        if value > summary.max {
            summary.max = value;
        }
    }
}

/// In-process gauge.
#[derive(Debug, Default)]
pub struct AtomicGauge {
    bits: AtomicU64,
}

impl AtomicGauge {
    /// Current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Gauge for AtomicGauge {
    fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Histograms fed by [`tick_metrics_middleware`], in milliseconds.
#[derive(Clone)]
pub struct TickMetrics {
    /// `server_tick_interval`.
    pub interval: Arc<dyn Histogram>,
    /// `server_tick_duration`.
    pub duration: Arc<dyn Histogram>,
}

/// Middleware that records tick interval and processing time.
pub fn tick_metrics_middleware(metrics: TickMetrics, configured_interval: Duration) -> TickMiddleware {
    let interval_ms = configured_interval.as_secs_f64() * 1000.0;
    tick_middleware(move |event, next| {
        metrics.interval.observe(interval_ms);
        let started = Instant::now();
        next(event);
        metrics.duration.observe(started.elapsed().as_secs_f64() * 1000.0);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ticker::TickEvent;

    #[derive(Default)]
    struct Recording(Mutex<Vec<f64>>);

    impl Histogram for Recording {
        fn observe(&self, value: f64) {
            self.0.lock().push(value);
        }
    }

    #[test]
    fn test_observes_configured_interval_not_delta() {
        let interval = Arc::new(Recording::default());
        let duration = Arc::new(Recording::default());
        let mw = tick_metrics_middleware(
            TickMetrics {
                interval: interval.clone(),
                duration: duration.clone(),
            },
            Duration::from_millis(50),
        );

        let called = Mutex::new(false);
        mw(
            &TickEvent {
                delta: Duration::from_millis(64),
                total_time_elapsed: Duration::from_secs(1),
            },
            &|_| *called.lock() = true,
        );

        assert!(*called.lock());
        assert_eq!(*interval.0.lock(), vec![50.0]);
        assert_eq!(duration.0.lock().len(), 1);
    }

    #[test]
    fn test_measures_processing_duration() {
        let duration = Arc::new(Recording::default());
        let mw = tick_metrics_middleware(
            TickMetrics {
                interval: Arc::new(SummaryHistogram::default()),
                duration: duration.clone(),
            },
            Duration::from_millis(50),
        );

        mw(&TickEvent::default(), &|_| std::thread::sleep(Duration::from_millis(10)));

        let measured = duration.0.lock()[0];
        assert!(measured >= 10.0, "measured {measured}");
    }

    #[test]
    fn test_summary_histogram_and_gauge() {
        let histogram = SummaryHistogram::default();
        histogram.observe(2.0);
        histogram.observe(4.0);
        let summary = histogram.take();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.max, 4.0);
        assert_eq!(summary.mean(), 3.0);
        assert_eq!(histogram.summary(), Summary::default());

        let gauge = AtomicGauge::default();
        gauge.set(12.0);
        assert_eq!(gauge.get(), 12.0);
    }
}
