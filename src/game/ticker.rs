//! Tick Scheduler
//!
//! Fixed-interval simulation clock. Each tick:
//!
//! ```text
//! interval ─▶ TickEvent { delta, total } ─▶ middleware(event, next) ─▶ subscribers (in order)
//! ```
//!
//! The first tick after `start` has a zero delta; `total_time_elapsed` is
//! the running sum of deltas since that start.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// One tick of the simulation clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickEvent {
    /// Time since the previous tick (zero on the first).
    pub delta: Duration,
    /// Sum of all deltas since the ticker started.
    pub total_time_elapsed: Duration,
}

/// A tick subscriber.
pub type TickHandler = Arc<dyn Fn(&TickEvent) + Send + Sync>;

/// Wraps the delivery of a tick; calling `next` notifies the subscribers.
pub type TickMiddleware = Arc<dyn Fn(&TickEvent, &dyn Fn(&TickEvent)) + Send + Sync>;

/// Box a closure into a [`TickHandler`].
pub fn tick_handler<F>(f: F) -> TickHandler
where
    F: Fn(&TickEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure into a [`TickMiddleware`].
pub fn tick_middleware<F>(f: F) -> TickMiddleware
where
    F: Fn(&TickEvent, &dyn Fn(&TickEvent)) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Fold an ordered list of middleware into one. The first entry is the
/// outermost.
pub fn compose_tick_middleware(chain: Vec<TickMiddleware>) -> TickMiddleware {
    Arc::new(move |event, next| run_chain(&chain, event, next))
}

fn run_chain(chain: &[TickMiddleware], event: &TickEvent, next: &dyn Fn(&TickEvent)) {
    match chain.split_first() {
        Some((outer, rest)) => outer(event, &|event| run_chain(rest, event, next)),
        None => next(event),
    }
}

fn same_handler(a: &TickHandler, b: &TickHandler) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Ticker construction options.
#[derive(Default)]
pub struct TickerOptions {
    /// Runs around every scheduled tick.
    pub middleware: Option<TickMiddleware>,
}

struct Subscribers {
    handlers: Mutex<Vec<TickHandler>>,
}

impl Subscribers {
    fn emit(&self, event: &TickEvent) {
        let snapshot = self.handlers.lock().clone();
        for handler in &snapshot {
            handler(event);
        }
    }

    fn remove(&self, handler: &TickHandler) {
        self.handlers.lock().retain(|h| !same_handler(h, handler));
    }
}

/// Handle returned by [`Ticker::subscribe`].
pub struct Subscription {
    subscribers: Weak<Subscribers>,
    handler: TickHandler,
}

impl Subscription {
    /// Stop receiving ticks. Safe to call repeatedly, and from inside a
    /// tick; the current tick still reaches every subscriber it started
    /// with.
    pub fn unsubscribe(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(&self.handler);
        }
    }
}

/// Fixed-interval tick scheduler.
pub struct Ticker {
    middleware: Option<TickMiddleware>,
    subscribers: Arc<Subscribers>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Ticker {
    /// Create a stopped ticker.
    pub fn new(options: TickerOptions) -> Self {
        Self {
            middleware: options.middleware,
            subscribers: Arc::new(Subscribers {
                handlers: Mutex::new(Vec::new()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Add a subscriber; adding the same handler twice has no effect.
    pub fn subscribe(&self, handler: TickHandler) -> Subscription {
        {
            let mut handlers = self.subscribers.handlers.lock();
            if !handlers.iter().any(|h| same_handler(h, &handler)) {
                handlers.push(handler.clone());
            }
        }
        Subscription {
            subscribers: Arc::downgrade(&self.subscribers),
            handler,
        }
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.handlers.lock().len()
    }

    /// Notify every subscriber, bypassing middleware.
    pub fn emit(&self, event: &TickEvent) {
        self.subscribers.emit(event);
    }

    /// Run one tick through the middleware and subscribers, exactly as the
    /// scheduled loop would.
    pub fn tick(&self, event: &TickEvent) {
        deliver(self.middleware.as_ref(), &self.subscribers, event);
    }

    /// Start ticking every `interval`, stopping any previous loop first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
            debug!("restarting ticker");
        }

        let middleware = self.middleware.clone();
        let subscribers = self.subscribers.clone();
        info!(interval_ms = interval.as_millis() as u64, "ticker started");

        *task = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut last_tick: Option<Instant> = None;
            let mut total_time_elapsed = Duration::ZERO;
            loop {
                ticks.tick().await;
                let now = Instant::now();
                let delta = last_tick.map_or(Duration::ZERO, |last| now.duration_since(last));
                last_tick = Some(now);
                total_time_elapsed += delta;

                deliver(
                    middleware.as_ref(),
                    &subscribers,
                    &TickEvent {
                        delta,
                        total_time_elapsed,
                    },
                );
            }
        }));
    }

    /// Stop ticking. A tick already in progress completes.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("ticker stopped");
        }
    }

    /// Whether the tick loop is alive.
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

fn deliver(middleware: Option<&TickMiddleware>, subscribers: &Subscribers, event: &TickEvent) {
    match middleware {
        Some(mw) => mw(event, &|event| subscribers.emit(event)),
        None => subscribers.emit(event),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (TickHandler, Arc<Mutex<Vec<TickEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (tick_handler(move |event| sink.lock().push(*event)), events)
    }

    fn event(ms: u64) -> TickEvent {
        TickEvent {
            delta: Duration::from_millis(ms),
            total_time_elapsed: Duration::from_millis(ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_delta_is_zero_then_interval() {
        let ticker = Ticker::new(TickerOptions::default());
        let (handler, events) = recorder();
        ticker.subscribe(handler);

        ticker.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(350)).await;
        ticker.stop();

        let events = events.lock().clone();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].delta, Duration::ZERO);
        assert_eq!(events[1].delta, Duration::from_millis(100));
        assert_eq!(events[2].delta, Duration::from_millis(100));
        assert_eq!(events[2].total_time_elapsed, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_loop() {
        let ticker = Ticker::new(TickerOptions::default());
        let (handler, events) = recorder();
        ticker.subscribe(handler);

        ticker.start(Duration::from_millis(100));
        ticker.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(ticker.is_running());
        ticker.stop();
        ticker.stop();
        assert!(!ticker.is_running());

        assert_eq!(events.lock().len(), 2);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(events.lock().len(), 2);
    }

    #[test]
    fn test_subscribers_run_in_order() {
        let ticker = Ticker::new(TickerOptions::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            ticker.subscribe(tick_handler(move |_| order.lock().push(i)));
        }
        ticker.emit(&event(16));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_subscribe_is_ignored() {
        let ticker = Ticker::new(TickerOptions::default());
        let (handler, events) = recorder();
        ticker.subscribe(handler.clone());
        let subscription = ticker.subscribe(handler);
        assert_eq!(ticker.subscriber_count(), 1);

        ticker.emit(&event(1));
        assert_eq!(events.lock().len(), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(ticker.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_during_emission_applies_next_tick() {
        let ticker = Ticker::new(TickerOptions::default());
        let (second, events) = recorder();
        let pending: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = pending.clone();
        ticker.subscribe(tick_handler(move |_| {
            if let Some(subscription) = slot.lock().take() {
                subscription.unsubscribe();
            }
        }));
        *pending.lock() = Some(ticker.subscribe(second));

        ticker.emit(&event(1));
        assert_eq!(events.lock().len(), 1);
        ticker.emit(&event(2));
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_middleware_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let layer = |name: &'static str| {
            let log = log.clone();
            tick_middleware(move |event, next| {
                log.lock().push(format!("{name} before"));
                next(event);
                log.lock().push(format!("{name} after"));
            })
        };
        let ticker = Ticker::new(TickerOptions {
            middleware: Some(compose_tick_middleware(vec![layer("outer"), layer("inner")])),
        });
        let sink = log.clone();
        ticker.subscribe(tick_handler(move |_| sink.lock().push("tick".to_string())));

        ticker.tick(&event(1));
        assert_eq!(
            *log.lock(),
            vec!["outer before", "inner before", "tick", "inner after", "outer after"]
        );
    }

    #[test]
    fn test_middleware_can_swallow_tick() {
        let ticker = Ticker::new(TickerOptions {
            middleware: Some(tick_middleware(|_, _| {})),
        });
        let (handler, events) = recorder();
        ticker.subscribe(handler);
        ticker.tick(&event(1));
        assert!(events.lock().is_empty());
    }
}
