//! Bounded Transfer Queue
//!
//! Hands events from the producer thread to the single consumer thread.
//! When the queue is deeper than its target size the producer wakes the
//! consumer and sleeps for an adaptive interval before enqueuing. Nothing is
//! ever dropped, so the depth may transiently exceed the target.

use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default target queue depth
pub const DEFAULT_QUEUE_SIZE: usize = 256;

/// Default first throttle interval
pub const DEFAULT_THROTTLE_INITIAL: Duration = Duration::from_millis(100);

/// Default amount the interval grows or shrinks by per throttled enqueue
pub const DEFAULT_THROTTLE_STEP: Duration = Duration::from_millis(100);

/// Default lower bound of the throttle interval
pub const DEFAULT_THROTTLE_MIN: Duration = Duration::ZERO;

/// Default upper bound of the throttle interval
pub const DEFAULT_THROTTLE_MAX: Duration = Duration::from_secs(5);

/// Errors returned by the queue
#[derive(Error, Debug)]
pub enum QueueError<T> {
    /// The queue was shut down; the rejected item is handed back
    #[error("Transfer queue is closed")]
    Closed(T),
}

impl<T> QueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            QueueError::Closed(item) => item,
        }
    }
}

/// Bounds of the adaptive producer throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub initial: Duration,
    pub step: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_THROTTLE_INITIAL,
            step: DEFAULT_THROTTLE_STEP,
            min: DEFAULT_THROTTLE_MIN,
            max: DEFAULT_THROTTLE_MAX,
        }
    }
}

impl ThrottleConfig {
    /// A throttle that never sleeps
    pub fn disabled() -> Self {
        Self {
            initial: Duration::ZERO,
            step: Duration::ZERO,
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }
}

/// Throttle state, carried across enqueue calls
#[derive(Debug)]
struct Throttle {
    config: ThrottleConfig,
    delay: Duration,
    last_depth: usize,
}

impl Throttle {
    fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            delay: config.initial.clamp(config.min, config.max.max(config.min)),
            last_depth: 0,
        }
    }

    /// Interval for a throttled enqueue observing `depth`
    fn next_delay(&mut self, depth: usize) -> Duration {
        let ThrottleConfig { step, min, max, .. } = self.config;
        self.delay = if depth > self.last_depth {
            self.delay.saturating_add(step)
        } else {
            self.delay.saturating_sub(step)
        }
        .clamp(min, max.max(min));
        self.last_depth = depth;
        self.delay
    }
}

struct QueueState<T> {
    items: Vec<T>,
    done: bool,
    throttle: Throttle,
}

/// Everything captured by one drain
#[derive(Debug)]
pub struct Drained<T> {
    pub items: Vec<T>,
    /// Whether shutdown had been requested when the items were captured
    pub done: bool,
}

/// Single-producer single-consumer hand-off with backpressure
pub struct TransferQueue<T> {
    state: Mutex<QueueState<T>>,
    condvar: Condvar,
    target: usize,
}

impl<T> TransferQueue<T> {
    pub fn new(target: usize, throttle: ThrottleConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: Vec::new(),
                done: false,
                throttle: Throttle::new(throttle),
            }),
            condvar: Condvar::new(),
            target,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item, throttling the caller while the queue is over target
    pub fn enqueue(&self, item: T) -> Result<(), QueueError<T>> {
        let mut state = self.lock();
        if state.done {
            return Err(QueueError::Closed(item));
        }

        let depth = state.items.len();
        if depth > self.target {
            let delay = state.throttle.next_delay(depth);
            drop(state);
            self.condvar.notify_one();
            debug!(depth, target = self.target, delay_ms = delay.as_millis() as u64, "Throttling producer");
            thread::sleep(delay);
            state = self.lock();
            if state.done {
                return Err(QueueError::Closed(item));
            }
        }

        state.items.push(item);
        drop(state);
        self.condvar.notify_one();
        Ok(())
    }

    /// Block until items are queued or shutdown is requested, then take
    /// everything queued
    ///
    /// Returns an empty batch only when shutdown was requested.
    pub fn drain(&self) -> Drained<T> {
        let mut state = self.lock();
        while state.items.is_empty() && !state.done {
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Drained {
            items: mem::take(&mut state.items),
            done: state.done,
        }
    }

    /// Request shutdown and wake the consumer
    pub fn close(&self) {
        self.lock().done = true;
        self.condvar.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().done
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Depth above which producers are throttled
    pub fn target(&self) -> usize {
        self.target
    }

    /// Interval the most recent throttled enqueue slept for
    pub fn current_delay(&self) -> Duration {
        self.lock().throttle.delay
    }
}
