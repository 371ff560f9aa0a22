//! Consumer Loop
//!
//! Drains the transfer queue and hands every captured item, in order, to a
//! cycle handler, then closes the cycle. Exits once a drain comes back empty
//! after shutdown was requested.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::queue::{Drained, TransferQueue};

/// Where the loop is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Blocked on the queue
    Waiting,
    /// Processing a captured batch
    Draining,
    /// Shutdown observed with nothing left to drain
    Shutdown,
}

/// Work performed for each drained item and at the end of each cycle
pub trait CycleHandler<T> {
    fn handle(&mut self, item: T);

    /// Called once after every item of a cycle was handled
    fn end_cycle(&mut self);
}

/// Single consumer of a transfer queue
pub struct ConsumerLoop<T, H> {
    queue: Arc<TransferQueue<T>>,
    handler: H,
    state: ConsumerState,
}

impl<T, H: CycleHandler<T>> ConsumerLoop<T, H> {
    pub fn new(queue: Arc<TransferQueue<T>>, handler: H) -> Self {
        Self {
            queue,
            handler,
            state: ConsumerState::Waiting,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run one drain cycle, blocking until there is work or shutdown
    ///
    /// # Returns
    /// `Waiting` after a processed batch, `Shutdown` once the loop is finished
    pub fn step(&mut self) -> ConsumerState {
        if self.state == ConsumerState::Shutdown {
            return self.state;
        }

        let Drained { items, done } = self.queue.drain();
        if items.is_empty() && done {
            info!("Consumer loop finished");
            self.state = ConsumerState::Shutdown;
            return self.state;
        }

        self.state = ConsumerState::Draining;
        let count = items.len();
        let target = self.queue.target();
        if count * 4 > target * 3 {
            warn!(count, target, "Queue backlog above 75% of target size");
        } else if done {
            info!(count, "Draining queue");
        }

        for item in items {
            let handler = &mut self.handler;
            contain_panic("processing event", || handler.handle(item));
        }
        let handler = &mut self.handler;
        contain_panic("closing drain cycle", || handler.end_cycle());

        self.state = ConsumerState::Waiting;
        self.state
    }

    /// Drive cycles until shutdown, then hand the handler back
    pub fn run(mut self) -> H {
        while self.step() != ConsumerState::Shutdown {}
        self.handler
    }
}

/// Run `f`, logging and suppressing a panic
///
/// # Returns
/// `Some` with the result, or `None` if `f` panicked
pub fn contain_panic<R>(context: &str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(payload) => {
            error!("Panic while {}: {}", context, panic_message(payload.as_ref()));
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
