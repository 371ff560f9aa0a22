//! Mirror Lifecycle
//!
//! Owns the pipeline from initialization to shutdown. Until `start()` is
//! called, events are processed inline on the caller's thread. Afterwards
//! they are queued for the dedicated consumer thread, which is drained and
//! joined on shutdown.

use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::chain::{ChainEvent, TransactionEvent, SYSTEM_ACCOUNT};
use crate::config::{ConfigError, MirrorConfig};
use crate::consumer::{contain_panic, ConsumerLoop};
use crate::filter::ContractFilter;
use crate::processor::{Processor, ProcessorStats};
use crate::queue::{ThrottleConfig, TransferQueue};
use crate::source::EventSource;
use crate::store::{current_timestamp_millis, AccountStore, ActionSink, StoreError};

/// Name of the consumer thread
pub const CONSUMER_THREAD_NAME: &str = "mirror-consumer";

/// Errors that can occur during the mirror lifecycle
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to spawn consumer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Mirror is already running")]
    AlreadyRunning,

    #[error("Mirror is stopped")]
    Stopped,
}

struct Worker {
    queue: Arc<TransferQueue<ChainEvent>>,
    handle: JoinHandle<ProcessorStats>,
}

enum Mode<S, K> {
    /// Events are processed inline
    Startup(Processor<S, K>),
    /// Events are queued for the consumer thread
    Running(Worker),
    Stopped,
}

/// The running pipeline
pub struct Mirror<S, K>
where
    S: AccountStore + Send + 'static,
    K: ActionSink + Send + 'static,
{
    mode: Mode<S, K>,
    queue_size: usize,
    throttle: ThrottleConfig,
}

impl<S, K> Mirror<S, K>
where
    S: AccountStore + Send + 'static,
    K: ActionSink + Send + 'static,
{
    /// Prepare the stores and build the pipeline
    ///
    /// Wipes both collections when configured to, and seeds the system
    /// account when the account collection is empty.
    pub fn initialize(config: &MirrorConfig, mut store: S, mut sink: K) -> Result<Self, MirrorError> {
        config.validate()?;
        let contracts = config.contract_names()?;

        if config.wipe_on_startup {
            info!("Wiping account and action collections");
            AccountStore::wipe(&mut store)?;
            ActionSink::wipe(&mut sink)?;
        }

        if store.count()? == 0 {
            store.create(SYSTEM_ACCOUNT, current_timestamp_millis())?;
            info!("Seeded system account {}", SYSTEM_ACCOUNT);
        }

        for contract in &contracts {
            info!("Filtering actions of contract {}", contract);
        }
        if contracts.is_empty() {
            warn!("No filter contracts configured, no actions will be persisted");
        }
        if config.start_block > 0 {
            info!(start_block = config.start_block, "Waiting for start block");
        }

        let filter = ContractFilter::new(contracts);
        Ok(Self {
            mode: Mode::Startup(Processor::new(store, sink, filter, config.start_block)),
            queue_size: config.queue_size,
            throttle: config.throttle,
        })
    }

    /// Spawn the consumer thread; events are queued from here on
    pub fn start(&mut self) -> Result<(), MirrorError> {
        let processor = match mem::replace(&mut self.mode, Mode::Stopped) {
            Mode::Startup(processor) => processor,
            Mode::Running(worker) => {
                self.mode = Mode::Running(worker);
                return Err(MirrorError::AlreadyRunning);
            }
            Mode::Stopped => return Err(MirrorError::Stopped),
        };

        let queue = Arc::new(TransferQueue::new(self.queue_size, self.throttle));
        let consumer = ConsumerLoop::new(Arc::clone(&queue), processor);
        let handle = thread::Builder::new()
            .name(CONSUMER_THREAD_NAME.to_string())
            .spawn(move || consumer.run().stats())?;

        info!(queue_size = self.queue_size, "Consumer thread started");
        self.mode = Mode::Running(Worker { queue, handle });
        Ok(())
    }

    /// Entry point for an accepted transaction
    pub fn accepted_transaction(&mut self, trx: Arc<TransactionEvent>) {
        self.dispatch(ChainEvent::Transaction(trx));
    }

    /// Entry point for an accepted block
    pub fn accepted_block(&mut self, block_num: u32) {
        self.dispatch(ChainEvent::Block { block_num });
    }

    /// Process inline during startup, queue afterwards
    ///
    /// Failures and panics are logged and never reach the caller.
    pub fn dispatch(&mut self, event: ChainEvent) {
        match &mut self.mode {
            Mode::Startup(processor) => {
                contain_panic("processing event during startup", || {
                    processor.process_event(event);
                    processor.flush();
                });
            }
            Mode::Running(worker) => {
                if let Err(e) = worker.queue.enqueue(event) {
                    let event = e.into_inner();
                    warn!("Transfer queue is closed, dropping {}", describe(&event));
                }
            }
            Mode::Stopped => warn!("Mirror is stopped, ignoring {}", describe(&event)),
        }
    }

    /// Feed every event from `source`
    ///
    /// # Returns
    /// The number of events dispatched
    pub fn pump<E>(&mut self, source: &mut E) -> u64
    where
        E: EventSource + ?Sized,
    {
        let mut count = 0;
        while let Some(event) = source.next_event() {
            self.dispatch(event);
            count += 1;
        }
        count
    }

    /// Drain the queue and join the consumer thread
    ///
    /// # Returns
    /// Final processor totals, or `None` if already stopped or the consumer
    /// could not be joined
    pub fn shutdown(&mut self) -> Option<ProcessorStats> {
        match mem::replace(&mut self.mode, Mode::Stopped) {
            Mode::Running(worker) => {
                info!(queued = worker.queue.len(), "Shutting down, draining queue");
                worker.queue.close();
                match worker.handle.join() {
                    Ok(stats) => {
                        info!(?stats, "Consumer thread stopped");
                        Some(stats)
                    }
                    Err(_) => {
                        error!("Consumer thread could not be joined");
                        None
                    }
                }
            }
            Mode::Startup(mut processor) => {
                processor.flush();
                Some(processor.stats())
            }
            Mode::Stopped => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.mode, Mode::Running(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.mode, Mode::Stopped)
    }

    /// Events waiting for the consumer
    pub fn queue_depth(&self) -> usize {
        match &self.mode {
            Mode::Running(worker) => worker.queue.len(),
            _ => 0,
        }
    }

    /// Processor totals while still in startup
    pub fn startup_stats(&self) -> Option<ProcessorStats> {
        match &self.mode {
            Mode::Startup(processor) => Some(processor.stats()),
            _ => None,
        }
    }
}

impl<S, K> Drop for Mirror<S, K>
where
    S: AccountStore + Send + 'static,
    K: ActionSink + Send + 'static,
{
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown();
        }
    }
}

/// Short description of an event for logs
fn describe(event: &ChainEvent) -> String {
    match event {
        ChainEvent::Transaction(trx) => format!("transaction {}", trx.id),
        ChainEvent::Block { block_num } => format!("block {block_num}"),
    }
}
