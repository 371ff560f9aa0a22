//! Event Processor
//!
//! The pipeline context: account store, batch writer, contract filter,
//! schema cache and start-block gate. Processes one chain event at a time
//! and flushes the collected documents at the end of each drain cycle.

use tracing::{error, info, warn};

use crate::chain::{ChainEvent, TransactionEvent};
use crate::consumer::{contain_panic, CycleHandler};
use crate::decoder::decode_action;
use crate::filter::ContractFilter;
use crate::schema::SchemaCache;
use crate::store::{current_timestamp_millis, AccountStore, ActionSink};
use crate::tracker::{track_action, TrackOutcome};
use crate::writer::{ActionDocument, BatchWriter, WriteOutcome};

/// Whether documents are produced yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartBlockGate {
    start_block: u32,
    reached: bool,
}

impl StartBlockGate {
    /// A start block of 0 is reached immediately
    pub fn new(start_block: u32) -> Self {
        Self {
            start_block,
            reached: start_block == 0,
        }
    }

    pub fn is_reached(&self) -> bool {
        self.reached
    }

    pub fn start_block(&self) -> u32 {
        self.start_block
    }

    /// Observe an accepted block
    ///
    /// # Returns
    /// `true` if this block opened the gate
    pub fn observe_block(&mut self, block_num: u32) -> bool {
        if !self.reached && block_num >= self.start_block {
            self.reached = true;
            return true;
        }
        false
    }
}

/// Running totals kept by the processor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub transactions: u64,
    pub blocks: u64,
    pub documents_written: u64,
    pub documents_failed: u64,
    pub account_errors: u64,
}

/// Pipeline context processing chain events
pub struct Processor<S, K> {
    store: S,
    writer: BatchWriter<K>,
    filter: ContractFilter,
    schemas: SchemaCache,
    gate: StartBlockGate,
    stats: ProcessorStats,
}

impl<S: AccountStore, K: ActionSink> Processor<S, K> {
    pub fn new(store: S, sink: K, filter: ContractFilter, start_block: u32) -> Self {
        Self {
            store,
            writer: BatchWriter::new(sink),
            filter,
            schemas: SchemaCache::new(),
            gate: StartBlockGate::new(start_block),
            stats: ProcessorStats::default(),
        }
    }

    pub fn process_event(&mut self, event: ChainEvent) {
        match event {
            ChainEvent::Transaction(trx) => {
                let mark = self.writer.len();
                if contain_panic("processing transaction", || self.process_transaction(&trx)).is_none() {
                    let discarded = self.writer.truncate(mark);
                    warn!(trx_id = %trx.id, discarded, "Dropped documents of failed transaction");
                }
            }
            ChainEvent::Block { block_num } => self.process_block(block_num),
        }
    }

    pub fn process_block(&mut self, block_num: u32) {
        self.stats.blocks += 1;
        if self.gate.observe_block(block_num) {
            info!(block_num, "Start block reached, persisting filtered actions");
        }
    }

    /// Track every action and collect documents for filtered ones
    ///
    /// Account effects apply before any document is built, so a contract
    /// created or updated earlier in the same transaction decodes with its
    /// new definition.
    pub fn process_transaction(&mut self, trx: &TransactionEvent) {
        self.stats.transactions += 1;
        let now = current_timestamp_millis();

        for (action_num, action) in trx.actions.iter().enumerate() {
            match track_action(&mut self.store, &mut self.schemas, action, now) {
                Ok(TrackOutcome::Ignored) => {}
                Ok(outcome) => info!(?outcome, trx_id = %trx.id, "Account updated"),
                Err(e) => {
                    self.stats.account_errors += 1;
                    error!(
                        account = %action.account,
                        action = %action.name,
                        "Unable to update account: {}", e
                    );
                }
            }

            if !self.gate.is_reached() || !self.filter.matches_action(action) {
                continue;
            }

            let payload = decode_action(action, &mut self.store, &mut self.schemas);
            self.writer
                .push(ActionDocument::new(action_num as u32, trx.id, action, payload));
        }
    }

    /// Write the documents collected since the last flush
    pub fn flush(&mut self) -> WriteOutcome {
        let outcome = self.writer.flush();
        match outcome {
            WriteOutcome::Written(n) => self.stats.documents_written += n as u64,
            WriteOutcome::Failed(n) => self.stats.documents_failed += n as u64,
            WriteOutcome::Skipped => {}
        }
        outcome
    }

    /// Documents waiting for the next flush
    pub fn pending(&self) -> usize {
        self.writer.len()
    }

    pub fn start_block_reached(&self) -> bool {
        self.gate.is_reached()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    pub fn filter(&self) -> &ContractFilter {
        &self.filter
    }

    pub fn schemas(&self) -> &SchemaCache {
        &self.schemas
    }
}

impl<S: AccountStore, K: ActionSink> CycleHandler<ChainEvent> for Processor<S, K> {
    fn handle(&mut self, event: ChainEvent) {
        self.process_event(event);
    }

    fn end_cycle(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Action, Name, TransactionId, SETABI, SYSTEM_ACCOUNT};
    use crate::store::{MemoryStore, MockAccountStore, MockActionSink, StoreError};
    use crate::system::SetAbi;
    use crate::writer::ActionPayload;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn trx(id: u8, actions: Vec<Action>) -> TransactionEvent {
        TransactionEvent::new(TransactionId::new([id; 32]), actions)
    }

    fn processor(start_block: u32, contracts: &[&str]) -> (Processor<MemoryStore, MemoryStore>, MemoryStore) {
        let store = MemoryStore::new();
        let filter = ContractFilter::new(contracts.iter().map(|c| name(c)));
        (
            Processor::new(store.clone(), store.clone(), filter, start_block),
            store,
        )
    }

    // ==================== StartBlockGate tests ====================

    #[test]
    fn test_gate_zero_is_reached() {
        assert!(StartBlockGate::new(0).is_reached());
    }

    #[test]
    fn test_gate_opens_at_start_block() {
        let mut gate = StartBlockGate::new(10);
        assert!(!gate.observe_block(9));
        assert!(gate.observe_block(10));
        assert!(!gate.observe_block(11));
        assert!(gate.is_reached());
    }

    #[test]
    fn test_gate_opens_past_start_block() {
        let mut gate = StartBlockGate::new(10);
        assert!(gate.observe_block(500));
    }

    // ==================== process_transaction tests ====================

    #[test]
    fn test_only_filtered_actions_produce_documents() {
        let (mut processor, store) = processor(0, &["alice"]);
        processor.process_transaction(&trx(1, vec![Action::new(name("alice"), name("hi"), vec![1])]));
        processor.process_transaction(&trx(2, vec![Action::new(name("bob"), name("hi"), vec![2])]));
        assert_eq!(processor.pending(), 1);
        assert_eq!(processor.flush(), WriteOutcome::Written(1));

        let docs = store.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].account, name("alice"));
        assert_eq!(docs[0].action_num, 0);
        assert_eq!(docs[0].trx_id, TransactionId::new([1; 32]));
    }

    #[test]
    fn test_action_num_follows_action_order() {
        let (mut processor, store) = processor(0, &["alice", "bob"]);
        let actions = vec![
            Action::new(name("alice"), name("a"), vec![]),
            Action::new(name("carol"), name("b"), vec![]),
            Action::new(name("bob"), name("c"), vec![]),
        ];
        processor.process_transaction(&trx(1, actions));
        processor.flush();
        let nums: Vec<u32> = store.documents().iter().map(|d| d.action_num).collect();
        assert_eq!(nums, vec![0, 2]);
    }

    #[test]
    fn test_no_documents_before_start_block_but_tracking_applies() {
        let (mut processor, store) = processor(100, &["eosio"]);
        let setabi = SetAbi {
            account: name("carol"),
            abi: vec![0xff],
        };
        processor.process_transaction(&trx(1, vec![Action::new(SYSTEM_ACCOUNT, SETABI, setabi.pack())]));
        assert_eq!(processor.pending(), 0);
        assert!(store.account(name("carol")).is_some());

        processor.process_block(100);
        processor.process_transaction(&trx(2, vec![Action::new(SYSTEM_ACCOUNT, SETABI, setabi.pack())]));
        assert_eq!(processor.pending(), 1);
    }

    #[test]
    fn test_undecodable_filtered_action_is_persisted_as_hex() {
        let (mut processor, store) = processor(0, &["alice"]);
        processor.process_transaction(&trx(1, vec![Action::new(name("alice"), name("hi"), vec![0xbe, 0xef])]));
        processor.flush();
        assert_eq!(store.documents()[0].payload, ActionPayload::HexData("beef".to_string()));
    }

    #[test]
    fn test_account_store_error_is_counted_and_processing_continues() {
        let mut accounts = MockAccountStore::new();
        accounts
            .expect_find()
            .returning(|_| Err(StoreError::Rejected("down".to_string())));
        let sink = MemoryStore::new();
        let filter = ContractFilter::new([SYSTEM_ACCOUNT]);
        let mut processor = Processor::new(accounts, sink.clone(), filter, 0);
        let setabi = SetAbi {
            account: name("carol"),
            abi: vec![],
        };
        processor.process_transaction(&trx(1, vec![Action::new(SYSTEM_ACCOUNT, SETABI, setabi.pack())]));
        assert_eq!(processor.stats().account_errors, 1);
        assert_eq!(processor.pending(), 1);
    }

    #[test]
    fn test_panic_mid_transaction_drops_its_documents() {
        let mut accounts = MockAccountStore::new();
        accounts.expect_find().returning(|account| {
            if account == name("bob") {
                panic!("account lookup blew up");
            }
            Ok(None)
        });
        let filter = ContractFilter::new([name("alice"), name("bob")]);
        let mut processor = Processor::new(accounts, MemoryStore::new(), filter, 0);

        processor.process_event(ChainEvent::from(trx(
            1,
            vec![
                Action::new(name("alice"), name("hi"), vec![1]),
                Action::new(name("bob"), name("hi"), vec![2]),
            ],
        )));
        assert_eq!(processor.pending(), 0);

        processor.process_event(ChainEvent::from(trx(2, vec![Action::new(name("alice"), name("hi"), vec![3])])));
        assert_eq!(processor.pending(), 1);
        assert_eq!(processor.stats().transactions, 2);
    }

    // ==================== flush tests ====================

    #[test]
    fn test_failed_flush_is_counted() {
        let mut sink = MockActionSink::new();
        sink.expect_insert_many()
            .returning(|_| Err(StoreError::Rejected("down".to_string())));
        let filter = ContractFilter::new([name("alice")]);
        let mut processor = Processor::new(MemoryStore::new(), sink, filter, 0);
        processor.process_transaction(&trx(1, vec![Action::new(name("alice"), name("hi"), vec![])]));
        assert_eq!(processor.flush(), WriteOutcome::Failed(1));
        assert_eq!(processor.stats().documents_failed, 1);
        assert_eq!(processor.pending(), 0);
    }

    #[test]
    fn test_cycle_handler_flushes_at_end_of_cycle() {
        let (mut processor, store) = processor(0, &["alice"]);
        processor.handle(ChainEvent::from(trx(1, vec![Action::new(name("alice"), name("hi"), vec![])])));
        processor.handle(ChainEvent::Block { block_num: 1 });
        assert_eq!(store.document_count(), 0);
        processor.end_cycle();
        assert_eq!(store.document_count(), 1);
        assert_eq!(store.insert_calls(), 1);
        assert_eq!(processor.stats().blocks, 1);
    }
}
