//! Batch Writer
//!
//! Persisted action documents and the per-cycle batch that is flushed to the
//! action sink with one unordered bulk insert.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::chain::{Action, Name, PermissionLevel, TransactionId};
use crate::store::ActionSink;

/// Decoded payload of an action, or its raw bytes when decoding failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPayload {
    /// Structured payload
    Data(Value),
    /// Lowercase hex of the raw payload
    HexData(String),
}

impl ActionPayload {
    pub fn hex(data: &[u8]) -> Self {
        ActionPayload::HexData(hex::encode(data))
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, ActionPayload::Data(_))
    }
}

/// One persisted action
///
/// Serialized as a flat document carrying either `data` or `hex_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDocument {
    /// Position of the action within its transaction
    pub action_num: u32,
    pub trx_id: TransactionId,
    /// Whether the action is context-free
    pub cfa: bool,
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    #[serde(flatten)]
    pub payload: ActionPayload,
}

impl ActionDocument {
    pub fn new(action_num: u32, trx_id: TransactionId, action: &Action, payload: ActionPayload) -> Self {
        Self {
            action_num,
            trx_id,
            cfa: action.context_free,
            account: action.account,
            name: action.name,
            authorization: action.authorization.clone(),
            payload,
        }
    }

    /// Serialize the document to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a document from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Result of flushing one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing was queued
    Skipped,
    /// All documents were written
    Written(usize),
    /// The bulk insert failed and the documents were dropped
    Failed(usize),
}

/// Collects documents during a drain cycle and writes them in one call
pub struct BatchWriter<K> {
    sink: K,
    batch: Vec<ActionDocument>,
}

impl<K: ActionSink> BatchWriter<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            batch: Vec::new(),
        }
    }

    pub fn push(&mut self, document: ActionDocument) {
        self.batch.push(document);
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Write the pending batch with one unordered bulk insert
    ///
    /// Failures are logged and not retried. The batch is cleared either way.
    pub fn flush(&mut self) -> WriteOutcome {
        if self.batch.is_empty() {
            return WriteOutcome::Skipped;
        }

        let count = self.batch.len();
        let outcome = match self.sink.insert_many(&self.batch) {
            Ok(written) => {
                debug!(count = written, "Persisted action documents");
                WriteOutcome::Written(written)
            }
            Err(e) => {
                error!(count, "Bulk insert of action documents failed: {}", e);
                WriteOutcome::Failed(count)
            }
        };
        self.batch.clear();
        outcome
    }

    /// Drop documents pushed after the batch held `len` of them
    ///
    /// # Returns
    /// The number of documents discarded
    pub fn truncate(&mut self, len: usize) -> usize {
        let discarded = self.batch.len().saturating_sub(len);
        self.batch.truncate(len);
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockActionSink, StoreError};
    use serde_json::json;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn sample_action() -> Action {
        Action::new(name("alice"), name("transfer"), vec![0xde, 0xad])
            .with_authorization(name("alice"), name("active"))
    }

    fn sample_document(action_num: u32, payload: ActionPayload) -> ActionDocument {
        ActionDocument::new(action_num, TransactionId::new([0x11; 32]), &sample_action(), payload)
    }

    // ==================== ActionDocument tests ====================

    #[test]
    fn test_document_with_data() {
        let doc = sample_document(0, ActionPayload::Data(json!({"to": "bob"})));
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["action_num"], 0);
        assert_eq!(value["trx_id"], "11".repeat(32));
        assert_eq!(value["cfa"], false);
        assert_eq!(value["account"], "alice");
        assert_eq!(value["name"], "transfer");
        assert_eq!(value["authorization"], json!([{"actor": "alice", "permission": "active"}]));
        assert_eq!(value["data"], json!({"to": "bob"}));
        assert!(value.get("hex_data").is_none());
    }

    #[test]
    fn test_document_with_hex_data() {
        let doc = sample_document(3, ActionPayload::hex(&[0xde, 0xad]));
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["hex_data"], "dead");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_document_from_json() {
        let doc = sample_document(1, ActionPayload::hex(&[0x01]));
        let parsed = ActionDocument::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(parsed, doc);
        assert!(!parsed.payload.is_decoded());
    }

    #[test]
    fn test_document_copies_context_free_flag() {
        let mut action = sample_action();
        action.context_free = true;
        let doc = ActionDocument::new(0, TransactionId::default(), &action, ActionPayload::hex(&[]));
        assert!(doc.cfa);
    }

    // ==================== BatchWriter tests ====================

    #[test]
    fn test_flush_empty_batch_skips_sink() {
        let mut sink = MockActionSink::new();
        sink.expect_insert_many().never();
        let mut writer = BatchWriter::new(sink);
        assert_eq!(writer.flush(), WriteOutcome::Skipped);
    }

    #[test]
    fn test_flush_writes_whole_batch_once() {
        let mut sink = MockActionSink::new();
        sink.expect_insert_many()
            .withf(|docs| docs.len() == 2 && docs[0].action_num == 0 && docs[1].action_num == 1)
            .times(1)
            .returning(|docs| Ok(docs.len()));
        let mut writer = BatchWriter::new(sink);
        writer.push(sample_document(0, ActionPayload::hex(&[])));
        writer.push(sample_document(1, ActionPayload::hex(&[])));
        assert_eq!(writer.len(), 2);
        assert_eq!(writer.flush(), WriteOutcome::Written(2));
        assert!(writer.is_empty());
    }

    #[test]
    fn test_failed_flush_clears_batch() {
        let mut sink = MockActionSink::new();
        sink.expect_insert_many()
            .times(1)
            .returning(|_| Err(StoreError::Rejected("down".to_string())));
        let mut writer = BatchWriter::new(sink);
        writer.push(sample_document(0, ActionPayload::hex(&[])));
        assert_eq!(writer.flush(), WriteOutcome::Failed(1));
        assert!(writer.is_empty());
        assert_eq!(writer.flush(), WriteOutcome::Skipped);
    }

    #[test]
    fn test_truncate_keeps_earlier_documents() {
        let mut sink = MockActionSink::new();
        sink.expect_insert_many()
            .times(1)
            .withf(|docs| docs.len() == 1 && docs[0].action_num == 0)
            .returning(|docs| Ok(docs.len()));
        let mut writer = BatchWriter::new(sink);
        writer.push(sample_document(0, ActionPayload::hex(&[])));
        let mark = writer.len();
        writer.push(sample_document(1, ActionPayload::hex(&[])));
        writer.push(sample_document(2, ActionPayload::hex(&[])));

        assert_eq!(writer.truncate(mark), 2);
        assert_eq!(writer.truncate(5), 0);
        assert_eq!(writer.flush(), WriteOutcome::Written(1));
    }

    #[test]
    fn test_next_flush_after_failure_is_attempted() {
        let mut sink = MockActionSink::new();
        let mut calls = 0;
        sink.expect_insert_many().times(2).returning(move |docs| {
            calls += 1;
            if calls == 1 {
                Err(StoreError::Rejected("down".to_string()))
            } else {
                Ok(docs.len())
            }
        });
        let mut writer = BatchWriter::new(sink);
        writer.push(sample_document(0, ActionPayload::hex(&[])));
        assert_eq!(writer.flush(), WriteOutcome::Failed(1));
        writer.push(sample_document(0, ActionPayload::hex(&[])));
        assert_eq!(writer.flush(), WriteOutcome::Written(1));
    }
}
