//! Account Store and Action Sink
//!
//! The two persistent collections the mirror writes to: account records
//! (keyed by name, carrying the current interface definition) and the
//! append-only collection of filtered action documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::chain::Name;
use crate::writer::ActionDocument;

/// Errors that can occur while reading or writing the store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Account not found: {0}")]
    AccountNotFound(Name),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// One account as mirrored in the account collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub name: Name,
    /// Unix timestamp in milliseconds when the account was first observed
    pub created_at: u64,
    /// Current interface definition as a JSON document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<Value>,
    /// Unix timestamp in milliseconds of the last definition update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

impl AccountRecord {
    pub fn new(name: Name, created_at: u64) -> Self {
        Self {
            name,
            created_at,
            abi: None,
            updated_at: None,
        }
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Account collection keyed by account name
#[cfg_attr(test, mockall::automock)]
pub trait AccountStore {
    fn find(&mut self, name: Name) -> Result<Option<AccountRecord>, StoreError>;

    /// Create the account, or refresh its creation timestamp if it exists.
    /// An existing interface definition is kept.
    fn create(&mut self, name: Name, created_at: u64) -> Result<(), StoreError>;

    /// Replace the account's interface definition
    fn set_abi(&mut self, name: Name, abi: Value, updated_at: u64) -> Result<(), StoreError>;

    fn count(&mut self) -> Result<usize, StoreError>;

    /// Drop every account record
    fn wipe(&mut self) -> Result<(), StoreError>;
}

/// Append-only collection of persisted action documents
#[cfg_attr(test, mockall::automock)]
pub trait ActionSink {
    /// Unordered bulk insert. Returns the number of documents written.
    fn insert_many(&mut self, documents: &[ActionDocument]) -> Result<usize, StoreError>;

    /// Drop every stored document
    fn wipe(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: BTreeMap<Name, AccountRecord>,
    documents: Vec<ActionDocument>,
    insert_calls: usize,
    fail_inserts: usize,
    fail_account_writes: usize,
}

/// In-process store implementing both collections
///
/// Clones share the same state, so a handle kept by the caller observes
/// writes made by the pipeline after the store has been moved into it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn account(&self, name: Name) -> Option<AccountRecord> {
        self.lock().accounts.get(&name).cloned()
    }

    pub fn accounts(&self) -> Vec<AccountRecord> {
        self.lock().accounts.values().cloned().collect()
    }

    pub fn documents(&self) -> Vec<ActionDocument> {
        self.lock().documents.clone()
    }

    pub fn document_count(&self) -> usize {
        self.lock().documents.len()
    }

    /// Number of bulk inserts attempted, including failed ones
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    /// Make the next `count` bulk inserts fail
    pub fn fail_next_inserts(&self, count: usize) {
        self.lock().fail_inserts = count;
    }

    /// Make the next `count` account writes fail
    pub fn fail_next_account_writes(&self, count: usize) {
        self.lock().fail_account_writes = count;
    }
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

impl AccountStore for MemoryStore {
    fn find(&mut self, name: Name) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.account(name))
    }

    fn create(&mut self, name: Name, created_at: u64) -> Result<(), StoreError> {
        let mut state = self.lock();
        if take_failure(&mut state.fail_account_writes) {
            return Err(StoreError::Rejected(format!("account {name}")));
        }
        state
            .accounts
            .entry(name)
            .and_modify(|record| record.created_at = created_at)
            .or_insert_with(|| AccountRecord::new(name, created_at));
        Ok(())
    }

    fn set_abi(&mut self, name: Name, abi: Value, updated_at: u64) -> Result<(), StoreError> {
        let mut state = self.lock();
        if take_failure(&mut state.fail_account_writes) {
            return Err(StoreError::Rejected(format!("account {name}")));
        }
        let record = state
            .accounts
            .get_mut(&name)
            .ok_or(StoreError::AccountNotFound(name))?;
        record.abi = Some(abi);
        record.updated_at = Some(updated_at);
        Ok(())
    }

    fn count(&mut self) -> Result<usize, StoreError> {
        Ok(self.lock().accounts.len())
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        self.lock().accounts.clear();
        Ok(())
    }
}

impl ActionSink for MemoryStore {
    fn insert_many(&mut self, documents: &[ActionDocument]) -> Result<usize, StoreError> {
        let mut state = self.lock();
        state.insert_calls += 1;
        if take_failure(&mut state.fail_inserts) {
            return Err(StoreError::Rejected(format!("{} documents", documents.len())));
        }
        state.documents.extend_from_slice(documents);
        Ok(documents.len())
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        self.lock().documents.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> Name {
        Name::constant("alice")
    }

    // ==================== AccountRecord tests ====================

    #[test]
    fn test_record_json_uses_camel_case() {
        let mut record = AccountRecord::new(alice(), 1_700_000_000_000);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, json!({"name": "alice", "createdAt": 1_700_000_000_000u64}));

        record.abi = Some(json!({"version": "eosio::abi/1.0"}));
        record.updated_at = Some(1_700_000_000_001);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["updatedAt"], 1_700_000_000_001u64);
        assert_eq!(json["abi"]["version"], "eosio::abi/1.0");
    }

    #[test]
    fn test_record_from_json() {
        let record: AccountRecord =
            serde_json::from_str(r#"{"name":"bob","createdAt":5}"#).unwrap();
        assert_eq!(record, AccountRecord::new(Name::constant("bob"), 5));
    }

    // ==================== MemoryStore account tests ====================

    #[test]
    fn test_create_then_find() {
        let mut store = MemoryStore::new();
        store.create(alice(), 10).unwrap();
        let found = store.find(alice()).unwrap().unwrap();
        assert_eq!(found.created_at, 10);
        assert!(found.abi.is_none());
    }

    #[test]
    fn test_create_keeps_existing_abi() {
        let mut store = MemoryStore::new();
        store.create(alice(), 10).unwrap();
        store.set_abi(alice(), json!({"version": "eosio::abi/1.0"}), 11).unwrap();
        store.create(alice(), 12).unwrap();
        let found = store.account(alice()).unwrap();
        assert_eq!(found.created_at, 12);
        assert!(found.abi.is_some());
        assert_eq!(found.updated_at, Some(11));
    }

    #[test]
    fn test_set_abi_on_missing_account() {
        let mut store = MemoryStore::new();
        let result = store.set_abi(alice(), json!({}), 1);
        assert!(matches!(result, Err(StoreError::AccountNotFound(_))));
    }

    #[test]
    fn test_account_write_failure_injection() {
        let mut store = MemoryStore::new();
        store.fail_next_account_writes(1);
        assert!(store.create(alice(), 1).is_err());
        assert!(store.create(alice(), 1).is_ok());
        assert_eq!(AccountStore::count(&mut store).unwrap(), 1);
    }

    #[test]
    fn test_wipe_accounts() {
        let mut store = MemoryStore::new();
        store.create(alice(), 1).unwrap();
        AccountStore::wipe(&mut store).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    // ==================== current_timestamp_millis tests ====================

    #[test]
    fn test_current_timestamp_is_reasonable() {
        let ts = current_timestamp_millis();
        // After Jan 1, 2024
        assert!(ts > 1704067200000);
    }
}
