//! Redis Store
//!
//! Account and action collections kept in Redis. Accounts live in the hash
//! `<namespace>:accounts` (field = account name, value = JSON record) and
//! action documents in the list `<namespace>:filter`, one JSON document per
//! element, appended with a single `RPUSH` per batch.

use redis::{Client, Commands, Connection};
use serde_json::Value;
use std::thread;
use tracing::{error, info, warn};

use crate::chain::Name;
use crate::config::MirrorConfig;
use crate::store::{AccountRecord, AccountStore, ActionSink, StoreError};
use crate::writer::ActionDocument;

/// Key of the account hash
pub fn accounts_key(namespace: &str) -> String {
    format!("{namespace}:accounts")
}

/// Key of the action document list
pub fn filter_key(namespace: &str) -> String {
    format!("{namespace}:filter")
}

/// Redis-backed account store and action sink
pub struct RedisStore {
    connection: Connection,
    accounts_key: String,
    filter_key: String,
}

impl RedisStore {
    /// Wrap an established connection
    pub fn new(connection: Connection, namespace: &str) -> Self {
        Self {
            connection,
            accounts_key: accounts_key(namespace),
            filter_key: filter_key(namespace),
        }
    }

    /// Connect using the configured URI and namespace, retrying with
    /// exponential backoff
    pub fn connect(config: &MirrorConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.store_uri.as_str())?;
        let attempts = config.connect_attempts.max(1);
        let mut attempt = 0;

        loop {
            info!("Connecting to store at {}", config.store_uri);
            match client.get_connection() {
                Ok(connection) => {
                    info!("Successfully connected to store");
                    return Ok(Self::new(connection, &config.namespace));
                }
                Err(e) if attempt + 1 < attempts => {
                    let delay = config.backoff_delay(attempt);
                    warn!(
                        "Connection attempt {} failed: {}, retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!("Giving up after {} connection attempts: {}", attempts, e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Every stored action document, oldest first
    pub fn documents(&mut self) -> Result<Vec<ActionDocument>, StoreError> {
        let raw: Vec<String> = self.connection.lrange(&self.filter_key, 0, -1)?;
        raw.iter()
            .map(|json| ActionDocument::from_json(json).map_err(StoreError::from))
            .collect()
    }

    fn write_record(&mut self, record: &AccountRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let _: () = self
            .connection
            .hset(&self.accounts_key, record.name.to_string(), json)?;
        Ok(())
    }
}

impl AccountStore for RedisStore {
    fn find(&mut self, name: Name) -> Result<Option<AccountRecord>, StoreError> {
        let raw: Option<String> = self.connection.hget(&self.accounts_key, name.to_string())?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn create(&mut self, name: Name, created_at: u64) -> Result<(), StoreError> {
        let record = match self.find(name)? {
            Some(existing) => AccountRecord {
                created_at,
                ..existing
            },
            None => AccountRecord::new(name, created_at),
        };
        self.write_record(&record)
    }

    fn set_abi(&mut self, name: Name, abi: Value, updated_at: u64) -> Result<(), StoreError> {
        let mut record = self.find(name)?.ok_or(StoreError::AccountNotFound(name))?;
        record.abi = Some(abi);
        record.updated_at = Some(updated_at);
        self.write_record(&record)
    }

    fn count(&mut self) -> Result<usize, StoreError> {
        Ok(self.connection.hlen(&self.accounts_key)?)
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        let _: () = self.connection.del(&self.accounts_key)?;
        Ok(())
    }
}

impl ActionSink for RedisStore {
    fn insert_many(&mut self, documents: &[ActionDocument]) -> Result<usize, StoreError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let encoded = documents
            .iter()
            .map(ActionDocument::to_json)
            .collect::<Result<Vec<_>, _>>()?;
        let _: usize = self.connection.rpush(&self.filter_key, encoded)?;
        Ok(documents.len())
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        let _: () = self.connection.del(&self.filter_key)?;
        Ok(())
    }
}
