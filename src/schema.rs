//! Schema Cache
//!
//! Resolves an account to a ready-to-use serializer for its current
//! interface definition. Lookups go through the account store and are
//! memoized until the tracker invalidates the account.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::abi::AbiDef;
use crate::chain::Name;
use crate::serializer::AbiSerializer;
use crate::store::AccountStore;

/// What is known about an account's interface definition
#[derive(Debug, Clone)]
pub enum Schema {
    Known(Arc<AbiSerializer>),
    /// No definition, or one that cannot be used
    Unknown,
}

impl Schema {
    pub fn serializer(&self) -> Option<&AbiSerializer> {
        match self {
            Schema::Known(serializer) => Some(serializer),
            Schema::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Schema::Known(_))
    }
}

/// Memo of resolved schemas keyed by account
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: HashMap<Name, Schema>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the schema of `account`
    ///
    /// A store failure yields `Unknown` without being remembered, so the
    /// next lookup asks the store again.
    pub fn resolve<S>(&mut self, store: &mut S, account: Name) -> Schema
    where
        S: AccountStore + ?Sized,
    {
        if let Some(schema) = self.entries.get(&account) {
            return schema.clone();
        }

        let schema = match store.find(account) {
            Ok(Some(record)) => match record.abi {
                Some(abi) => build_schema(account, abi),
                None => Schema::Unknown,
            },
            Ok(None) => Schema::Unknown,
            Err(e) => {
                warn!(%account, "Failed to look up account: {}", e);
                return Schema::Unknown;
            }
        };

        self.entries.insert(account, schema.clone());
        schema
    }

    /// Forget what is cached for `account`
    pub fn invalidate(&mut self, account: Name) {
        self.entries.remove(&account);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_schema(account: Name, abi: serde_json::Value) -> Schema {
    let def: AbiDef = match serde_json::from_value(abi) {
        Ok(def) => def,
        Err(e) => {
            debug!(%account, "Stored interface definition is malformed: {}", e);
            return Schema::Unknown;
        }
    };
    match AbiSerializer::new(&def) {
        Ok(serializer) => Schema::Known(Arc::new(serializer)),
        Err(e) => {
            debug!(%account, "Stored interface definition is unusable: {}", e);
            Schema::Unknown
        }
    }
}
