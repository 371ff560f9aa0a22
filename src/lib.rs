//! Contract Mirror Library
//!
//! This crate mirrors the actions of selected contracts into a persistent
//! store as transactions are accepted by the chain, keeping per-account
//! interface definitions current so payloads can be decoded to JSON.

pub mod abi;
pub mod chain;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod filter;
pub mod mirror;
pub mod processor;
pub mod queue;
pub mod redis_store;
pub mod schema;
pub mod serializer;
pub mod source;
pub mod store;
pub mod system;
pub mod tracker;
pub mod writer;

// Re-export commonly used types
pub use chain::{Action, ChainEvent, Name, PermissionLevel, TransactionEvent, TransactionId};
pub use config::MirrorConfig;
pub use decoder::decode_action;
pub use filter::ContractFilter;
pub use mirror::{Mirror, MirrorError};
pub use processor::Processor;
pub use redis_store::RedisStore;
pub use source::{EventSource, JsonLinesSource};
pub use store::{AccountRecord, AccountStore, ActionSink, MemoryStore, StoreError};
pub use writer::{ActionDocument, ActionPayload};
