//! Chain Primitives
//!
//! Account and action names, authorizations, actions and the events the chain
//! engine delivers for every accepted transaction and block.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Account that owns the privileged system actions
pub const SYSTEM_ACCOUNT: Name = Name::constant("eosio");

/// System action creating a new account
pub const NEWACCOUNT: Name = Name::constant("newaccount");

/// System action replacing an account's interface definition
pub const SETABI: Name = Name::constant("setabi");

/// Synthetic per-block action that has no public interface definition
pub const ONBLOCK: Name = Name::constant("onblock");

/// Maximum number of characters in a name
pub const MAX_NAME_LEN: usize = 13;

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// Errors that can occur while parsing names and identifiers
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NameError {
    #[error("Name is longer than {MAX_NAME_LEN} characters: {0}")]
    TooLong(String),

    #[error("Invalid character '{ch}' in name: {name}")]
    InvalidCharacter { name: String, ch: char },

    #[error("Name is not normalized: {0}")]
    NotNormalized(String),

    #[error("Invalid transaction id: {0}")]
    InvalidTransactionId(String),
}

const fn char_to_symbol(c: u8) -> u64 {
    match c {
        b'a'..=b'z' => (c - b'a') as u64 + 6,
        b'1'..=b'5' => (c - b'1') as u64 + 1,
        _ => 0,
    }
}

/// A 64-bit account, action or permission name
///
/// Names hold up to 13 characters from `.12345a-z`; the 13th character is
/// limited to `.12345a-j` because only 4 bits remain for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Name(u64);

impl Name {
    /// Encode a name at compile time. Invalid characters map to `.`.
    pub const fn constant(s: &str) -> Self {
        let bytes = s.as_bytes();
        let mut value: u64 = 0;
        let mut i = 0;
        while i < MAX_NAME_LEN {
            let mut c = if i < bytes.len() {
                char_to_symbol(bytes[i])
            } else {
                0
            };
            if i < 12 {
                c &= 0x1f;
                c <<= 64 - 5 * (i + 1);
            } else {
                c &= 0x0f;
            }
            value |= c;
            i += 1;
        }
        Name(value)
    }

    /// Wrap a raw 64-bit value
    pub const fn from_u64(value: u64) -> Self {
        Name(value)
    }

    /// The raw 64-bit value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the empty name
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong(s.to_string()));
        }
        for (i, ch) in s.chars().enumerate() {
            let valid = match ch {
                '.' | '1'..='5' => true,
                'a'..='j' => true,
                'k'..='z' => i < 12,
                _ => false,
            };
            if !valid {
                return Err(NameError::InvalidCharacter {
                    name: s.to_string(),
                    ch,
                });
            }
        }

        let name = Name::constant(s);
        if name.to_string() != s {
            return Err(NameError::NotNormalized(s.to_string()));
        }
        Ok(name)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [b'.'; MAX_NAME_LEN];
        let mut tmp = self.0;
        for i in 0..MAX_NAME_LEN {
            let mask = if i == 0 { 0x0f } else { 0x1f };
            out[12 - i] = CHARMAP[(tmp & mask) as usize];
            tmp >>= if i == 0 { 4 } else { 5 };
        }
        let len = out.iter().rposition(|&c| c != b'.').map_or(0, |p| p + 1);
        // CHARMAP is ASCII
        f.write_str(std::str::from_utf8(&out[..len]).unwrap_or_default())
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An actor/permission pair authorizing an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

impl PermissionLevel {
    pub fn new(actor: Name, permission: Name) -> Self {
        Self { actor, permission }
    }
}

/// One action inside a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Contract account the action is dispatched to
    pub account: Name,
    /// Action name within the contract
    pub name: Name,
    #[serde(default)]
    pub authorization: Vec<PermissionLevel>,
    /// Packed action payload
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
    /// Whether this is a context-free action
    #[serde(default)]
    pub context_free: bool,
}

impl Action {
    pub fn new(account: Name, name: Name, data: Vec<u8>) -> Self {
        Self {
            account,
            name,
            authorization: Vec::new(),
            data,
            context_free: false,
        }
    }

    pub fn with_authorization(mut self, actor: Name, permission: Name) -> Self {
        self.authorization.push(PermissionLevel::new(actor, permission));
        self
    }

    /// Whether the action belongs to the system account
    pub fn is_system(&self) -> bool {
        self.account == SYSTEM_ACCOUNT
    }
}

/// Content-derived 32-byte transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransactionId([u8; 32]);

impl TransactionId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for TransactionId {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| NameError::InvalidTransactionId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An accepted transaction as delivered by the chain engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub id: TransactionId,
    /// Actions in execution order
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl TransactionEvent {
    pub fn new(id: TransactionId, actions: Vec<Action>) -> Self {
        Self { id, actions }
    }
}

/// Notification from the chain engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// A transaction was accepted
    Transaction(Arc<TransactionEvent>),
    /// A block was accepted
    Block { block_num: u32 },
}

impl From<TransactionEvent> for ChainEvent {
    fn from(trx: TransactionEvent) -> Self {
        ChainEvent::Transaction(Arc::new(trx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Name encoding tests ====================

    #[test]
    fn test_system_account_value() {
        assert_eq!(SYSTEM_ACCOUNT.as_u64(), 6138663577826885632);
        assert_eq!(SYSTEM_ACCOUNT.to_string(), "eosio");
    }

    #[test]
    fn test_name_round_trips_through_text() {
        for s in ["alice", "eosio.token", "newaccount", "a", "zzzzzzzzzzzzj", "1.2.3"] {
            let name: Name = s.parse().unwrap();
            assert_eq!(name.to_string(), s);
        }
    }

    #[test]
    fn test_constant_matches_parse() {
        let parsed: Name = "setabi".parse().unwrap();
        assert_eq!(SETABI, parsed);
    }

    #[test]
    fn test_empty_name() {
        let name: Name = "".parse().unwrap();
        assert!(name.is_empty());
        assert_eq!(name.to_string(), "");
    }

    #[test]
    fn test_name_too_long() {
        let result = "abcdefghijklmn".parse::<Name>();
        assert!(matches!(result, Err(NameError::TooLong(_))));
    }

    #[test]
    fn test_name_invalid_character() {
        assert!(matches!("Alice".parse::<Name>(), Err(NameError::InvalidCharacter { ch: 'A', .. })));
        assert!(matches!("bob6".parse::<Name>(), Err(NameError::InvalidCharacter { ch: '6', .. })));
    }

    #[test]
    fn test_thirteenth_character_is_restricted() {
        assert!("zzzzzzzzzzzzk".parse::<Name>().is_err());
    }

    #[test]
    fn test_trailing_dots_are_not_normalized() {
        assert!(matches!("alice.".parse::<Name>(), Err(NameError::NotNormalized(_))));
    }

    #[test]
    fn test_name_serde_as_string() {
        let name: Name = "alice".parse().unwrap();
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"alice\"");
        let back: Name = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(back, name);
        assert!(serde_json::from_str::<Name>("\"ALICE\"").is_err());
    }

    // ==================== TransactionId tests ====================

    #[test]
    fn test_transaction_id_hex() {
        let id = TransactionId::new([0xab; 32]);
        let text = id.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<TransactionId>().unwrap(), id);
    }

    #[test]
    fn test_transaction_id_rejects_short_hex() {
        assert!("abcd".parse::<TransactionId>().is_err());
    }

    // ==================== Event serde tests ====================

    #[test]
    fn test_chain_event_from_json_line() {
        let line = r#"{"type":"transaction","id":"0101010101010101010101010101010101010101010101010101010101010101","actions":[{"account":"alice","name":"transfer","authorization":[{"actor":"alice","permission":"active"}],"data":"0a0b"}]}"#;
        let event: ChainEvent = serde_json::from_str(line).unwrap();
        let ChainEvent::Transaction(trx) = event else {
            panic!("expected transaction");
        };
        assert_eq!(trx.actions.len(), 1);
        assert_eq!(trx.actions[0].data, vec![0x0a, 0x0b]);
        assert!(!trx.actions[0].context_free);
        assert_eq!(trx.actions[0].authorization[0].permission.to_string(), "active");
    }

    #[test]
    fn test_block_event_from_json_line() {
        let event: ChainEvent = serde_json::from_str(r#"{"type":"block","block_num":42}"#).unwrap();
        assert_eq!(event, ChainEvent::Block { block_num: 42 });
    }
}
