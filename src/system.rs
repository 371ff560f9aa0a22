//! System Action Payloads
//!
//! Fixed-shape payloads of the system account's `newaccount` and `setabi`
//! actions. These decode without any interface definition.

use ripemd::{Digest, Ripemd160};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::abi::{AbiError, AbiReader, AbiWriter};
use crate::chain::{Name, PermissionLevel};

const COMPRESSED_KEY_LEN: usize = 33;
const SIGNATURE_LEN: usize = 65;
const CHECKSUM_LEN: usize = 4;
const LEGACY_KEY_PREFIX: &str = "EOS";

/// Base58 of `data` followed by the first bytes of RIPEMD-160(`data` || `suffix`)
fn base58_check(data: &[u8], suffix: &[u8]) -> String {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.update(suffix);
    let digest = hasher.finalize();

    let mut bytes = Vec::with_capacity(data.len() + CHECKSUM_LEN);
    bytes.extend_from_slice(data);
    bytes.extend_from_slice(&digest[..CHECKSUM_LEN]);
    bs58::encode(bytes).into_string()
}

/// Curve of a key or signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    K1,
    R1,
    WebAuthn,
}

impl KeyType {
    fn from_index(index: u32) -> Result<Self, AbiError> {
        match index {
            0 => Ok(KeyType::K1),
            1 => Ok(KeyType::R1),
            2 => Ok(KeyType::WebAuthn),
            other => Err(AbiError::UnsupportedKeyType(other.min(u32::from(u8::MAX)) as u8)),
        }
    }

    fn index(self) -> u32 {
        match self {
            KeyType::K1 => 0,
            KeyType::R1 => 1,
            KeyType::WebAuthn => 2,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            KeyType::K1 => "K1",
            KeyType::R1 => "R1",
            KeyType::WebAuthn => "WA",
        }
    }
}

/// A public key
///
/// K1 keys render in the legacy `EOS<base58>` form (checksum over the key
/// alone); other curves render as `PUB_<type>_<base58>` with the type tag
/// mixed into the checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub key_type: KeyType,
    pub data: Vec<u8>,
}

impl PublicKey {
    pub fn k1(data: [u8; COMPRESSED_KEY_LEN]) -> Self {
        Self {
            key_type: KeyType::K1,
            data: data.to_vec(),
        }
    }

    pub fn unpack(r: &mut AbiReader<'_>) -> Result<Self, AbiError> {
        let key_type = KeyType::from_index(r.read_varuint32()?)?;
        let start = r.clone();
        r.read_bytes(COMPRESSED_KEY_LEN)?;
        if key_type == KeyType::WebAuthn {
            // user presence flag, then relying party id
            r.read_u8()?;
            r.read_string()?;
        }
        let len = start.remaining() - r.remaining();
        let data = start.clone().read_bytes(len)?.to_vec();
        Ok(Self { key_type, data })
    }

    pub fn pack(&self, w: &mut AbiWriter) {
        w.write_varuint32(self.key_type.index());
        w.write_raw(&self.data);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_type {
            KeyType::K1 => write!(f, "{}{}", LEGACY_KEY_PREFIX, base58_check(&self.data, b"")),
            other => {
                let tag = other.tag();
                write!(f, "PUB_{}_{}", tag, base58_check(&self.data, tag.as_bytes()))
            }
        }
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A signature, rendered as `SIG_<type>_<base58 with checksum>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub key_type: KeyType,
    pub data: Vec<u8>,
}

impl Signature {
    pub fn unpack(r: &mut AbiReader<'_>) -> Result<Self, AbiError> {
        let key_type = KeyType::from_index(r.read_varuint32()?)?;
        let start = r.clone();
        r.read_bytes(SIGNATURE_LEN)?;
        if key_type == KeyType::WebAuthn {
            // authenticator data, then client JSON
            r.read_blob()?;
            r.read_string()?;
        }
        let len = start.remaining() - r.remaining();
        let data = start.clone().read_bytes(len)?.to_vec();
        Ok(Self { key_type, data })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.key_type.tag();
        write!(f, "SIG_{}_{}", tag, base58_check(&self.data, tag.as_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyWeight {
    pub key: PublicKey,
    pub weight: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PermissionLevelWeight {
    pub permission: PermissionLevel,
    pub weight: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitWeight {
    pub wait_sec: u32,
    pub weight: u16,
}

/// Weighted threshold of keys, accounts and delays
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Authority {
    pub threshold: u32,
    pub keys: Vec<KeyWeight>,
    pub accounts: Vec<PermissionLevelWeight>,
    pub waits: Vec<WaitWeight>,
}

impl Authority {
    /// Single-key authority with threshold 1
    pub fn from_key(key: PublicKey) -> Self {
        Self {
            threshold: 1,
            keys: vec![KeyWeight { key, weight: 1 }],
            ..Default::default()
        }
    }

    pub fn unpack(r: &mut AbiReader<'_>) -> Result<Self, AbiError> {
        Ok(Self {
            threshold: r.read_u32()?,
            keys: r.read_vec(|r| {
                Ok(KeyWeight {
                    key: PublicKey::unpack(r)?,
                    weight: r.read_u16()?,
                })
            })?,
            accounts: r.read_vec(|r| {
                Ok(PermissionLevelWeight {
                    permission: PermissionLevel::new(r.read_name()?, r.read_name()?),
                    weight: r.read_u16()?,
                })
            })?,
            waits: r.read_vec(|r| {
                Ok(WaitWeight {
                    wait_sec: r.read_u32()?,
                    weight: r.read_u16()?,
                })
            })?,
        })
    }

    pub fn pack(&self, w: &mut AbiWriter) {
        w.write_u32(self.threshold);
        w.write_varuint32(self.keys.len() as u32);
        for k in &self.keys {
            k.key.pack(w);
            w.write_u16(k.weight);
        }
        w.write_varuint32(self.accounts.len() as u32);
        for a in &self.accounts {
            w.write_name(a.permission.actor);
            w.write_name(a.permission.permission);
            w.write_u16(a.weight);
        }
        w.write_varuint32(self.waits.len() as u32);
        for wait in &self.waits {
            w.write_u32(wait.wait_sec);
            w.write_u16(wait.weight);
        }
    }
}

/// Payload of `eosio::newaccount`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAccount {
    pub creator: Name,
    pub name: Name,
    pub owner: Authority,
    pub active: Authority,
}

impl NewAccount {
    pub fn unpack(data: &[u8]) -> Result<Self, AbiError> {
        let mut r = AbiReader::new(data);
        Ok(Self {
            creator: r.read_name()?,
            name: r.read_name()?,
            owner: Authority::unpack(&mut r)?,
            active: Authority::unpack(&mut r)?,
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut w = AbiWriter::new();
        w.write_name(self.creator);
        w.write_name(self.name);
        self.owner.pack(&mut w);
        self.active.pack(&mut w);
        w.into_bytes()
    }
}

/// Payload of `eosio::setabi`; `abi` holds the packed interface definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAbi {
    pub account: Name,
    pub abi: Vec<u8>,
}

impl SetAbi {
    pub fn unpack(data: &[u8]) -> Result<Self, AbiError> {
        let mut r = AbiReader::new(data);
        Ok(Self {
            account: r.read_name()?,
            abi: r.read_blob()?,
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut w = AbiWriter::new();
        w.write_name(self.account);
        w.write_blob(&self.abi);
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiDef;

    fn sample_key() -> PublicKey {
        let mut data = [0u8; COMPRESSED_KEY_LEN];
        data[0] = 0x02;
        data[32] = 0xff;
        PublicKey::k1(data)
    }

    fn sample_newaccount() -> NewAccount {
        NewAccount {
            creator: Name::constant("eosio"),
            name: Name::constant("alice"),
            owner: Authority::from_key(sample_key()),
            active: Authority {
                threshold: 2,
                keys: vec![KeyWeight { key: sample_key(), weight: 1 }],
                accounts: vec![PermissionLevelWeight {
                    permission: PermissionLevel::new(Name::constant("bob"), Name::constant("active")),
                    weight: 1,
                }],
                waits: vec![WaitWeight { wait_sec: 60, weight: 1 }],
            },
        }
    }

    // ==================== newaccount tests ====================

    #[test]
    fn test_newaccount_unpack() {
        let original = sample_newaccount();
        let decoded = NewAccount::unpack(&original.pack()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_newaccount_json_shape() {
        let json = serde_json::to_value(sample_newaccount()).unwrap();
        assert_eq!(json["creator"], "eosio");
        assert_eq!(json["name"], "alice");
        assert_eq!(json["owner"]["threshold"], 1);
        assert_eq!(json["active"]["accounts"][0]["permission"]["actor"], "bob");
        assert_eq!(json["active"]["waits"][0]["wait_sec"], 60);
        let key = json["owner"]["keys"][0]["key"].as_str().unwrap();
        assert_eq!(key, sample_key().to_string());
        assert!(key.starts_with("EOS"));
    }

    #[test]
    fn test_newaccount_truncated() {
        let bytes = sample_newaccount().pack();
        assert!(NewAccount::unpack(&bytes[..20]).is_err());
    }

    #[test]
    fn test_newaccount_unknown_key_type() {
        let mut w = AbiWriter::new();
        w.write_name(Name::constant("eosio"))
            .write_name(Name::constant("alice"))
            .write_u32(1)
            .write_varuint32(1)
            .write_varuint32(9);
        let result = NewAccount::unpack(&w.into_bytes());
        assert!(matches!(result, Err(AbiError::UnsupportedKeyType(9))));
    }

    // ==================== key tests ====================

    const DEV_KEY_HEX: &str = "02c0ded2bc1f1305fb0faac5e6c03ee3a1924234985427b6167ca569d13df435cf";

    fn dev_key_bytes() -> [u8; COMPRESSED_KEY_LEN] {
        let mut data = [0u8; COMPRESSED_KEY_LEN];
        data.copy_from_slice(&hex::decode(DEV_KEY_HEX).unwrap());
        data
    }

    #[test]
    fn test_k1_key_legacy_format() {
        let key = PublicKey::k1(dev_key_bytes());
        assert_eq!(key.to_string(), "EOS6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV");
    }

    #[test]
    fn test_k1_key_decoded_through_newaccount() {
        let payload = NewAccount {
            owner: Authority::from_key(PublicKey::k1([2; COMPRESSED_KEY_LEN])),
            ..sample_newaccount()
        };
        let decoded = NewAccount::unpack(&payload.pack()).unwrap();
        let json = serde_json::to_value(decoded).unwrap();
        assert_eq!(
            json["owner"]["keys"][0]["key"],
            "EOS4uNe9acnngQsW7wqi818p8GopreujRtw7CS3i6jJWEHjXShSCR"
        );
    }

    #[test]
    fn test_r1_key_checksum_includes_type() {
        let key = PublicKey {
            key_type: KeyType::R1,
            data: vec![2; COMPRESSED_KEY_LEN],
        };
        assert_eq!(
            key.to_string(),
            "PUB_R1_4uNe9acnngQsW7wqi818p8GopreujRtw7CS3i6jJWEHjVJPwWx"
        );
    }

    #[test]
    fn test_webauthn_key_includes_trailer() {
        let mut w = AbiWriter::new();
        w.write_varuint32(2)
            .write_raw(&[0x03; COMPRESSED_KEY_LEN])
            .write_u8(1)
            .write_string("example.com");
        let bytes = w.into_bytes();
        let mut r = AbiReader::new(&bytes);
        let key = PublicKey::unpack(&mut r).unwrap();
        assert!(r.is_empty());
        assert_eq!(key.key_type, KeyType::WebAuthn);
        assert_eq!(key.data.len(), COMPRESSED_KEY_LEN + 1 + 1 + "example.com".len());
        assert!(key.to_string().starts_with("PUB_WA_"));
    }

    #[test]
    fn test_signature_k1() {
        let mut w = AbiWriter::new();
        w.write_varuint32(0).write_raw(&[0x1f; SIGNATURE_LEN]);
        let bytes = w.into_bytes();
        let sig = Signature::unpack(&mut AbiReader::new(&bytes)).unwrap();
        assert_eq!(
            sig.to_string(),
            "SIG_K1_JyKvoansZSGu9UqYbjYV1chc5t9Gyd5fweWLTV6v9QfDfXpaLba8ftpJVPS1yvbwT5wDNUGjmcroj6f4s6NVsoHRp2B5xC"
        );
    }

    // ==================== setabi tests ====================

    #[test]
    fn test_setabi_unpack_carries_packed_abi() {
        let abi = AbiDef {
            version: "eosio::abi/1.0".to_string(),
            ..Default::default()
        };
        let payload = SetAbi {
            account: Name::constant("carol"),
            abi: abi.pack(),
        };
        let decoded = SetAbi::unpack(&payload.pack()).unwrap();
        assert_eq!(decoded.account.to_string(), "carol");
        assert_eq!(AbiDef::unpack(&decoded.abi).unwrap(), abi);
    }

    #[test]
    fn test_setabi_truncated_blob() {
        let mut w = AbiWriter::new();
        w.write_name(Name::constant("carol")).write_varuint32(10).write_raw(&[1, 2]);
        assert!(SetAbi::unpack(&w.into_bytes()).is_err());
    }
}
