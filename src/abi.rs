//! Interface Definitions
//!
//! The ABI data model describing how an account's action payloads are laid
//! out, and the little-endian binary codec used both for packed ABIs and for
//! action payloads.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::Name;

/// Version prefix every decodable interface definition must carry
pub const ABI_VERSION_PREFIX: &str = "eosio::abi/1.";

/// Errors that can occur while reading packed data or applying an ABI
#[derive(Error, Debug)]
pub enum AbiError {
    #[error("Unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Variable-length integer overflows 32 bits")]
    VarintOverflow,

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Unsupported ABI version: {0}")]
    UnsupportedVersion(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("No type declared for action: {0}")]
    UnknownAction(Name),

    #[error("Type nesting exceeds {0} levels")]
    DepthExceeded(usize),

    #[error("Variant {variant} has no alternative at index {index}")]
    InvalidVariantIndex { variant: String, index: u32 },

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(u8),

    #[error("JSON conversion error: {0}")]
    Json(#[from] serde_json::Error),
}

/// `new_type_name` is an alias of `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// Binds an action name to the struct type of its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: Name,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub ricardian_contract: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: Name,
    #[serde(default)]
    pub index_type: String,
    #[serde(default)]
    pub key_names: Vec<String>,
    #[serde(default)]
    pub key_types: Vec<String>,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClausePair {
    pub id: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error_code: u64,
    pub error_msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiExtension {
    pub tag: u16,
    #[serde(with = "hex::serde")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDef {
    pub name: String,
    pub types: Vec<String>,
}

/// A complete interface definition for one account
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AbiDef {
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub ricardian_clauses: Vec<ClausePair>,
    #[serde(default)]
    pub error_messages: Vec<ErrorMessage>,
    #[serde(default)]
    pub abi_extensions: Vec<AbiExtension>,
    #[serde(default)]
    pub variants: Vec<VariantDef>,
}

impl AbiDef {
    /// Unpack an interface definition from its packed binary form
    ///
    /// `variants` is a binary extension and may be missing from older
    /// encodings. Bytes after the last known section are ignored.
    pub fn unpack(bytes: &[u8]) -> Result<Self, AbiError> {
        let mut r = AbiReader::new(bytes);
        let version = r.read_string()?;
        let types = r.read_vec(|r| {
            Ok(TypeDef {
                new_type_name: r.read_string()?,
                type_name: r.read_string()?,
            })
        })?;
        let structs = r.read_vec(|r| {
            Ok(StructDef {
                name: r.read_string()?,
                base: r.read_string()?,
                fields: r.read_vec(|r| {
                    Ok(FieldDef {
                        name: r.read_string()?,
                        type_name: r.read_string()?,
                    })
                })?,
            })
        })?;
        let actions = r.read_vec(|r| {
            Ok(ActionDef {
                name: r.read_name()?,
                type_name: r.read_string()?,
                ricardian_contract: r.read_string()?,
            })
        })?;
        let tables = r.read_vec(|r| {
            Ok(TableDef {
                name: r.read_name()?,
                index_type: r.read_string()?,
                key_names: r.read_vec(|r| r.read_string())?,
                key_types: r.read_vec(|r| r.read_string())?,
                type_name: r.read_string()?,
            })
        })?;
        let ricardian_clauses = r.read_vec(|r| {
            Ok(ClausePair {
                id: r.read_string()?,
                body: r.read_string()?,
            })
        })?;
        let error_messages = r.read_vec(|r| {
            Ok(ErrorMessage {
                error_code: r.read_u64()?,
                error_msg: r.read_string()?,
            })
        })?;
        let abi_extensions = r.read_vec(|r| {
            Ok(AbiExtension {
                tag: r.read_u16()?,
                value: r.read_blob()?,
            })
        })?;
        let variants = if r.is_empty() {
            Vec::new()
        } else {
            r.read_vec(|r| {
                Ok(VariantDef {
                    name: r.read_string()?,
                    types: r.read_vec(|r| r.read_string())?,
                })
            })?
        };

        Ok(AbiDef {
            version,
            types,
            structs,
            actions,
            tables,
            ricardian_clauses,
            error_messages,
            abi_extensions,
            variants,
        })
    }

    /// Pack the definition into its binary form
    pub fn pack(&self) -> Vec<u8> {
        let mut w = AbiWriter::new();
        w.write_string(&self.version);
        w.write_varuint32(self.types.len() as u32);
        for t in &self.types {
            w.write_string(&t.new_type_name);
            w.write_string(&t.type_name);
        }
        w.write_varuint32(self.structs.len() as u32);
        for s in &self.structs {
            w.write_string(&s.name);
            w.write_string(&s.base);
            w.write_varuint32(s.fields.len() as u32);
            for f in &s.fields {
                w.write_string(&f.name);
                w.write_string(&f.type_name);
            }
        }
        w.write_varuint32(self.actions.len() as u32);
        for a in &self.actions {
            w.write_name(a.name);
            w.write_string(&a.type_name);
            w.write_string(&a.ricardian_contract);
        }
        w.write_varuint32(self.tables.len() as u32);
        for t in &self.tables {
            w.write_name(t.name);
            w.write_string(&t.index_type);
            w.write_varuint32(t.key_names.len() as u32);
            for k in &t.key_names {
                w.write_string(k);
            }
            w.write_varuint32(t.key_types.len() as u32);
            for k in &t.key_types {
                w.write_string(k);
            }
            w.write_string(&t.type_name);
        }
        w.write_varuint32(self.ricardian_clauses.len() as u32);
        for c in &self.ricardian_clauses {
            w.write_string(&c.id);
            w.write_string(&c.body);
        }
        w.write_varuint32(self.error_messages.len() as u32);
        for e in &self.error_messages {
            w.write_u64(e.error_code);
            w.write_string(&e.error_msg);
        }
        w.write_varuint32(self.abi_extensions.len() as u32);
        for e in &self.abi_extensions {
            w.write_u16(e.tag);
            w.write_blob(&e.value);
        }
        if !self.variants.is_empty() {
            w.write_varuint32(self.variants.len() as u32);
            for v in &self.variants {
                w.write_string(&v.name);
                w.write_varuint32(v.types.len() as u32);
                for t in &v.types {
                    w.write_string(t);
                }
            }
        }
        w.into_bytes()
    }

    /// Whether the version string is one the serializer understands
    pub fn has_supported_version(&self) -> bool {
        self.version.starts_with(ABI_VERSION_PREFIX)
    }
}

/// Cursor over little-endian packed data
#[derive(Debug, Clone)]
pub struct AbiReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AbiReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], AbiError> {
        if n > self.remaining() {
            return Err(AbiError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], AbiError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, AbiError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, AbiError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, AbiError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, AbiError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, AbiError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, AbiError> {
        Ok(u128::from_le_bytes(self.read_array()?))
    }

    pub fn read_i8(&mut self) -> Result<i8, AbiError> {
        Ok(i8::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, AbiError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, AbiError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, AbiError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i128(&mut self) -> Result<i128, AbiError> {
        Ok(i128::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, AbiError> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, AbiError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// LEB128-style unsigned 32-bit integer
    pub fn read_varuint32(&mut self) -> Result<u32, AbiError> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 35 {
                return Err(AbiError::VarintOverflow);
            }
        }
        u32::try_from(value).map_err(|_| AbiError::VarintOverflow)
    }

    /// Zigzag-encoded signed 32-bit integer
    pub fn read_varint32(&mut self) -> Result<i32, AbiError> {
        let v = self.read_varuint32()?;
        Ok(((v >> 1) as i32) ^ -((v & 1) as i32))
    }

    /// Length-prefixed byte blob
    pub fn read_blob(&mut self) -> Result<Vec<u8>, AbiError> {
        let len = self.read_varuint32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, AbiError> {
        let len = self.read_varuint32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::InvalidUtf8)
    }

    pub fn read_name(&mut self) -> Result<Name, AbiError> {
        Ok(Name::from_u64(self.read_u64()?))
    }

    /// Length-prefixed sequence. The length is checked against the remaining
    /// bytes so a corrupt prefix cannot trigger a huge allocation.
    pub fn read_vec<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, AbiError>,
    ) -> Result<Vec<T>, AbiError> {
        let len = self.read_varuint32()? as usize;
        if len > self.remaining() {
            return Err(AbiError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(read(self)?);
        }
        Ok(out)
    }
}

/// Builder for little-endian packed data
#[derive(Debug, Default, Clone)]
pub struct AbiWriter {
    buf: Vec<u8>,
}

impl AbiWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.write_raw(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.write_raw(&v.to_le_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.write_raw(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.write_raw(&v.to_le_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> &mut Self {
        self.write_raw(&v.to_le_bytes())
    }

    pub fn write_varuint32(&mut self, mut v: u32) -> &mut Self {
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if v == 0 {
                break;
            }
        }
        self
    }

    pub fn write_blob(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_varuint32(bytes.len() as u32);
        self.write_raw(bytes)
    }

    pub fn write_string(&mut self, s: &str) -> &mut Self {
        self.write_blob(s.as_bytes())
    }

    pub fn write_name(&mut self, name: Name) -> &mut Self {
        self.write_u64(name.as_u64())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
