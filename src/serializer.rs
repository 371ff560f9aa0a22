//! ABI Serializer
//!
//! Converts packed action payloads into JSON using an account's interface
//! definition: typedefs, structs (with base structs), arrays, optionals,
//! binary extensions, variants and the chain's built-in types.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Number, Value};
use std::collections::HashMap;

use crate::abi::{AbiDef, AbiError, AbiReader, StructDef, VariantDef};
use crate::chain::Name;
use crate::system::{PublicKey, Signature};

/// Maximum nesting of structs, arrays and typedef chains
pub const MAX_TYPE_DEPTH: usize = 32;

/// Block timestamps count half-second slots from 2000-01-01T00:00:00Z
const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;
const BLOCK_INTERVAL_MS: i64 = 500;

/// Decoder for one account's action payloads
#[derive(Debug, Clone)]
pub struct AbiSerializer {
    typedefs: HashMap<String, String>,
    structs: HashMap<String, StructDef>,
    variants: HashMap<String, VariantDef>,
    actions: HashMap<Name, String>,
}

impl AbiSerializer {
    /// Build a serializer, rejecting definitions with an unknown version
    pub fn new(abi: &AbiDef) -> Result<Self, AbiError> {
        if !abi.has_supported_version() {
            return Err(AbiError::UnsupportedVersion(abi.version.clone()));
        }

        Ok(Self {
            typedefs: abi
                .types
                .iter()
                .map(|t| (t.new_type_name.clone(), t.type_name.clone()))
                .collect(),
            structs: abi.structs.iter().map(|s| (s.name.clone(), s.clone())).collect(),
            variants: abi.variants.iter().map(|v| (v.name.clone(), v.clone())).collect(),
            actions: abi
                .actions
                .iter()
                .map(|a| (a.name, a.type_name.clone()))
                .collect(),
        })
    }

    /// Payload type declared for an action
    pub fn action_type(&self, action: Name) -> Option<&str> {
        self.actions.get(&action).map(String::as_str)
    }

    /// Decode an action payload using the type the definition declares for it
    pub fn action_to_json(&self, action: Name, data: &[u8]) -> Result<Value, AbiError> {
        let type_name = self
            .action_type(action)
            .ok_or(AbiError::UnknownAction(action))?;
        self.binary_to_json(type_name, data)
    }

    /// Decode `data` as a value of `type_name`
    pub fn binary_to_json(&self, type_name: &str, data: &[u8]) -> Result<Value, AbiError> {
        let mut reader = AbiReader::new(data);
        self.read_value(type_name, &mut reader, 0)
    }

    fn resolve_type<'a>(&'a self, type_name: &'a str) -> Result<&'a str, AbiError> {
        let mut current = type_name;
        for _ in 0..MAX_TYPE_DEPTH {
            match self.typedefs.get(current) {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
        Err(AbiError::DepthExceeded(MAX_TYPE_DEPTH))
    }

    fn read_value(
        &self,
        type_name: &str,
        r: &mut AbiReader<'_>,
        depth: usize,
    ) -> Result<Value, AbiError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(AbiError::DepthExceeded(MAX_TYPE_DEPTH));
        }
        let resolved = self.resolve_type(type_name)?;

        if let Some(inner) = resolved.strip_suffix("[]") {
            let len = r.read_varuint32()? as usize;
            // bounds zero-width elements (empty structs, trailing extensions) too
            if len > r.remaining() {
                return Err(AbiError::UnexpectedEof {
                    needed: len,
                    remaining: r.remaining(),
                });
            }
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(self.read_value(inner, r, depth + 1)?);
            }
            return Ok(Value::Array(items));
        }
        if let Some(inner) = resolved.strip_suffix('?') {
            return if r.read_bool()? {
                self.read_value(inner, r, depth + 1)
            } else {
                Ok(Value::Null)
            };
        }
        if let Some(inner) = resolved.strip_suffix('$') {
            return self.read_value(inner, r, depth + 1);
        }
        if let Some(value) = read_builtin(resolved, r)? {
            return Ok(value);
        }
        if let Some(variant) = self.variants.get(resolved) {
            let index = r.read_varuint32()?;
            let alt = variant
                .types
                .get(index as usize)
                .ok_or_else(|| AbiError::InvalidVariantIndex {
                    variant: variant.name.clone(),
                    index,
                })?;
            let value = self.read_value(alt, r, depth + 1)?;
            return Ok(json!([alt, value]));
        }
        if self.structs.contains_key(resolved) {
            let mut fields = Map::new();
            self.read_struct(resolved, r, &mut fields, depth + 1)?;
            return Ok(Value::Object(fields));
        }

        Err(AbiError::UnknownType(resolved.to_string()))
    }

    fn read_struct(
        &self,
        struct_name: &str,
        r: &mut AbiReader<'_>,
        fields: &mut Map<String, Value>,
        depth: usize,
    ) -> Result<(), AbiError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(AbiError::DepthExceeded(MAX_TYPE_DEPTH));
        }
        let def = self
            .structs
            .get(struct_name)
            .ok_or_else(|| AbiError::UnknownType(struct_name.to_string()))?;

        if !def.base.is_empty() {
            let base = self.resolve_type(&def.base)?;
            self.read_struct(base, r, fields, depth + 1)?;
        }
        for field in &def.fields {
            // binary extensions may be cut off at the end of the payload
            if field.type_name.ends_with('$') && r.is_empty() {
                break;
            }
            let value = self.read_value(&field.type_name, r, depth)?;
            fields.insert(field.name.clone(), value);
        }
        Ok(())
    }
}

/// Render 64-bit integers as numbers only while they fit in 32 bits
fn wide_unsigned(v: u64) -> Value {
    if v <= u64::from(u32::MAX) {
        Value::from(v)
    } else {
        Value::String(v.to_string())
    }
}

fn wide_signed(v: i64) -> Value {
    if (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&v) {
        Value::from(v)
    } else {
        Value::String(v.to_string())
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map_or_else(|| Value::String(v.to_string()), Value::Number)
}

fn format_millis(ms: i64) -> Value {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
        None => Value::String(ms.to_string()),
    }
}

/// Decode a symbol: low byte is the precision, then up to 7 code characters
pub fn symbol_to_string(raw: u64) -> String {
    format!("{},{}", raw & 0xff, symbol_code_to_string(raw >> 8))
}

pub fn symbol_code_to_string(mut raw: u64) -> String {
    let mut code = String::new();
    while raw & 0xff != 0 {
        code.push((raw & 0xff) as u8 as char);
        raw >>= 8;
    }
    code
}

/// Render an asset amount with its symbol's precision, e.g. `1.0000 EOS`
pub fn asset_to_string(amount: i64, symbol: u64) -> String {
    let precision = (symbol & 0xff) as u32;
    let code = symbol_code_to_string(symbol >> 8);
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    if precision == 0 {
        return format!("{sign}{abs} {code}");
    }
    let scale = 10u128.pow(precision.min(18));
    let whole = u128::from(abs) / scale;
    let frac = u128::from(abs) % scale;
    format!("{sign}{whole}.{frac:0width$} {code}", width = precision.min(18) as usize)
}

fn read_builtin(type_name: &str, r: &mut AbiReader<'_>) -> Result<Option<Value>, AbiError> {
    let value = match type_name {
        "bool" => Value::Bool(r.read_bool()?),
        "int8" => Value::from(r.read_i8()?),
        "uint8" => Value::from(r.read_u8()?),
        "int16" => Value::from(r.read_i16()?),
        "uint16" => Value::from(r.read_u16()?),
        "int32" => Value::from(r.read_i32()?),
        "uint32" => Value::from(r.read_u32()?),
        "int64" => wide_signed(r.read_i64()?),
        "uint64" => wide_unsigned(r.read_u64()?),
        "int128" => Value::String(r.read_i128()?.to_string()),
        "uint128" => Value::String(r.read_u128()?.to_string()),
        "varint32" => Value::from(r.read_varint32()?),
        "varuint32" => Value::from(r.read_varuint32()?),
        "float32" => float(f64::from(r.read_f32()?)),
        "float64" => float(r.read_f64()?),
        "float128" => Value::String(hex::encode(r.read_bytes(16)?)),
        "time_point" => format_millis(r.read_i64()? / 1000),
        "time_point_sec" => format_millis(i64::from(r.read_u32()?) * 1000),
        "block_timestamp_type" => format_millis(
            i64::from(r.read_u32()?) * BLOCK_INTERVAL_MS + BLOCK_TIMESTAMP_EPOCH_MS,
        ),
        "name" | "account_name" | "action_name" | "permission_name" | "table_name" | "scope_name" => {
            Value::String(r.read_name()?.to_string())
        }
        "bytes" => Value::String(hex::encode(r.read_blob()?)),
        "string" => Value::String(r.read_string()?),
        "checksum160" => Value::String(hex::encode(r.read_bytes(20)?)),
        "checksum256" | "transaction_id_type" | "block_id_type" => {
            Value::String(hex::encode(r.read_bytes(32)?))
        }
        "checksum512" => Value::String(hex::encode(r.read_bytes(64)?)),
        "public_key" => Value::String(PublicKey::unpack(r)?.to_string()),
        "signature" => Value::String(Signature::unpack(r)?.to_string()),
        "symbol" => Value::String(symbol_to_string(r.read_u64()?)),
        "symbol_code" => Value::String(symbol_code_to_string(r.read_u64()?)),
        "asset" => {
            let amount = r.read_i64()?;
            let symbol = r.read_u64()?;
            Value::String(asset_to_string(amount, symbol))
        }
        "extended_asset" => {
            let amount = r.read_i64()?;
            let symbol = r.read_u64()?;
            json!({
                "quantity": asset_to_string(amount, symbol),
                "contract": r.read_name()?.to_string(),
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}
