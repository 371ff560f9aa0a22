//! Action Decoder
//!
//! Turns one raw action into the payload stored in its document. System
//! account creation and interface updates decode from their fixed shapes;
//! everything else goes through the account's interface definition. Any
//! failure falls back to the lowercase hex of the raw payload.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::abi::{AbiDef, AbiError};
use crate::chain::{Action, Name, NEWACCOUNT, ONBLOCK, SETABI};
use crate::schema::{Schema, SchemaCache};
use crate::store::AccountStore;
use crate::system::{NewAccount, SetAbi};
use crate::writer::ActionPayload;

/// Reasons a payload could not be decoded
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("No usable interface definition for account {0}")]
    NoSchema(Name),

    #[error("Failed to decode payload: {0}")]
    Abi(#[from] AbiError),
}

/// Decode an action's payload, falling back to hex
///
/// # Arguments
/// * `action` - The action to decode
/// * `store` - Account store consulted for the contract's definition
/// * `schemas` - Cache of resolved definitions
///
/// # Returns
/// `ActionPayload::Data` on success, `ActionPayload::HexData` otherwise
pub fn decode_action<S>(action: &Action, store: &mut S, schemas: &mut SchemaCache) -> ActionPayload
where
    S: AccountStore + ?Sized,
{
    match try_decode(action, store, schemas) {
        Ok(value) => ActionPayload::Data(value),
        Err(e) => {
            if action.name != ONBLOCK {
                debug!(
                    account = %action.account,
                    action = %action.name,
                    "Falling back to hex data: {}", e
                );
            }
            ActionPayload::hex(&action.data)
        }
    }
}

/// Decode an action's payload without fallback
pub fn try_decode<S>(action: &Action, store: &mut S, schemas: &mut SchemaCache) -> Result<Value, DecodeError>
where
    S: AccountStore + ?Sized,
{
    if action.is_system() {
        if action.name == NEWACCOUNT {
            return decode_newaccount(&action.data);
        }
        if action.name == SETABI {
            return decode_setabi(&action.data);
        }
    }

    match schemas.resolve(store, action.account) {
        Schema::Known(serializer) => Ok(serializer.action_to_json(action.name, &action.data)?),
        Schema::Unknown => Err(DecodeError::NoSchema(action.account)),
    }
}

/// Decode a system `newaccount` payload
pub fn decode_newaccount(data: &[u8]) -> Result<Value, DecodeError> {
    let payload = NewAccount::unpack(data)?;
    Ok(serde_json::to_value(payload).map_err(AbiError::from)?)
}

/// Decode a system `setabi` payload as `{account, abi_def}`
pub fn decode_setabi(data: &[u8]) -> Result<Value, DecodeError> {
    let payload = SetAbi::unpack(data)?;
    let abi_def = AbiDef::unpack(&payload.abi)?;
    Ok(json!({
        "account": payload.account,
        "abi_def": serde_json::to_value(abi_def).map_err(AbiError::from)?,
    }))
}
