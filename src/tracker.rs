//! Account Mutation Tracker
//!
//! Applies system account creation and interface updates to the account
//! store. Runs for every action, independent of the contract filter and the
//! start block.

use tracing::debug;

use crate::abi::AbiDef;
use crate::chain::{Action, Name, NEWACCOUNT, SETABI};
use crate::schema::SchemaCache;
use crate::store::{AccountStore, StoreError};
use crate::system::{NewAccount, SetAbi};

/// What the tracker did with one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// An account record was created or refreshed
    Created(Name),
    /// An account's interface definition was replaced
    SchemaUpdated(Name),
    /// The embedded definition did not unpack; the prior one is kept
    SchemaRejected(Name),
    /// Not a tracked system action, or its payload was malformed
    Ignored,
}

/// Apply an action's effect on the account store
///
/// # Arguments
/// * `store` - The account store to update
/// * `schemas` - Cache invalidated for accounts whose definition changes
/// * `action` - The action to inspect
/// * `now` - Timestamp in milliseconds recorded on created and updated records
///
/// # Returns
/// What was done, or the store error that interrupted it
pub fn track_action<S>(
    store: &mut S,
    schemas: &mut SchemaCache,
    action: &Action,
    now: u64,
) -> Result<TrackOutcome, StoreError>
where
    S: AccountStore + ?Sized,
{
    if !action.is_system() {
        return Ok(TrackOutcome::Ignored);
    }

    if action.name == NEWACCOUNT {
        let payload = match NewAccount::unpack(&action.data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Skipping malformed newaccount: {}", e);
                return Ok(TrackOutcome::Ignored);
            }
        };
        store.create(payload.name, now)?;
        return Ok(TrackOutcome::Created(payload.name));
    }

    if action.name == SETABI {
        let payload = match SetAbi::unpack(&action.data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Skipping malformed setabi: {}", e);
                return Ok(TrackOutcome::Ignored);
            }
        };
        return update_schema(store, schemas, payload, now);
    }

    Ok(TrackOutcome::Ignored)
}

fn update_schema<S>(
    store: &mut S,
    schemas: &mut SchemaCache,
    payload: SetAbi,
    now: u64,
) -> Result<TrackOutcome, StoreError>
where
    S: AccountStore + ?Sized,
{
    let account = payload.account;
    if store.find(account)?.is_none() {
        store.create(account, now)?;
    }

    let abi = match AbiDef::unpack(&payload.abi) {
        Ok(abi) => abi,
        Err(e) => {
            debug!(%account, "Interface definition did not unpack: {}", e);
            return Ok(TrackOutcome::SchemaRejected(account));
        }
    };

    store.set_abi(account, serde_json::to_value(&abi)?, now)?;
    schemas.invalidate(account);
    Ok(TrackOutcome::SchemaUpdated(account))
}
