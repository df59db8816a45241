/*
    Persisted layout.

    The database is partitioned by a one byte object-type prefix. Chain state
    variables live under `OBJECT_TYPE_STATE_VARIABLE`; the latest committed
    state hash and the applied blocks have their own partitions.
*/

use crate::common::hashing::HashValue;
use crate::kv::KvRead;

use super::StateError;

pub const OBJECT_TYPE_STATE_HASH: u8 = 4;
pub const OBJECT_TYPE_BLOCK: u8 = 5;
pub const OBJECT_TYPE_STATE_VARIABLE: u8 = 6;

/// Reserved state variable keys. Contract keys are always namespaced by a
/// four byte hname, so one byte keys cannot collide with them.
pub const KEY_BLOCK_INDEX: &[u8] = b"#";
pub const KEY_TIMESTAMP: &[u8] = b"T";
pub const KEY_PREV_STATE_HASH: &[u8] = b"H";

pub fn make_key(object_type: u8, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + suffix.len());
    key.push(object_type);
    key.extend_from_slice(suffix);
    key
}

pub fn state_hash_key() -> Vec<u8> {
    make_key(OBJECT_TYPE_STATE_HASH, &[])
}

pub fn block_key(index: u32) -> Vec<u8> {
    make_key(OBJECT_TYPE_BLOCK, &index.to_be_bytes())
}

pub(crate) fn load_block_index<R>(state: &R) -> Result<u32, StateError>
where
    R: KvRead<Error = StateError> + ?Sized,
{
    let index = state
        .get_u64(KEY_BLOCK_INDEX)?
        .ok_or(StateError::NotFound("block index"))?;
    u32::try_from(index)
        .map_err(|_| StateError::Consistency(format!("wrong state index value {}", index)))
}

pub(crate) fn load_timestamp<R>(state: &R) -> Result<i64, StateError>
where
    R: KvRead<Error = StateError> + ?Sized,
{
    state
        .get_i64(KEY_TIMESTAMP)?
        .ok_or(StateError::NotFound("timestamp"))
}

pub(crate) fn load_prev_state_hash<R>(state: &R) -> Result<HashValue, StateError>
where
    R: KvRead<Error = StateError> + ?Sized,
{
    state
        .get_hash(KEY_PREV_STATE_HASH)?
        .ok_or(StateError::NotFound("previous state hash"))
}
