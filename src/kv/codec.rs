/*
    Fixed-width value encodings and typed accessors over key/value views.

    Integers are 8 bytes little endian, hashes are 32 raw bytes, strings are
    raw UTF-8. Missing keys decode to `None`; malformed values are errors.
*/

use thiserror::Error;

use crate::common::hashing::{HashValue, HASH_SIZE};
use crate::common::{AgentId, Hname};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot decode {what}: {reason}")]
pub struct DecodeError {
    pub what: &'static str,
    pub reason: String,
}

impl DecodeError {
    fn width(what: &'static str, want: usize, got: usize) -> Self {
        DecodeError {
            what,
            reason: format!("expected {} bytes, got {}", want, got),
        }
    }
}

pub fn encode_u64(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

pub fn decode_u64(bytes: &[u8]) -> Result<u64, DecodeError> {
    let fixed: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DecodeError::width("u64", 8, bytes.len()))?;
    Ok(u64::from_le_bytes(fixed))
}

pub fn encode_i64(value: i64) -> [u8; 8] {
    value.to_le_bytes()
}

pub fn decode_i64(bytes: &[u8]) -> Result<i64, DecodeError> {
    let fixed: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DecodeError::width("i64", 8, bytes.len()))?;
    Ok(i64::from_le_bytes(fixed))
}

pub fn decode_hash(bytes: &[u8]) -> Result<HashValue, DecodeError> {
    HashValue::from_bytes(bytes).ok_or_else(|| DecodeError::width("hash", HASH_SIZE, bytes.len()))
}

pub fn decode_hname(bytes: &[u8]) -> Result<Hname, DecodeError> {
    let fixed: [u8; 4] = bytes
        .try_into()
        .map_err(|_| DecodeError::width("hname", 4, bytes.len()))?;
    Ok(Hname(u32::from_le_bytes(fixed)))
}

pub fn decode_string(bytes: &[u8]) -> Result<String, DecodeError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError {
        what: "string",
        reason: e.to_string(),
    })
}

pub trait KvRead {
    type Error: From<DecodeError>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error>;

    fn has(&self, key: &[u8]) -> Result<bool, Self::Error> {
        Ok(self.get(key)?.is_some())
    }

    fn get_u64(&self, key: &[u8]) -> Result<Option<u64>, Self::Error> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(decode_u64(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_i64(&self, key: &[u8]) -> Result<Option<i64>, Self::Error> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(decode_i64(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_hash(&self, key: &[u8]) -> Result<Option<HashValue>, Self::Error> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(decode_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_string(&self, key: &[u8]) -> Result<Option<String>, Self::Error> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(decode_string(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_hname(&self, key: &[u8]) -> Result<Option<Hname>, Self::Error> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(decode_hname(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_agent_id(&self, key: &[u8]) -> Result<Option<AgentId>, Self::Error> {
        Ok(self.get_hash(key)?.map(AgentId))
    }
}

pub trait KvWrite {
    fn set(&mut self, key: &[u8], value: &[u8]);

    fn del(&mut self, key: &[u8]);

    fn set_u64(&mut self, key: &[u8], value: u64) {
        self.set(key, &encode_u64(value));
    }

    fn set_i64(&mut self, key: &[u8], value: i64) {
        self.set(key, &encode_i64(value));
    }

    fn set_hash(&mut self, key: &[u8], value: &HashValue) {
        self.set(key, value.as_ref());
    }

    fn set_string(&mut self, key: &[u8], value: &str) {
        self.set(key, value.as_bytes());
    }

    fn set_hname(&mut self, key: &[u8], value: Hname) {
        self.set(key, &value.to_bytes());
    }

    fn set_agent_id(&mut self, key: &[u8], value: &AgentId) {
        self.set_hash(key, &value.0);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[derive(Default)]
    struct MapView(BTreeMap<Vec<u8>, Vec<u8>>);

    impl KvRead for MapView {
        type Error = DecodeError;

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
            Ok(self.0.get(key).cloned())
        }
    }

    impl KvWrite for MapView {
        fn set(&mut self, key: &[u8], value: &[u8]) {
            self.0.insert(key.to_vec(), value.to_vec());
        }

        fn del(&mut self, key: &[u8]) {
            self.0.remove(key);
        }
    }

    #[test]
    fn test_typed_accessors() {
        let mut view = MapView::default();
        view.set_u64(b"n", 42);
        view.set_i64(b"t", -7);
        view.set_string(b"s", "hello");
        view.set_hash(b"h", &HashValue([9u8; 32]));
        view.set_hname(b"c", Hname(0xdead));

        assert_eq!(view.get_u64(b"n").unwrap(), Some(42));
        assert_eq!(view.get_i64(b"t").unwrap(), Some(-7));
        assert_eq!(view.get_string(b"s").unwrap().as_deref(), Some("hello"));
        assert_eq!(view.get_hash(b"h").unwrap(), Some(HashValue([9u8; 32])));
        assert_eq!(view.get_hname(b"c").unwrap(), Some(Hname(0xdead)));
        assert_eq!(view.get_agent_id(b"h").unwrap(), Some(AgentId(HashValue([9u8; 32]))));
        assert_eq!(view.get_u64(b"missing").unwrap(), None);
    }

    #[test]
    fn test_malformed_value_is_an_error_not_missing() {
        let mut view = MapView::default();
        view.set(b"n", &[1, 2, 3]);
        assert!(view.get_u64(b"n").is_err());
        assert!(view.get_hash(b"n").is_err());
    }
}
