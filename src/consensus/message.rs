use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::crypto::{FullSignature, SigShare};
use crate::common::hashing::HashValue;
use crate::common::RequestId;

/*
    Peer messages of one round. A member that is not the leader sends its
    signature share over the essence it computed. Once the leader has a
    quorum of matching shares it broadcasts the recovered signature. Every
    message is stamped with the session id and the state index the round
    builds on, so messages of other rounds can't be mixed in.
*/

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("can't decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
    #[error("can't encode message: {0}")]
    Encode(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum MessageType {
    SignedHash = 1,
    FinalizedResult = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(code: u8) -> Result<Self, CodecError> {
        match code {
            1 => Ok(MessageType::SignedHash),
            2 => Ok(MessageType::FinalizedResult),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SignedHashMsg {
    pub session_id: u64,
    pub state_index: u32,
    pub request_id: Option<RequestId>,
    pub orig_timestamp: i64,
    pub essence_hash: HashValue,
    pub share: SigShare,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FinalizedResultMsg {
    pub session_id: u64,
    pub state_index: u32,
    pub essence_hash: HashValue,
    pub signature: FullSignature,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PeerMessage {
    SignedHash(SignedHashMsg),
    FinalizedResult(FinalizedResultMsg),
}

impl PeerMessage {
    pub fn msg_type(&self) -> MessageType {
        match self {
            PeerMessage::SignedHash(_) => MessageType::SignedHash,
            PeerMessage::FinalizedResult(_) => MessageType::FinalizedResult,
        }
    }

    pub fn session_id(&self) -> u64 {
        match self {
            PeerMessage::SignedHash(m) => m.session_id,
            PeerMessage::FinalizedResult(m) => m.session_id,
        }
    }

    pub fn state_index(&self) -> u32 {
        match self {
            PeerMessage::SignedHash(m) => m.state_index,
            PeerMessage::FinalizedResult(m) => m.state_index,
        }
    }

    pub fn encode(&self) -> Result<(MessageType, Vec<u8>), CodecError> {
        let payload = match self {
            PeerMessage::SignedHash(m) => bincode::serialize(m),
            PeerMessage::FinalizedResult(m) => bincode::serialize(m),
        }
        .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok((self.msg_type(), payload))
    }

    pub fn decode(msg_type: MessageType, payload: &[u8]) -> Result<Self, CodecError> {
        match msg_type {
            MessageType::SignedHash => bincode::deserialize(payload)
                .map(PeerMessage::SignedHash)
                .map_err(|e| CodecError::Decode {
                    what: "signed hash",
                    reason: e.to_string(),
                }),
            MessageType::FinalizedResult => bincode::deserialize(payload)
                .map(PeerMessage::FinalizedResult)
                .map_err(|e| CodecError::Decode {
                    what: "finalized result",
                    reason: e.to_string(),
                }),
        }
    }
}
