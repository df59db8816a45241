use std::collections::BTreeMap;

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::PeerIndex;

/*
    Key shares and the threshold signer seam. The consensus core only ever
    sees `ThresholdSigner`: it asks for a share over essence bytes, forwards
    shares, and asks for recovery once it has counted enough matching ones.

    `Ed25519ShareSigner` is a t-of-n multisignature: every member signs with
    its own ed25519 key and the full signature is the index-ordered set of at
    least `threshold` distinct verified shares.
*/

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("peer #{0} is not a committee member")]
    UnknownSigner(PeerIndex),
    #[error("signature share of peer #{0} failed verification")]
    InvalidShare(PeerIndex),
    #[error("malformed signature bytes from peer #{0}")]
    Malformed(PeerIndex),
    #[error("not enough distinct shares: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },
    #[error("invalid public key for peer #{0}")]
    InvalidPubkey(PeerIndex),
}

pub struct Keypair {
    pubkey: Pubkey,
    dalek_signer: SigningKey,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Pubkey {
    pub key: [u8; 32],
}

/// One member's partial signature over essence bytes.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SigShare {
    pub peer_index: PeerIndex,
    pub sig: Vec<u8>,
}

/// The recovered committee signature.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FullSignature {
    pub shares: Vec<SigShare>,
}

pub trait ThresholdSigner: Send + Sync {
    fn own_index(&self) -> PeerIndex;

    fn sign_share(&self, data: &[u8]) -> Result<SigShare, SignerError>;

    fn verify_share(&self, share: &SigShare, data: &[u8]) -> Result<(), SignerError>;

    fn recover_full_signature(
        &self,
        shares: &[SigShare],
        data: &[u8],
    ) -> Result<FullSignature, SignerError>;

    fn verify_full_signature(&self, signature: &FullSignature, data: &[u8]) -> Result<(), SignerError>;
}

impl Keypair {
    pub fn new_pair() -> Self {
        let mut csprng = OsRng;
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    /// Deterministic key material, for local committees and tests.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(dalek_signer: SigningKey) -> Self {
        let pubkey = Pubkey::from(&dalek_signer.verifying_key().to_bytes());
        Keypair {
            pubkey,
            dalek_signer,
        }
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.dalek_signer.sign(data).to_bytes()
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey.clone()
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.key
    }
}

impl From<&[u8; 32]> for Pubkey {
    fn from(bytes: &[u8; 32]) -> Self {
        Pubkey { key: *bytes }
    }
}

impl Pubkey {
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        let key: [u8; 32] = bytes.try_into().ok()?;
        Some(Pubkey { key })
    }

    fn verify(&self, data: &[u8], sig: &[u8], peer: PeerIndex) -> Result<(), SignerError> {
        let sig: [u8; 64] = sig.try_into().map_err(|_| SignerError::Malformed(peer))?;
        let dalek_sig = DalekSignature::from_bytes(&sig);
        let dalek_pubkey =
            VerifyingKey::from_bytes(&self.key).map_err(|_| SignerError::InvalidPubkey(peer))?;
        dalek_pubkey
            .verify_strict(data, &dalek_sig)
            .map_err(|_| SignerError::InvalidShare(peer))
    }
}

pub struct Ed25519ShareSigner {
    own_index: PeerIndex,
    keypair: Keypair,
    members: BTreeMap<PeerIndex, Pubkey>,
    threshold: usize,
}

impl Ed25519ShareSigner {
    pub fn new(
        own_index: PeerIndex,
        keypair: Keypair,
        members: BTreeMap<PeerIndex, Pubkey>,
        threshold: usize,
    ) -> Self {
        Ed25519ShareSigner {
            own_index,
            keypair,
            members,
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn member(&self, index: PeerIndex) -> Result<&Pubkey, SignerError> {
        self.members
            .get(&index)
            .ok_or(SignerError::UnknownSigner(index))
    }

    /// Keeps the first verified share per member, ordered by peer index.
    fn distinct_verified(&self, shares: &[SigShare], data: &[u8]) -> Result<Vec<SigShare>, SignerError> {
        let mut distinct: BTreeMap<PeerIndex, SigShare> = BTreeMap::new();
        for share in shares {
            if distinct.contains_key(&share.peer_index) {
                continue;
            }
            self.verify_share(share, data)?;
            distinct.insert(share.peer_index, share.clone());
        }
        Ok(distinct.into_values().collect())
    }
}

impl ThresholdSigner for Ed25519ShareSigner {
    fn own_index(&self) -> PeerIndex {
        self.own_index
    }

    fn sign_share(&self, data: &[u8]) -> Result<SigShare, SignerError> {
        self.member(self.own_index)?;
        Ok(SigShare {
            peer_index: self.own_index,
            sig: self.keypair.sign(data).to_vec(),
        })
    }

    fn verify_share(&self, share: &SigShare, data: &[u8]) -> Result<(), SignerError> {
        self.member(share.peer_index)?
            .verify(data, &share.sig, share.peer_index)
    }

    fn recover_full_signature(
        &self,
        shares: &[SigShare],
        data: &[u8],
    ) -> Result<FullSignature, SignerError> {
        let shares = self.distinct_verified(shares, data)?;
        if shares.len() < self.threshold {
            return Err(SignerError::NotEnoughShares {
                have: shares.len(),
                need: self.threshold,
            });
        }
        Ok(FullSignature { shares })
    }

    fn verify_full_signature(&self, signature: &FullSignature, data: &[u8]) -> Result<(), SignerError> {
        let shares = self.distinct_verified(&signature.shares, data)?;
        if shares.len() < self.threshold {
            return Err(SignerError::NotEnoughShares {
                have: shares.len(),
                need: self.threshold,
            });
        }
        Ok(())
    }
}
