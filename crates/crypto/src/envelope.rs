//! Detachable signatures and signed envelopes.
//!
//! An envelope is an opaque blob plus a signature over exactly that blob.
//! Envelopes nest: a blob may itself decode to another envelope.

use crate::keys::{CryptoError, PrivateKeyHandle, PublicKey, Result, SubjectKeyId};
use mapmesh_core::DomainId;
use serde::{Deserialize, Serialize};

/// Signature metadata plus the raw Ed25519 value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Domain whose certificate chain vouches for the key
    pub signer: DomainId,
    /// Key the signature was produced with
    pub subject_key_id: SubjectKeyId,
    /// Serial of the root of trust the signer's chain was validated against
    pub root_serial: u64,
    /// Unix seconds
    pub created_at: u64,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

impl Signature {
    /// Sign `blob` with `key`.
    pub fn create(
        key: &PrivateKeyHandle,
        signer: DomainId,
        root_serial: u64,
        created_at: u64,
        blob: &[u8],
    ) -> Self {
        Self {
            signer,
            subject_key_id: key.key_id().clone(),
            root_serial,
            created_at,
            value: key.sign(blob),
        }
    }

    /// Check the raw value against a public key. Chain validation is the
    /// caller's job.
    pub fn verify_raw(&self, public_key: &PublicKey, blob: &[u8]) -> Result<()> {
        public_key.verify(blob, &self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    #[serde(with = "hex_bytes")]
    pub blob: Vec<u8>,
    pub signature: Signature,
}

impl SignedEnvelope {
    pub fn new(blob: Vec<u8>, signature: Signature) -> Self {
        Self { blob, signature }
    }

    /// Domain that claims to have signed this envelope.
    pub fn signer(&self) -> DomainId {
        self.signature.signer
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Serialization {
            reason: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CryptoError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Hex of the first 16 bytes of the BLAKE3 hash of the encoded envelope.
    pub fn content_id(&self) -> Result<String> {
        let bytes = self.to_bytes()?;
        let hash = blake3::hash(&bytes);
        Ok(hex::encode(&hash.as_bytes()[..16]))
    }
}

/// Serde adapter encoding byte vectors as lowercase hex strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}
