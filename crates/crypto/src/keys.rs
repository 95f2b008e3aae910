//! Ed25519 key handles and subject key identifiers.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use zeroize::Zeroize;

/// Errors raised by key handling and signature checks.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key material: {reason}")]
    InvalidKey { reason: String },

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Stable identifier of a public key: BLAKE3 of the key bytes, first 16 bytes as hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectKeyId(String);

impl SubjectKeyId {
    pub fn of(public_key: &PublicKey) -> Self {
        let hash = blake3::hash(&public_key.0);
        Self(hex::encode(&hash.as_bytes()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ed25519 public key, hex-encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey {
            reason: format!("public key must be 32 bytes, got {}", bytes.len()),
        })?;
        VerifyingKey::from_bytes(&array).map_err(|e| CryptoError::InvalidKey {
            reason: e.to_string(),
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn key_id(&self) -> SubjectKeyId {
        SubjectKeyId::of(self)
    }

    /// Check an Ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|e| CryptoError::InvalidKey {
            reason: e.to_string(),
        })?;
        let signature =
            DalekSignature::from_slice(signature).map_err(|_| CryptoError::BadSignature)?;
        key.verify(message, &signature)
            .map_err(|_| CryptoError::BadSignature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text).map_err(serde::de::Error::custom)?;
        PublicKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Handle to a local Ed25519 private key.
///
/// The secret never leaves the handle; callers only get signatures and the
/// public half.
#[derive(Clone)]
pub struct PrivateKeyHandle {
    signing_key: SigningKey,
    public_key: PublicKey,
    key_id: SubjectKeyId,
}

impl PrivateKeyHandle {
    /// Generate a fresh key from the thread RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let handle = Self::from_seed_array(&seed);
        seed.zeroize();
        handle
    }

    /// Build a key from a 32-byte seed. The caller's copy is not touched.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() != 32 {
            return Err(CryptoError::InvalidKey {
                reason: format!("Invalid key length: {} (expected 32)", seed.len()),
            });
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(seed);
        let handle = Self::from_seed_array(&array);
        array.zeroize();
        Ok(handle)
    }

    fn from_seed_array(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let public_key = PublicKey(signing_key.verifying_key().to_bytes());
        let key_id = public_key.key_id();
        Self {
            signing_key,
            public_key,
            key_id,
        }
    }

    /// Parse a hex-encoded seed as stored in `*.key` files.
    pub fn from_hex(text: &str) -> Result<Self> {
        let mut bytes = hex::decode(text.trim()).map_err(|e| CryptoError::InvalidKey {
            reason: e.to_string(),
        })?;
        let handle = Self::from_seed(&bytes);
        bytes.zeroize();
        handle
    }

    /// Hex seed suitable for writing a `*.key` file.
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn key_id(&self) -> &SubjectKeyId {
        &self.key_id
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for PrivateKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyHandle")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Load every `*.key` file in `dir`, ordered by file name.
///
/// The position in the returned vector is the key index used for
/// tie-breaking during signer selection.
pub fn load_key_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<PrivateKeyHandle>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("key") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut keys = Vec::with_capacity(paths.len());
    for path in paths {
        let mut text = std::fs::read_to_string(&path)?;
        let key = PrivateKeyHandle::from_hex(&text).map_err(|e| CryptoError::InvalidKey {
            reason: format!("{}: {}", path.display(), e),
        });
        text.zeroize();
        keys.push(key?);
    }
    tracing::debug!(dir = %dir.as_ref().display(), count = keys.len(), "loaded private keys");
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = PrivateKeyHandle::generate();
        let sig = key.sign(b"reachability");
        assert_eq!(sig.len(), 64);
        assert!(key.public_key().verify(b"reachability", &sig).is_ok());
        assert!(key.public_key().verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn test_key_id_is_stable() {
        let key = PrivateKeyHandle::from_seed(&[7u8; 32]).unwrap();
        let again = PrivateKeyHandle::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.key_id(), again.key_id());
        assert_eq!(key.key_id().as_str().len(), 32);
    }

    #[test]
    fn test_reject_short_seed() {
        assert!(PrivateKeyHandle::from_seed(&[1u8; 16]).is_err());
        assert!(PrivateKeyHandle::from_hex("zz").is_err());
    }

    #[test]
    fn test_public_key_serde_hex() {
        let key = PrivateKeyHandle::generate();
        let json = serde_json::to_string(&key.public_key()).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key.public_key());
    }

    #[test]
    fn test_load_key_dir_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = PrivateKeyHandle::from_seed(&[1u8; 32]).unwrap();
        let second = PrivateKeyHandle::from_seed(&[2u8; 32]).unwrap();
        std::fs::write(dir.path().join("b.key"), second.to_hex()).unwrap();
        std::fs::write(dir.path().join("a.key"), format!("{}\n", first.to_hex())).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let keys = load_key_dir(dir.path()).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].key_id(), first.key_id());
        assert_eq!(keys[1].key_id(), second.key_id());
    }
}
