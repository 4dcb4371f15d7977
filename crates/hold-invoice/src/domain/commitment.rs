//! Commitment entity
//!
//! A hold invoice is locked to `sha256(secret)`. The node only learns the
//! secret when the service decides to settle, and any party holding the
//! secret can prove it matches the commitment.

use std::fmt;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length in bytes of a secret and of its commitment hash
pub const SECRET_LEN: usize = 32;

/// Error decoding a hex-encoded 32-byte value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexValueError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

fn decode_fixed(input: &str) -> Result<[u8; SECRET_LEN], HexValueError> {
    let bytes =
        hex::decode(input.trim()).map_err(|e| HexValueError::InvalidHex(e.to_string()))?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| HexValueError::InvalidLength {
        expected: SECRET_LEN,
        actual,
    })
}

/// 32-byte payment secret (preimage)
///
/// `Debug` never prints the bytes; use [`Preimage::to_hex`] where the secret
/// must actually leave the process.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Preimage([u8; SECRET_LEN]);

impl Preimage {
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(input: &str) -> Result<Self, HexValueError> {
        decode_fixed(input).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The commitment this secret unlocks
    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash(Sha256::digest(self.0).into())
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Preimage(<redacted>)")
    }
}

impl From<Preimage> for String {
    fn from(value: Preimage) -> Self {
        value.to_hex()
    }
}

impl TryFrom<String> for Preimage {
    type Error = HexValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// `sha256(secret)`, the value a hold invoice is locked to
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PaymentHash([u8; SECRET_LEN]);

impl PaymentHash {
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(input: &str) -> Result<Self, HexValueError> {
        decode_fixed(input).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check a candidate secret against this commitment in constant time
    pub fn matches(&self, secret: &Preimage) -> bool {
        let candidate = secret.payment_hash();
        self.0.ct_eq(&candidate.0).into()
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({})", self.to_hex())
    }
}

impl From<PaymentHash> for String {
    fn from(value: PaymentHash) -> Self {
        value.to_hex()
    }
}

impl TryFrom<String> for PaymentHash {
    type Error = HexValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// A freshly generated secret together with its hash
#[derive(Clone, Debug)]
pub struct Commitment {
    pub secret: Preimage,
    pub hash: PaymentHash,
}

impl Commitment {
    pub fn from_secret(secret: Preimage) -> Self {
        let hash = secret.payment_hash();
        Self { secret, hash }
    }

    /// Draw 32 bytes from `rng`.
    ///
    /// Entropy failures are returned, never replaced with a weaker source.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, rand::Error> {
        let mut bytes = [0u8; SECRET_LEN];
        rng.try_fill_bytes(&mut bytes)?;
        Ok(Self::from_secret(Preimage::from_bytes(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_hash_is_sha256_of_secret() {
        let secret = Preimage::from_bytes([7u8; 32]);
        let expected: [u8; 32] = Sha256::digest([7u8; 32]).into();
        assert_eq!(secret.payment_hash().as_bytes(), &expected);
    }

    #[test]
    fn test_generated_commitments_are_distinct() {
        let a = Commitment::generate(&mut OsRng).unwrap();
        let b = Commitment::generate(&mut OsRng).unwrap();
        assert_ne!(a.secret, b.secret);
        assert!(a.hash.matches(&a.secret));
        assert!(!a.hash.matches(&b.secret));
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        let err = Preimage::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            HexValueError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        let input = "zz".repeat(32);
        assert!(matches!(
            PaymentHash::from_hex(&input),
            Err(HexValueError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let secret = Preimage::from_bytes([0xab; 32]);
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("abab"));
    }

    #[test]
    fn test_serde_uses_hex_strings() {
        let secret = Preimage::from_bytes([1u8; 32]);
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));

        let parsed: PaymentHash =
            serde_json::from_str(&format!("\"{}\"", secret.payment_hash())).unwrap();
        assert_eq!(parsed, secret.payment_hash());
    }

    proptest! {
        #[test]
        fn prop_only_the_committed_secret_matches(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let committed = Preimage::from_bytes(a);
            let other = Preimage::from_bytes(b);
            let hash = committed.payment_hash();
            prop_assert!(hash.matches(&committed));
            prop_assert_eq!(hash.matches(&other), a == b);
        }
    }
}
