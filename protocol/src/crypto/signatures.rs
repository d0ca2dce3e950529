//! # Recoverable Signatures
//!
//! Transactions do not carry the sender's account. They carry a recoverable
//! secp256k1 signature `{v, r, s}` over a chain-stamped digest, and the
//! sender is whoever the signature recovers to.
//!
//! ## Digest
//!
//! ```text
//! digest = SHA-256( "\x19Ember Signed Message:\n" ‖ len(payload) ‖ payload )
//! ```
//!
//! The stamp keeps a wallet from being tricked into signing something that
//! is also a valid message elsewhere. The payload itself contains the chain
//! ID, so a signature is only ever valid on one chain.
//!
//! ## Recovery ID
//!
//! `v = recovery_id + 29`. The offset makes a signature from this chain
//! visibly different from raw `{0, 1}` recovery bytes.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hash::{blake3_hash, sha256};
use super::keys::{Account, KeyPair};

/// Added to the raw recovery id to form `v`.
pub const RECOVERY_ID_OFFSET: u8 = 29;

const SIGNING_STAMP: &str = "\x19Ember Signed Message:\n";

/// Errors during signing, recovery, and key handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("public key recovery failed")]
    RecoveryFailed,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("signature belongs to {recovered}, expected {expected}")]
    Mismatch { expected: Account, recovered: Account },

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid account: {0}")]
    InvalidAccount(String),
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A recoverable ECDSA signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub v: u8,
    #[serde(with = "hex::serde")]
    pub r: [u8; 32],
    #[serde(with = "hex::serde")]
    pub s: [u8; 32],
}

impl Signature {
    /// `r ‖ s ‖ v`.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    /// BLAKE3 of the signature bytes. Unique per signed transaction.
    pub fn digest(&self) -> [u8; 32] {
        blake3_hash(&self.to_bytes())
    }

    fn recovery_id(&self) -> Result<RecoveryId, SignatureError> {
        self.v
            .checked_sub(RECOVERY_ID_OFFSET)
            .and_then(RecoveryId::from_byte)
            .ok_or(SignatureError::InvalidRecoveryId(self.v))
    }

    fn to_ecdsa(&self) -> Result<EcdsaSignature, SignatureError> {
        let mut raw = [0u8; 64];
        raw[..32].copy_from_slice(&self.r);
        raw[32..].copy_from_slice(&self.s);
        EcdsaSignature::from_slice(&raw).map_err(|e| SignatureError::Malformed(e.to_string()))
    }
}

/// Builds the digest a signer commits to for `payload`.
pub fn signing_digest(payload: &[u8]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(SIGNING_STAMP.len() + 20 + payload.len());
    preimage.extend_from_slice(SIGNING_STAMP.as_bytes());
    preimage.extend_from_slice(payload.len().to_string().as_bytes());
    preimage.extend_from_slice(payload);
    sha256(&preimage)
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Anything that can produce recoverable signatures for one account.
pub trait Signer: Send + Sync {
    /// Signs a 32-byte digest.
    fn sign(&self, digest: &[u8; 32]) -> Result<Signature, SignatureError>;

    /// The account signatures from this signer recover to.
    fn account(&self) -> Account;
}

impl Signer for KeyPair {
    fn sign(&self, digest: &[u8; 32]) -> Result<Signature, SignatureError> {
        let (sig, recid) = self
            .signing_key()
            .sign_prehash_recoverable(digest)
            .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;

        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(Signature {
            v: recid.to_byte() + RECOVERY_ID_OFFSET,
            r,
            s,
        })
    }

    fn account(&self) -> Account {
        KeyPair::account(self).clone()
    }
}

/// Recovers the public key that produced `signature` over `digest`.
pub fn recover(digest: &[u8; 32], signature: &Signature) -> Result<VerifyingKey, SignatureError> {
    let recid = signature.recovery_id()?;
    let sig = signature.to_ecdsa()?;
    VerifyingKey::recover_from_prehash(digest, &sig, recid)
        .map_err(|_| SignatureError::RecoveryFailed)
}

/// Recovers the account that produced `signature` over `digest`.
pub fn recover_account(digest: &[u8; 32], signature: &Signature) -> Result<Account, SignatureError> {
    recover(digest, signature).map(|key| Account::from_verifying_key(&key))
}

/// Checks that `signature` over `digest` was made by `expected`.
pub fn verify(
    digest: &[u8; 32],
    signature: &Signature,
    expected: &Account,
) -> Result<(), SignatureError> {
    let recovered = recover_account(digest, signature)?;
    if &recovered != expected {
        return Err(SignatureError::Mismatch {
            expected: expected.clone(),
            recovered,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
