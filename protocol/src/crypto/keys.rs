//! # Keys and Accounts
//!
//! An [`Account`] is the public identity that holds a balance: `0x` followed
//! by the last 20 bytes of the Keccak-256 hash of the uncompressed secp256k1
//! public key. A [`KeyPair`] owns the private half and can derive its account.
//!
//! ```text
//! SigningKey ──► VerifyingKey ──► 0x04 ‖ X ‖ Y ──► keccak256(X ‖ Y)[12..] ──► 0x…
//! ```

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use super::hash::keccak256;
use super::signatures::SignatureError;

/// Length in bytes of the hash suffix an account is built from.
pub const ACCOUNT_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A hex-encoded account identity, always lowercase with a `0x` prefix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account(String);

impl Account {
    /// Derives the account of a public key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        // Skip the 0x04 SEC1 tag; hash only the coordinates.
        let digest = keccak256(&point.as_bytes()[1..]);
        Account(format!(
            "0x{}",
            hex::encode(&digest[32 - ACCOUNT_LENGTH..])
        ))
    }

    /// The all-zero account. Beneficiary of the genesis placeholder block.
    pub fn zero() -> Self {
        Account(format!("0x{}", "0".repeat(ACCOUNT_LENGTH * 2)))
    }

    /// Parses and normalizes a textual account.
    pub fn parse(s: &str) -> Result<Self, SignatureError> {
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| SignatureError::InvalidAccount(s.to_string()))?;

        if body.len() != ACCOUNT_LENGTH * 2 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SignatureError::InvalidAccount(s.to_string()));
        }

        Ok(Account(format!("0x{}", body.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Account {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Account::parse(s)
    }
}

impl TryFrom<String> for Account {
    type Error = SignatureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Account::parse(&value)
    }
}

impl From<Account> for String {
    fn from(account: Account) -> Self {
        account.0
    }
}

impl AsRef<str> for Account {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// A secp256k1 private key together with its derived account.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
    account: Account,
}

impl KeyPair {
    /// Generates a fresh key from the operating system's CSPRNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Builds a key pair from 32 raw scalar bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let signing =
            SigningKey::from_slice(bytes).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Ok(Self::from_signing_key(signing))
    }

    /// Builds a key pair from a hex scalar, with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self, SignatureError> {
        let body = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(body).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let account = Account::from_verifying_key(signing.verifying_key());
        Self { signing, account }
    }

    /// Hex encoding of the private scalar. Handle with care.
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing.verifying_key()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
