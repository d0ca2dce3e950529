//! # Cryptographic Primitives for Ember
//!
//! Everything that signs, recovers, or hashes flows through here:
//!
//! - **secp256k1 recoverable ECDSA** for transaction signatures, so the
//!   sender never has to be stated, only recovered.
//! - **BLAKE3** for content hashes and the proof-of-work puzzle.
//! - **SHA-256** for the signing digest, **Keccak-256** for accounts.
//!
//! Thin wrappers over `k256`, `sha2`, `sha3`, and `blake3`. Nothing here is
//! home-grown math.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{blake3_hash, keccak256, leading_zero_nibbles, sha256, to_hex_prefixed};
pub use keys::{Account, KeyPair};
pub use signatures::{
    recover, recover_account, signing_digest, verify, Signature, SignatureError, Signer,
};
