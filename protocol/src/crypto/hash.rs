//! # Hashing Utilities
//!
//! Three hash functions, each with one job:
//!
//! - **BLAKE3** — content addressing: block hashes, Merkle nodes,
//!   transaction unique keys. Also the PoW puzzle.
//! - **SHA-256** — the chain-stamped digest a wallet signs.
//! - **Keccak-256** — account derivation from a secp256k1 public key, so
//!   addresses look like the 20-byte hex accounts every wallet already knows.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Compute the BLAKE3 hash of the input data.
///
/// # Example
///
/// ```
/// use ember_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"ember");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Compute BLAKE3 over several slices without concatenating them first.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Compute the SHA-256 hash of the input data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the Keccak-256 hash (the pre-standard SHA-3 variant).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Hex-encode bytes with a `0x` prefix.
pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Number of leading zero hex nibbles in `hash`.
pub fn leading_zero_nibbles(hash: &[u8; 32]) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 2;
            continue;
        }
        if byte >> 4 == 0 {
            count += 1;
        }
        break;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc") from FIPS 180-2.
        let hash = sha256(b"abc");
        assert_eq!(
            hex::encode(hash),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn keccak256_known_vector() {
        // Keccak-256 of the empty string, as used by Ethereum.
        let hash = keccak256(b"");
        assert_eq!(
            hex::encode(hash),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn blake3_multi_matches_concatenation() {
        let joined = blake3_hash(b"helloworld");
        let parts = blake3_hash_multi(&[b"hello".as_slice(), b"world".as_slice()]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn counts_leading_zero_nibbles() {
        let mut hash = [0xffu8; 32];
        assert_eq!(leading_zero_nibbles(&hash), 0);

        hash[0] = 0x0f;
        assert_eq!(leading_zero_nibbles(&hash), 1);

        hash[0] = 0x00;
        hash[1] = 0x0a;
        assert_eq!(leading_zero_nibbles(&hash), 3);

        assert_eq!(leading_zero_nibbles(&[0u8; 32]), 64);
    }

    #[test]
    fn hex_prefix() {
        assert_eq!(to_hex_prefixed(&[0xde, 0xad]), "0xdead");
    }
}
