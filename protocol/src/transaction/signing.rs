//! Signing and sender recovery.
//!
//! A wallet calls [`Tx::sign`]; a node calls [`SignedTx::from_account`].
//! Recovery is the expensive half, so its result is cached on the signed
//! transaction and travels with clones.

use crate::crypto::keys::Account;
use crate::crypto::signatures::{recover_account, signing_digest, SignatureError, Signer};

use super::types::{BlockTx, SignedTx, Tx};

impl Tx {
    /// Digest the sender signs.
    pub fn digest(&self) -> [u8; 32] {
        signing_digest(&self.canonical_bytes())
    }

    /// Signs the transaction with `signer`.
    pub fn sign(self, signer: &dyn Signer) -> Result<SignedTx, SignatureError> {
        let signature = signer.sign(&self.digest())?;
        let signed = SignedTx::new(self, signature);
        // Prime the cache; the signer knows who it is.
        let _ = signed.from.set(signer.account());
        Ok(signed)
    }
}

impl SignedTx {
    /// The account that signed this transaction.
    pub fn from_account(&self) -> Result<Account, SignatureError> {
        if let Some(account) = self.from.get() {
            return Ok(account.clone());
        }
        let account = recover_account(&self.tx.digest(), &self.signature)?;
        let _ = self.from.set(account.clone());
        Ok(account)
    }
}

impl BlockTx {
    pub fn from_account(&self) -> Result<Account, SignatureError> {
        self.signed.from_account()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;

    fn transfer(to: &Account, nonce: u64) -> Tx {
        Tx {
            chain_id: 1,
            nonce,
            to: to.clone(),
            value: 100,
            tip: 5,
            data: Vec::new(),
        }
    }

    #[test]
    fn signed_tx_recovers_sender() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let signed = transfer(bob.account(), 1).sign(&alice).unwrap();
        assert_eq!(&signed.from_account().unwrap(), alice.account());
    }

    #[test]
    fn recovery_survives_serialization() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let signed = transfer(bob.account(), 1).sign(&alice).unwrap();

        // The cache is not serialized; the receiver must recover from scratch.
        let json = serde_json::to_string(&signed).unwrap();
        let received: SignedTx = serde_json::from_str(&json).unwrap();
        assert!(received.from.get().is_none());
        assert_eq!(&received.from_account().unwrap(), alice.account());
        assert_eq!(received, signed);
    }

    #[test]
    fn tampered_value_changes_sender() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let signed = transfer(bob.account(), 1).sign(&alice).unwrap();

        let mut forged = SignedTx::new(signed.tx.clone(), signed.signature);
        forged.tx.value = 1_000_000;
        match forged.from_account() {
            Ok(account) => assert_ne!(&account, alice.account()),
            Err(_) => {}
        }
    }

    #[test]
    fn chain_id_is_part_of_digest() {
        let bob = KeyPair::generate();
        let mut other_chain = transfer(bob.account(), 1);
        other_chain.chain_id = 2;
        assert_ne!(transfer(bob.account(), 1).digest(), other_chain.digest());
    }

    #[test]
    fn block_tx_fee_is_gas_plus_tip() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let signed = transfer(bob.account(), 1).sign(&alice).unwrap();
        let tx = BlockTx::new(signed, 10, 2);
        assert_eq!(tx.gas(), 20);
        assert_eq!(tx.fee(), 25);
        assert_eq!(tx.unique_key().len(), 64);
    }
}
