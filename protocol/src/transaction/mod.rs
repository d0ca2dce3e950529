//! # Transactions
//!
//! Value transfers between accounts, in the three shapes they take on their
//! way from a wallet into a block. See [`types`] for the layout and
//! [`signing`] for how the sender is bound to the payload.

pub mod signing;
pub mod types;

pub use types::{BlockTx, SignedTx, Tx};
