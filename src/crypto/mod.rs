//! Secret-sharing engine for sharevault
//!
//! Splits JSON values into per-node shares and recombines them.
//! Key material is fixed once per engine and never rotated.

mod encryption;
mod engine;
mod keys;
mod sharing;

pub use encryption::{open, seal};
pub use engine::{SecretSharer, ShareEngine};
pub use keys::{generate_secret_hex, KeyKind, Operation, ShareKey};
pub use sharing::{additive_combine, additive_split, xor_combine, xor_split, SUM_MODULUS};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;
