//! sharevault - secret-sharing overlay for record storage nodes
//!
//! Records are written to every node of a cluster. Fields marked
//! `{"%allot": value}` are split into shares so that no single node holds
//! the plaintext; reads collect the shares back from all nodes and
//! recombine them.

pub mod allot;
pub mod client;
pub mod cluster;
pub mod config;
pub mod crypto;
pub mod error;
pub mod registry;
pub mod unify;

pub use client::VaultClient;
pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::allot::{prepare_and_allot, ALLOT_MARKER, SHARE_TAG};
    pub use crate::client::VaultClient;
    pub use crate::cluster::{FanOut, NodeDescriptor, NodeFailure, NodeOutcome};
    pub use crate::config::Config;
    pub use crate::crypto::{SecretSharer, ShareEngine};
    pub use crate::error::{Error, Result};
    pub use crate::registry::ClusterRegistry;
    pub use crate::unify::Reassembly;
}
