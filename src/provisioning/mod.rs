//! Credential provisioning for the pub/sub session
//!
//! This module handles:
//! - Looking up the client certificate in the local keystore
//! - Issuing a new key pair and certificate when none is stored
//! - Attaching the access policy to a new certificate
//! - Persisting the result under a fixed alias so later runs reuse it

mod credential;
pub mod issuer;
mod provisioner;
pub mod store;

pub use credential::Credential;
pub use issuer::SimulatedIssuer;
pub use provisioner::{CredentialProvisioner, ProvisioningError};
pub use store::{FileKeyStore, MemoryKeyStore};
