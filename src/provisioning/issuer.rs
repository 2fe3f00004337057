//! Remote certificate issuance
//!
//! Two logical calls: create a key pair plus certificate, and attach a named
//! policy to the certificate's principal.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Errors returned by the issuance service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IssuerError {
    #[error("Request rejected by issuer: {0}")]
    Rejected(String),

    #[error("Issuer unreachable: {0}")]
    Unreachable(String),
}

/// Output of a create-keys-and-certificate call
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate_id: String,
    pub certificate_pem: Vec<u8>,
    pub private_key: Vec<u8>,
    pub certificate_arn: String,
}

/// Remote credential issuance and policy attachment
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Create a new key pair and certificate, optionally active immediately
    async fn create_keys_and_certificate(
        &self,
        set_as_active: bool,
    ) -> Result<IssuedCertificate, IssuerError>;

    /// Bind `policy_name` to the principal identified by `principal_arn`
    async fn attach_principal_policy(
        &self,
        policy_name: &str,
        principal_arn: &str,
    ) -> Result<(), IssuerError>;
}

/// Issuer that mints certificates locally
///
/// Counts calls and can be told to fail either step, which makes it usable
/// both by the demo binary and by tests.
pub struct SimulatedIssuer {
    account_id: String,
    region: String,
    latency: Duration,
    create_calls: AtomicUsize,
    attach_calls: AtomicUsize,
    fail_create: AtomicBool,
    fail_attach: AtomicBool,
}

impl Default for SimulatedIssuer {
    fn default() -> Self {
        Self::new("us-east-1")
    }
}

impl SimulatedIssuer {
    pub fn new(region: &str) -> Self {
        Self {
            account_id: "000000000000".into(),
            region: region.to_string(),
            latency: Duration::ZERO,
            create_calls: AtomicUsize::new(0),
            attach_calls: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_attach: AtomicBool::new(false),
        }
    }

    /// Delay applied to every call, standing in for a network round trip
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl CertificateIssuer for SimulatedIssuer {
    async fn create_keys_and_certificate(
        &self,
        set_as_active: bool,
    ) -> Result<IssuedCertificate, IssuerError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await;

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(IssuerError::Unreachable("simulated issuance failure".into()));
        }

        let certificate_id = Uuid::new_v4().simple().to_string();
        info!(
            "[ISSUER] Minted certificate {} (active={})",
            certificate_id, set_as_active
        );

        Ok(IssuedCertificate {
            certificate_arn: format!(
                "arn:aws:iot:{}:{}:cert/{}",
                self.region, self.account_id, certificate_id
            ),
            certificate_pem: format!(
                "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
                certificate_id
            )
            .into_bytes(),
            private_key: Uuid::new_v4().as_bytes().to_vec(),
            certificate_id,
        })
    }

    async fn attach_principal_policy(
        &self,
        policy_name: &str,
        principal_arn: &str,
    ) -> Result<(), IssuerError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await;

        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(IssuerError::Rejected(format!(
                "policy {} not found",
                policy_name
            )));
        }

        info!("[ISSUER] Attached policy {} to {}", policy_name, principal_arn);
        Ok(())
    }
}
