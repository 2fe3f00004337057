//! Credential provisioner
//!
//! Ensures a usable certificate/key pair exists under the configured alias,
//! issuing a new one remotely only when the keystore does not already hold it.

use super::issuer::{CertificateIssuer, IssuerError};
use super::store::{CredentialStore, StoreError};
use super::Credential;
use crate::config::ProvisioningConfig;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Errors that can occur while provisioning a credential
#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// Reading or persisting the keystore failed; nothing was cached, so the
    /// next attempt issues again
    #[error("Keystore failure: {0}")]
    Store(#[from] StoreError),

    #[error("Certificate issuance failed: {0}")]
    Issuance(#[source] IssuerError),

    /// The certificate was issued and persisted but its policy is not
    /// attached. Retry with [`CredentialProvisioner::attach_policy`].
    #[error(
        "Certificate {} persisted but policy attach failed: {source}",
        .credential.certificate_id
    )]
    PolicyAttach {
        credential: Box<Credential>,
        #[source]
        source: IssuerError,
    },
}

/// Creates or reuses the single active credential
pub struct CredentialProvisioner {
    config: ProvisioningConfig,
    store: Arc<dyn CredentialStore>,
    issuer: Arc<dyn CertificateIssuer>,
    /// Held across check-then-create; caches the credential once usable
    cached: Mutex<Option<Credential>>,
}

impl CredentialProvisioner {
    pub fn new(
        config: ProvisioningConfig,
        store: Arc<dyn CredentialStore>,
        issuer: Arc<dyn CertificateIssuer>,
    ) -> Self {
        Self {
            config,
            store,
            issuer,
            cached: Mutex::new(None),
        }
    }

    pub fn alias(&self) -> &str {
        &self.config.certificate_alias
    }

    /// Return the credential stored under the alias, creating it if absent
    ///
    /// Concurrent callers are serialized, so a missing credential is issued
    /// exactly once.
    pub async fn ensure(&self) -> Result<Credential, ProvisioningError> {
        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref() {
            return Ok(credential.clone());
        }

        if let Some(credential) = self.load_existing().await? {
            *cached = Some(credential.clone());
            return Ok(credential);
        }

        let credential = self.create().await?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Attach the configured policy to an already persisted credential
    pub async fn attach_policy(&self, credential: &Credential) -> Result<(), ProvisioningError> {
        self.issuer
            .attach_principal_policy(&self.config.policy_name, &credential.certificate_arn)
            .await
            .map_err(|source| ProvisioningError::PolicyAttach {
                credential: Box::new(credential.clone()),
                source,
            })?;

        info!(
            "[PROVISION] Policy {} attached to certificate {}",
            self.config.policy_name, credential.certificate_id
        );
        *self.cached.lock().await = Some(credential.clone());
        Ok(())
    }

    /// Look the alias up in the keystore
    ///
    /// Only a missing keystore or alias is "absent"; an unreadable keystore
    /// is an error and nothing gets issued.
    async fn load_existing(&self) -> Result<Option<Credential>, StoreError> {
        match self.lookup_alias().await {
            Ok(Some(credential)) => {
                info!(
                    "[PROVISION] Certificate {} found in keystore, reusing it",
                    self.alias()
                );
                Ok(Some(credential))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                error!("[PROVISION] Error retrieving cert/key from keystore: {}", e);
                Err(e)
            }
        }
    }

    async fn lookup_alias(&self) -> Result<Option<Credential>, StoreError> {
        let alias = self.alias();

        if !self.store.is_present().await? {
            info!(
                "[PROVISION] Keystore {}/{} not found",
                self.config.keystore_path.display(),
                self.config.keystore_name
            );
            return Ok(None);
        }
        if !self.store.contains_alias(alias).await? {
            info!("[PROVISION] Key/cert {} not found in keystore", alias);
            return Ok(None);
        }
        self.store.load(alias).await.map(Some)
    }

    /// Issue, attach, persist, reload
    async fn create(&self) -> Result<Credential, ProvisioningError> {
        let alias = self.alias();
        info!("[PROVISION] Creating new key and certificate for alias {}", alias);

        let issued = self
            .issuer
            .create_keys_and_certificate(true)
            .await
            .map_err(ProvisioningError::Issuance)?;
        info!("[PROVISION] Cert ID {} created", issued.certificate_id);

        let attached = self
            .issuer
            .attach_principal_policy(&self.config.policy_name, &issued.certificate_arn)
            .await;

        let credential = Credential {
            certificate_id: issued.certificate_id,
            certificate_arn: issued.certificate_arn,
            certificate_pem: issued.certificate_pem,
            private_key: issued.private_key,
        };

        // Persisted even when the policy attach failed
        self.store.save(alias, &credential).await?;
        let credential = self.store.load(alias).await?;

        match attached {
            Ok(()) => {
                info!("[PROVISION] Policy {} attached to certificate", self.config.policy_name);
                Ok(credential)
            }
            Err(source) => {
                warn!(
                    "[PROVISION] Certificate {} stored but policy attach failed: {}",
                    credential.certificate_id, source
                );
                Err(ProvisioningError::PolicyAttach {
                    credential: Box::new(credential),
                    source,
                })
            }
        }
    }
}
