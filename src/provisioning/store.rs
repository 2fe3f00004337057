//! Local credential keystore
//!
//! A keyed store addressed by {alias, store name, store password}. Only the
//! provisioner's create path writes to it, and saving one alias never touches
//! the others.

use super::Credential;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

/// Errors raised by a credential store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keystore I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keystore is corrupt: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Keystore entry is corrupt: {0}")]
    Encoding(#[from] hex::FromHexError),

    #[error("Wrong password for keystore {0}")]
    BadPassword(String),

    #[error("Alias {0} not found in keystore")]
    MissingAlias(String),

    #[error("Keystore is read-only: {0}")]
    ReadOnly(String),
}

/// Presence check, load and save of credentials by alias
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether the backing store exists at all
    async fn is_present(&self) -> Result<bool, StoreError>;

    /// Whether the store holds an entry under `alias`
    async fn contains_alias(&self, alias: &str) -> Result<bool, StoreError>;

    async fn load(&self, alias: &str) -> Result<Credential, StoreError>;

    async fn save(&self, alias: &str, credential: &Credential) -> Result<(), StoreError>;
}

/// On-disk entry; key material is hex encoded
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    certificate_id: String,
    certificate_arn: String,
    certificate_pem: String,
    private_key: String,
}

impl StoredEntry {
    fn from_credential(credential: &Credential) -> Self {
        Self {
            certificate_id: credential.certificate_id.clone(),
            certificate_arn: credential.certificate_arn.clone(),
            certificate_pem: hex::encode(&credential.certificate_pem),
            private_key: hex::encode(&credential.private_key),
        }
    }

    fn to_credential(&self) -> Result<Credential, StoreError> {
        Ok(Credential {
            certificate_id: self.certificate_id.clone(),
            certificate_arn: self.certificate_arn.clone(),
            certificate_pem: hex::decode(&self.certificate_pem)?,
            private_key: hex::decode(&self.private_key)?,
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeystoreFile {
    /// BLAKE3 of the store password
    password_verifier: String,
    entries: BTreeMap<String, StoredEntry>,
}

/// Keystore kept as one JSON file at `<dir>/<store_name>`
pub struct FileKeyStore {
    path: PathBuf,
    store_name: String,
    password_verifier: String,
}

impl FileKeyStore {
    pub fn new(dir: impl AsRef<Path>, store_name: &str, password: &str) -> Self {
        Self {
            path: dir.as_ref().join(store_name),
            store_name: store_name.to_string(),
            password_verifier: blake3::hash(password.as_bytes()).to_hex().to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Option<KeystoreFile>, StoreError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: KeystoreFile = serde_json::from_slice(&content)?;
        if file.password_verifier != self.password_verifier {
            return Err(StoreError::BadPassword(self.store_name.clone()));
        }
        Ok(Some(file))
    }
}

#[async_trait]
impl CredentialStore for FileKeyStore {
    async fn is_present(&self) -> Result<bool, StoreError> {
        Ok(tokio::fs::try_exists(&self.path).await?)
    }

    async fn contains_alias(&self, alias: &str) -> Result<bool, StoreError> {
        Ok(self
            .read_file()
            .await?
            .is_some_and(|file| file.entries.contains_key(alias)))
    }

    async fn load(&self, alias: &str) -> Result<Credential, StoreError> {
        let file = self.read_file().await?;
        file.as_ref()
            .and_then(|f| f.entries.get(alias))
            .ok_or_else(|| StoreError::MissingAlias(alias.to_string()))?
            .to_credential()
    }

    async fn save(&self, alias: &str, credential: &Credential) -> Result<(), StoreError> {
        let mut file = self.read_file().await?.unwrap_or_else(|| KeystoreFile {
            password_verifier: self.password_verifier.clone(),
            entries: BTreeMap::new(),
        });
        file.entries
            .insert(alias.to_string(), StoredEntry::from_credential(credential));

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Write-then-rename; readers never see a half-written store
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&file)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("[KEYSTORE] Saved alias {} to {}", alias, self.path.display());
        Ok(())
    }
}

/// In-memory keystore
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<Option<BTreeMap<String, Credential>>>,
    read_only: AtomicBool,
}

impl MemoryKeyStore {
    /// An empty store that does not exist yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every save from now on
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().as_ref().map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl CredentialStore for MemoryKeyStore {
    async fn is_present(&self) -> Result<bool, StoreError> {
        Ok(self.entries.lock().is_some())
    }

    async fn contains_alias(&self, alias: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .lock()
            .as_ref()
            .is_some_and(|entries| entries.contains_key(alias)))
    }

    async fn load(&self, alias: &str) -> Result<Credential, StoreError> {
        self.entries
            .lock()
            .as_ref()
            .and_then(|entries| entries.get(alias).cloned())
            .ok_or_else(|| StoreError::MissingAlias(alias.to_string()))
    }

    async fn save(&self, alias: &str, credential: &Credential) -> Result<(), StoreError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::ReadOnly(alias.to_string()));
        }
        self.entries
            .lock()
            .get_or_insert_with(BTreeMap::new)
            .insert(alias.to_string(), credential.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(id: &str) -> Credential {
        Credential {
            certificate_id: id.into(),
            certificate_arn: format!("arn:aws:iot:us-east-1:123456789012:cert/{}", id),
            certificate_pem: format!("-----BEGIN CERTIFICATE-----\n{}\n", id).into_bytes(),
            private_key: vec![0x30, 0x82, 0x01, 0x00],
        }
    }

    #[tokio::test]
    async fn test_file_store_absent_until_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path(), "iot_keystore", "password");

        assert!(!store.is_present().await.unwrap());
        assert!(!store.contains_alias("default").await.unwrap());
        assert!(matches!(
            store.load("default").await,
            Err(StoreError::MissingAlias(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path(), "iot_keystore", "password");

        store.save("default", &credential("abc")).await.unwrap();

        assert!(store.is_present().await.unwrap());
        assert!(store.contains_alias("default").await.unwrap());
        assert_eq!(store.load("default").await.unwrap(), credential("abc"));

        // A second handle on the same file sees the entry
        let reopened = FileKeyStore::new(dir.path(), "iot_keystore", "password");
        assert_eq!(reopened.load("default").await.unwrap(), credential("abc"));
    }

    #[tokio::test]
    async fn test_file_store_keeps_other_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path(), "iot_keystore", "password");

        store.save("legacy", &credential("old")).await.unwrap();
        store.save("default", &credential("new")).await.unwrap();

        assert_eq!(store.load("legacy").await.unwrap(), credential("old"));
        assert_eq!(store.load("default").await.unwrap(), credential("new"));
    }

    #[tokio::test]
    async fn test_file_store_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        FileKeyStore::new(dir.path(), "iot_keystore", "password")
            .save("default", &credential("abc"))
            .await
            .unwrap();

        let store = FileKeyStore::new(dir.path(), "iot_keystore", "hunter2");
        assert!(store.is_present().await.unwrap());
        assert!(matches!(
            store.contains_alias("default").await,
            Err(StoreError::BadPassword(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("iot_keystore"), b"garbage").unwrap();

        let store = FileKeyStore::new(dir.path(), "iot_keystore", "password");
        assert!(matches!(
            store.load("default").await,
            Err(StoreError::Format(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryKeyStore::new();
        assert!(!store.is_present().await.unwrap());

        store.save("default", &credential("abc")).await.unwrap();
        assert!(store.is_present().await.unwrap());
        assert!(store.contains_alias("default").await.unwrap());
        assert!(!store.contains_alias("other").await.unwrap());
        assert_eq!(store.len(), 1);

        store.set_read_only(true);
        assert!(matches!(
            store.save("other", &credential("x")).await,
            Err(StoreError::ReadOnly(_))
        ));
        assert_eq!(store.len(), 1);
    }
}
