//! Secure Key Store.
//!
//! Long-lived secrets (the signing key, the anonymizing key and the key
//! that encrypts the wallet file) live in a [`SecureEnclave`]. Everything
//! else is a JSON record with sorted keys, sealed with AES-256-GCM and
//! written as `nonce(12) || ciphertext || tag`.
//!
//! Secrets are only reachable through the scoped accessors
//! ([`SecureKeyStore::with_signing_key`] and friends). The callback is
//! synchronous, so a secret never lives across an await point, and the
//! buffer it sees is zeroed on every exit path, panics included.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use idwallet_crypto::{encrypting, random_secret};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::encoding;
use crate::error::{IdentityError, IdentityResult};
use crate::wallet::Wallet;

pub const SIGNING_KEY_ENTRY: &str = "idwallet.signing_key";
pub const ANONYMIZING_KEY_ENTRY: &str = "idwallet.anonymizing_key";
pub const WALLET_FILE_KEY_ENTRY: &str = "idwallet.wallet_file_key";
pub const WALLET_ID_ENTRY: &str = "idwallet.wallet_id";

const WALLET_FILE_KEY_BYTES: usize = 32;

/// Device-backed storage for named secrets, such as a platform keystore.
#[async_trait]
pub trait SecureEnclave: Send + Sync {
    async fn get(&self, name: &str) -> IdentityResult<Option<Zeroizing<String>>>;

    async fn set(&self, name: &str, value: &str) -> IdentityResult<()>;

    async fn delete(&self, name: &str) -> IdentityResult<()>;
}

/// Process-local enclave for tests and development.
#[derive(Default)]
pub struct InMemoryEnclave {
    entries: Mutex<HashMap<String, Zeroizing<String>>>,
}

impl InMemoryEnclave {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.lock().await.contains_key(name)
    }
}

#[async_trait]
impl SecureEnclave for InMemoryEnclave {
    async fn get(&self, name: &str) -> IdentityResult<Option<Zeroizing<String>>> {
        Ok(self.entries.lock().await.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> IdentityResult<()> {
        self.entries
            .lock()
            .await
            .insert(name.to_string(), Zeroizing::new(value.to_string()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> IdentityResult<()> {
        self.entries.lock().await.remove(name);
        Ok(())
    }
}

/// Secret bytes handed to a scoped callback.
///
/// Wiping overwrites the bytes in place and keeps the length, so a caller
/// holding the buffer can confirm it was cleared.
#[derive(Default, ZeroizeOnDrop)]
pub struct SecretBuffer {
    bytes: Vec<u8>,
}

impl SecretBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when every byte is zero.
    pub fn is_zeroed(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    fn fill(&mut self, secret: &[u8]) {
        self.wipe();
        self.bytes.clear();
        self.bytes.extend_from_slice(secret);
    }

    fn wipe(&mut self) {
        self.bytes.as_mut_slice().zeroize();
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBuffer([REDACTED; {}])", self.bytes.len())
    }
}

/// Wipes the borrowed buffer when dropped, including during unwinding.
struct WipeGuard<'a>(&'a mut SecretBuffer);

impl Drop for WipeGuard<'_> {
    fn drop(&mut self) {
        self.0.wipe();
    }
}

/// Run `f` over the buffer contents, then wipe them whatever `f` does.
fn run_scoped<R>(buffer: &mut SecretBuffer, f: impl FnOnce(&[u8]) -> R) -> R {
    let guard = WipeGuard(buffer);
    f(guard.0.as_bytes())
}

/// Wallet persistence split between an enclave and an encrypted file.
pub struct SecureKeyStore<E: SecureEnclave> {
    enclave: E,
    wallet_path: PathBuf,
}

impl<E: SecureEnclave> SecureKeyStore<E> {
    pub fn new(enclave: E, wallet_path: impl Into<PathBuf>) -> Self {
        Self {
            enclave,
            wallet_path: wallet_path.into(),
        }
    }

    pub fn enclave(&self) -> &E {
        &self.enclave
    }

    pub fn wallet_path(&self) -> &Path {
        &self.wallet_path
    }

    /// Persist a newly registered wallet with its secrets.
    pub async fn create(
        &self,
        wallet: &Wallet,
        signing_private_der: &[u8],
        anonymizing_key: &[u8],
    ) -> IdentityResult<()> {
        let file_key = random_secret(WALLET_FILE_KEY_BYTES);

        self.set_secret(SIGNING_KEY_ENTRY, signing_private_der).await?;
        self.set_secret(ANONYMIZING_KEY_ENTRY, anonymizing_key).await?;
        self.set_secret(WALLET_FILE_KEY_ENTRY, &file_key).await?;
        self.enclave.set(WALLET_ID_ENTRY, &wallet.id).await?;
        self.save(wallet).await?;

        info!(
            wallet_id = %wallet.id,
            fingerprint = %wallet.fingerprint(),
            "Wallet created"
        );
        Ok(())
    }

    /// Both the enclave secrets and the encrypted file must be present.
    pub async fn exists(&self) -> IdentityResult<bool> {
        for entry in [WALLET_ID_ENTRY, SIGNING_KEY_ENTRY, WALLET_FILE_KEY_ENTRY] {
            if self.enclave.get(entry).await?.is_none() {
                return Ok(false);
            }
        }
        Ok(tokio::fs::try_exists(&self.wallet_path).await?)
    }

    /// Load and decrypt the wallet record.
    ///
    /// A record whose id disagrees with the enclave is deleted.
    pub async fn load(&self) -> IdentityResult<Wallet> {
        if !self.exists().await? {
            return Err(IdentityError::WalletNotFound);
        }

        let sealed = tokio::fs::read(&self.wallet_path).await?;
        if sealed.len() < encrypting::NONCE_SIZE {
            return Err(IdentityError::WalletCorrupted(
                "wallet file shorter than its nonce".to_string(),
            ));
        }
        let (nonce, ciphertext) = sealed.split_at(encrypting::NONCE_SIZE);
        let plaintext = self
            .with_secret(WALLET_FILE_KEY_ENTRY, &mut SecretBuffer::new(), |key| {
                encrypting::decrypt(key, nonce, ciphertext)
            })
            .await?
            .map_err(|e| IdentityError::WalletCorrupted(e.to_string()))?;
        let wallet = Wallet::from_record_bytes(&plaintext)?;

        let enclave_id = self
            .enclave
            .get(WALLET_ID_ENTRY)
            .await?
            .ok_or_else(|| IdentityError::MissingSecret(WALLET_ID_ENTRY.to_string()))?;
        if wallet.id != enclave_id.as_str() {
            warn!(
                wallet_id = %wallet.id,
                enclave_wallet_id = %enclave_id.as_str(),
                "Wallet id mismatch, deleting stored wallet"
            );
            self.delete().await?;
            return Err(IdentityError::WalletCorrupted(
                "wallet id does not match secure enclave".to_string(),
            ));
        }

        debug!(wallet_id = %wallet.id, fingerprint = %wallet.fingerprint(), "Wallet loaded");
        Ok(wallet)
    }

    /// Encrypt and write the wallet record, replacing the file atomically.
    pub async fn save(&self, wallet: &Wallet) -> IdentityResult<()> {
        let record = Zeroizing::new(wallet.to_record_bytes()?);
        let (nonce, ciphertext) = self
            .with_secret(WALLET_FILE_KEY_ENTRY, &mut SecretBuffer::new(), |key| {
                encrypting::encrypt(key, &record)
            })
            .await??;

        let mut sealed = Vec::with_capacity(nonce.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        if let Some(parent) = self.wallet_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp_path = self.wallet_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &sealed).await?;
        tokio::fs::rename(&tmp_path, &self.wallet_path).await?;

        debug!(wallet_id = %wallet.id, "Wallet saved");
        Ok(())
    }

    /// Remove every enclave entry and the wallet file.
    pub async fn delete(&self) -> IdentityResult<()> {
        for entry in [
            SIGNING_KEY_ENTRY,
            ANONYMIZING_KEY_ENTRY,
            WALLET_FILE_KEY_ENTRY,
            WALLET_ID_ENTRY,
        ] {
            self.enclave.delete(entry).await?;
        }
        match tokio::fs::remove_file(&self.wallet_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(path = %self.wallet_path.display(), "Wallet deleted");
        Ok(())
    }

    /// Overwrite the anonymizing key. Call only after the authority confirmed rotation.
    pub async fn replace_anonymizing_key(&self, anonymizing_key: &[u8]) -> IdentityResult<()> {
        self.set_secret(ANONYMIZING_KEY_ENTRY, anonymizing_key).await
    }

    /// Run `f` with the PKCS#8 signing key.
    pub async fn with_signing_key<R, F>(&self, f: F) -> IdentityResult<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        self.with_signing_key_in(&mut SecretBuffer::new(), f).await
    }

    /// As [`Self::with_signing_key`], using a caller-owned buffer that is
    /// wiped before this returns.
    pub async fn with_signing_key_in<R, F>(
        &self,
        buffer: &mut SecretBuffer,
        f: F,
    ) -> IdentityResult<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        self.with_secret(SIGNING_KEY_ENTRY, buffer, f).await
    }

    /// Run `f` with the raw anonymizing key.
    pub async fn with_anonymizing_key<R, F>(&self, f: F) -> IdentityResult<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        self.with_anonymizing_key_in(&mut SecretBuffer::new(), f).await
    }

    pub async fn with_anonymizing_key_in<R, F>(
        &self,
        buffer: &mut SecretBuffer,
        f: F,
    ) -> IdentityResult<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        self.with_secret(ANONYMIZING_KEY_ENTRY, buffer, f).await
    }

    async fn with_secret<R, F>(
        &self,
        entry: &str,
        buffer: &mut SecretBuffer,
        f: F,
    ) -> IdentityResult<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let stored = self
            .enclave
            .get(entry)
            .await?
            .ok_or_else(|| IdentityError::MissingSecret(entry.to_string()))?;
        let decoded = encoding::decode_secret(&stored)?;
        buffer.fill(&decoded);
        Ok(run_scoped(buffer, f))
    }

    async fn set_secret(&self, entry: &str, secret: &[u8]) -> IdentityResult<()> {
        let encoded = Zeroizing::new(encoding::encode(secret));
        self.enclave.set(entry, &encoded).await
    }
}
