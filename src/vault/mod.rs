//! Credential Vault
//!
//! Encrypts connection passwords at rest and decrypts them transiently at
//! select time. The vault is a pure function of a [`SecretCipher`]:
//!
//! - [`AgeCipher`] encrypts to an x25519 age identity resolved from the
//!   environment (CI/headless) or an identity file in the data directory.
//! - [`UnavailableCipher`] models a host with no encryption capability.
//!
//! Ciphertext is stored as base64 text. A missing capability fails with
//! `EncryptionUnavailable` and there is no plaintext fallback.

use age::secrecy::ExposeSecret;
use age::x25519;
use base64::Engine as _;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::{ProcheckError, Result};

/// Narrow encryption capability used by the vault
pub trait SecretCipher: Send + Sync {
    /// Whether the host can encrypt right now
    fn is_available(&self) -> bool;

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// age x25519 cipher
pub struct AgeCipher {
    identity: Option<x25519::Identity>,
}

impl AgeCipher {
    /// Cipher over an existing identity (`AGE-SECRET-KEY-1...`).
    ///
    /// Accepts identity-file contents: blank lines and `#` comments are skipped.
    pub fn from_identity_str(identity: &str) -> Result<Self> {
        let key = identity
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .ok_or_else(|| ProcheckError::encryption_unavailable("Identity is empty"))?;
        let identity = x25519::Identity::from_str(key)
            .map_err(|e| ProcheckError::encryption_unavailable(format!("Invalid age identity: {e}")))?;
        Ok(Self { identity: Some(identity) })
    }

    /// Cipher over a freshly generated in-memory identity
    #[must_use]
    pub fn generate() -> Self {
        Self { identity: Some(x25519::Identity::generate()) }
    }

    /// Cipher with no identity; reports unavailable
    #[must_use]
    pub const fn without_identity() -> Self {
        Self { identity: None }
    }

    /// Resolve the identity from settings.
    ///
    /// Checks the identity env var first, then the identity file. Neither being
    /// present is not an error here: the cipher is simply unavailable.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if let Ok(identity) = std::env::var(settings.identity_env()) {
            if !identity.trim().is_empty() {
                tracing::debug!(source = settings.identity_env(), "Using age identity from environment");
                return Self::from_identity_str(&identity);
            }
        }

        let path = settings.identity_path()?;
        if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                ProcheckError::encryption_unavailable(format!("Could not read identity file: {e}"))
            })?;
            tracing::debug!(path = %path.display(), "Using age identity file");
            return Self::from_identity_str(&contents);
        }

        tracing::warn!("No age identity configured; stored passwords cannot be encrypted");
        Ok(Self::without_identity())
    }

    /// Public recipient string for this identity
    #[must_use]
    pub fn recipient(&self) -> Option<String> {
        self.identity.as_ref().map(|identity| identity.to_public().to_string())
    }

    fn identity(&self) -> Result<&x25519::Identity> {
        self.identity
            .as_ref()
            .ok_or_else(|| ProcheckError::encryption_unavailable("No age identity configured"))
    }
}

impl SecretCipher for AgeCipher {
    fn is_available(&self) -> bool {
        self.identity.is_some()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let recipient = self.identity()?.to_public();
        let encryptor =
            age::Encryptor::with_recipients(std::iter::once(&recipient as &dyn age::Recipient))
                .map_err(|e| ProcheckError::encryption_unavailable(e.to_string()))?;

        let mut encrypted = Vec::new();
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| ProcheckError::encryption_unavailable(e.to_string()))?;
        writer
            .write_all(plaintext)
            .map_err(|e| ProcheckError::encryption_unavailable(e.to_string()))?;
        writer.finish().map_err(|e| ProcheckError::encryption_unavailable(e.to_string()))?;

        Ok(encrypted)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let identity = self.identity().map_err(|_| {
            ProcheckError::decryption_failed("No age identity configured to decrypt with")
        })?;

        let decryptor = age::Decryptor::new(ciphertext)
            .map_err(|e| ProcheckError::decryption_failed(e.to_string()))?;
        let mut reader = decryptor
            .decrypt(std::iter::once(identity as &dyn age::Identity))
            .map_err(|e| ProcheckError::decryption_failed(e.to_string()))?;

        let mut decrypted = Vec::new();
        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| ProcheckError::decryption_failed(e.to_string()))?;
        Ok(decrypted)
    }
}

/// A host with no encryption capability
pub struct UnavailableCipher;

impl SecretCipher for UnavailableCipher {
    fn is_available(&self) -> bool {
        false
    }

    fn encrypt(&self, _plaintext: &[u8]) -> Result<Vec<u8>> {
        Err(ProcheckError::encryption_unavailable("No platform encryption capability"))
    }

    fn decrypt(&self, _ciphertext: &[u8]) -> Result<Vec<u8>> {
        Err(ProcheckError::decryption_failed("No platform encryption capability"))
    }
}

/// Encrypts/decrypts passwords to/from base64 ciphertext text
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Arc<dyn SecretCipher>,
}

impl CredentialVault {
    pub fn new(cipher: Arc<dyn SecretCipher>) -> Self {
        Self { cipher }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.cipher.is_available()
    }

    /// Encrypt a password for storage
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if !self.cipher.is_available() {
            return Err(ProcheckError::encryption_unavailable(
                "Refusing to store a password without encryption",
            ));
        }
        let blob = self.cipher.encrypt(plaintext.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Decrypt a stored password
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| ProcheckError::decryption_failed(format!("Ciphertext is not base64: {e}")))?;
        let plaintext = self.cipher.decrypt(&blob)?;
        String::from_utf8(plaintext)
            .map_err(|_| ProcheckError::decryption_failed("Decrypted password is not valid UTF-8"))
    }
}

/// Generate a new identity and write it to `path`.
///
/// Refuses to overwrite an existing file unless `force` is set. Returns the
/// public recipient.
pub fn write_identity_file(path: &Path, force: bool) -> Result<String> {
    if path.exists() && !force {
        return Err(ProcheckError::invalid_input(format!(
            "Identity file {} already exists (use --force to replace it; stored passwords will become undecryptable)",
            path.display()
        )));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ProcheckError::config_error(format!("Could not create identity directory: {e}"))
        })?;
    }

    let identity = x25519::Identity::generate();
    let recipient = identity.to_public().to_string();
    let contents = format!(
        "# public key: {recipient}\n{}\n",
        identity.to_string().expose_secret()
    );

    fs::write(path, contents)
        .map_err(|e| ProcheckError::config_error(format!("Could not write identity file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
            ProcheckError::config_error(format!("Could not restrict identity file permissions: {e}"))
        })?;
    }

    tracing::info!(path = %path.display(), "Wrote age identity");
    Ok(recipient)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::new(Arc::new(AgeCipher::generate()))
    }

    #[test]
    fn test_round_trip() {
        let vault = vault();
        for password in ["hunter2", "pä$$ wörd", "with:colon@and/slash"] {
            let ciphertext = vault.encrypt(password).unwrap();
            assert!(!ciphertext.contains(password));
            assert_eq!(vault.decrypt(&ciphertext).unwrap(), password);
        }
    }

    #[test]
    fn test_unavailable_cipher_never_produces_output() {
        let vault = CredentialVault::new(Arc::new(UnavailableCipher));
        let err = vault.encrypt("secret").unwrap_err();
        assert_eq!(err.error_code(), "ENCRYPTION_UNAVAILABLE");

        let vault = CredentialVault::new(Arc::new(AgeCipher::without_identity()));
        assert!(!vault.is_available());
        assert_eq!(vault.encrypt("secret").unwrap_err().error_code(), "ENCRYPTION_UNAVAILABLE");
    }

    #[test]
    fn test_foreign_identity_fails_to_decrypt() {
        let ciphertext = vault().encrypt("secret").unwrap();
        let err = vault().decrypt(&ciphertext).unwrap_err();
        assert_eq!(err.error_code(), "DECRYPTION_FAILED");
    }

    #[test]
    fn test_corrupt_blob_fails_to_decrypt() {
        let vault = vault();
        assert_eq!(vault.decrypt("%%% not base64").unwrap_err().error_code(), "DECRYPTION_FAILED");

        let garbage = base64::engine::general_purpose::STANDARD.encode(b"definitely not age");
        assert_eq!(vault.decrypt(&garbage).unwrap_err().error_code(), "DECRYPTION_FAILED");
    }

    #[test]
    fn test_identity_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.txt");

        let recipient = write_identity_file(&path, false).unwrap();
        assert!(recipient.starts_with("age1"));

        let settings = Settings {
            identity_file: Some(path.clone()),
            identity_env: Some("PROCHECK_TEST_IDENTITY_UNSET".to_string()),
            ..Settings::default()
        };
        let cipher = AgeCipher::from_settings(&settings).unwrap();
        assert_eq!(cipher.recipient(), Some(recipient));

        assert!(write_identity_file(&path, false).is_err());
        assert!(write_identity_file(&path, true).is_ok());
    }

    #[test]
    fn test_missing_identity_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: Some(dir.path().to_path_buf()),
            identity_env: Some("PROCHECK_TEST_IDENTITY_ALSO_UNSET".to_string()),
            ..Settings::default()
        };
        let cipher = AgeCipher::from_settings(&settings).unwrap();
        assert!(!cipher.is_available());
    }
}
