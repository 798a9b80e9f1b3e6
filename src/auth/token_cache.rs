//! Token cache persisted in the project root
//!
//! On disk the cache is either plain JSON, or `hex(nonce):hex(ciphertext)`
//! when a secret is configured. The key is SHA-256 of the secret; every
//! write draws a fresh 24-byte XChaCha20-Poly1305 nonce.

use super::oauth_client::OAuthTokenResponse;
use crate::error::{errors, IoContext, SnResult};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const NONCE_LEN: usize = 24;

/// Cached OAuth credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry instant
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    /// Last time this tool used the token (idle-timeout clock)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_used_at: DateTime<Utc>,
}

/// Upper bound on a server-reported token lifetime (one year)
const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

impl TokenCache {
    /// Build a cache entry from a token endpoint response issued at `now`.
    /// The lifetime is clamped to `1..=MAX_TOKEN_LIFETIME_SECS` so expiry stays
    /// after issuance and within chrono's range.
    pub fn from_response(response: &OAuthTokenResponse, now: DateTime<Utc>) -> Self {
        let lifetime = i64::try_from(response.expires_in.max(1))
            .unwrap_or(i64::MAX)
            .min(MAX_TOKEN_LIFETIME_SECS);
        Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at: now + Duration::seconds(lifetime),
            last_used_at: now,
        }
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: std::time::Duration) -> bool {
        now.signed_duration_since(self.last_used_at) > to_chrono(idle_timeout)
    }

    pub fn needs_touch(&self, now: DateTime<Utc>, debounce: std::time::Duration) -> bool {
        now.signed_duration_since(self.last_used_at) > to_chrono(debounce)
    }

    /// Move the last-access instant forward; never backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_used_at {
            self.last_used_at = now;
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, margin: std::time::Duration) -> bool {
        now < self.expires_at - to_chrono(margin)
    }
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(365 * 100))
}

/// Symmetric encryption of the serialized cache
#[derive(Clone)]
pub struct TokenCipher {
    key: Option<[u8; 32]>,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("encrypted", &self.key.is_some())
            .finish()
    }
}

impl TokenCipher {
    pub fn new(secret: Option<&str>) -> Self {
        let key = secret.filter(|s| !s.is_empty()).map(|secret| {
            let digest = Sha256::digest(secret.as_bytes());
            let mut key = [0u8; 32];
            key.copy_from_slice(&digest);
            key
        });
        Self { key }
    }

    pub fn plain() -> Self {
        Self { key: None }
    }

    pub fn is_encrypting(&self) -> bool {
        self.key.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> SnResult<String> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_string());
        };
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| errors::crypto_error(format!("Failed to encrypt token cache: {e}")))?;
        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    /// Plain JSON is accepted regardless of the configured secret.
    pub fn decrypt(&self, stored: &str) -> SnResult<String> {
        let stored = stored.trim();
        if stored.starts_with('{') {
            return Ok(stored.to_string());
        }
        let Some(key) = &self.key else {
            return Err(errors::crypto_error(
                "Token cache is encrypted but no SN_ENC_SECRET is configured",
            ));
        };

        let (nonce_hex, body_hex) = stored
            .split_once(':')
            .filter(|(_, body)| !body.contains(':'))
            .ok_or_else(|| {
                errors::crypto_error("Invalid cache format or encrypted with a different key")
            })?;
        let nonce = hex::decode(nonce_hex)
            .map_err(|e| errors::crypto_error(format!("Invalid cache nonce: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(errors::crypto_error(format!(
                "Invalid cache nonce length {} (expected {})",
                nonce.len(),
                NONCE_LEN
            )));
        }
        let body = hex::decode(body_hex)
            .map_err(|e| errors::crypto_error(format!("Invalid cache payload: {e}")))?;

        let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&nonce), body.as_ref())
            .map_err(|_| {
                errors::crypto_error("Token cache was encrypted with a different secret")
            })?;
        String::from_utf8(plaintext)
            .map_err(|e| errors::crypto_error(format!("Decrypted cache is not UTF-8: {e}")))
    }
}

/// Reads and writes the cache file
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    cipher: TokenCipher,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>, cipher: TokenCipher) -> Self {
        Self {
            path: path.into(),
            cipher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// `Ok(None)` when no cache file exists; `Err` when it exists but cannot be
    /// decrypted or parsed.
    pub fn load(&self) -> SnResult<Option<TokenCache>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let stored = fs::read_to_string(&self.path).with_path(&self.path)?;
        let json = self.cipher.decrypt(&stored)?;
        let cache = serde_json::from_str(&json)
            .map_err(|e| errors::crypto_error(format!("Token cache is corrupt: {e}")))?;
        Ok(Some(cache))
    }

    pub fn save(&self, cache: &TokenCache) -> SnResult<()> {
        let json = serde_json::to_string(cache)
            .map_err(|e| errors::crypto_error(format!("Failed to serialize token cache: {e}")))?;
        let content = self.cipher.encrypt(&json)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        fs::write(&self.path, content).with_path(&self.path)?;

        // Set restrictive permissions on the file (only user can read/write)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.path).with_path(&self.path)?.permissions();
            perms.set_mode(0o600); // rw-------
            fs::set_permissions(&self.path, perms).with_path(&self.path)?;
        }

        debug!(
            "Token cache saved to {:?} (encrypted: {})",
            self.path,
            self.cipher.is_encrypting()
        );
        Ok(())
    }

    pub fn discard(&self) -> SnResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).with_path(&self.path)?;
            debug!("Token cache removed: {:?}", self.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample(now: DateTime<Utc>) -> TokenCache {
        TokenCache {
            access_token: "access-1".into(),
            refresh_token: Some("refresh-1".into()),
            expires_at: now + Duration::minutes(30),
            last_used_at: now,
        }
    }

    // Millisecond precision is what survives serialization.
    fn now_ms() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    #[test]
    fn encrypted_round_trip_reproduces_the_cache() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("cache"), TokenCipher::new(Some("s3cret")));
        let cache = sample(now_ms());
        store.save(&cache).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("access-1"));
        let (nonce, _) = raw.split_once(':').unwrap();
        assert_eq!(nonce.len(), NONCE_LEN * 2);

        assert_eq!(store.load().unwrap(), Some(cache));
    }

    #[test]
    fn each_write_uses_a_fresh_nonce() {
        let cipher = TokenCipher::new(Some("s3cret"));
        let a = cipher.encrypt("{\"x\":1}").unwrap();
        let b = cipher.encrypt("{\"x\":1}").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_secret_fails_with_crypto_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache");
        TokenStore::new(&path, TokenCipher::new(Some("right")))
            .save(&sample(now_ms()))
            .unwrap();

        let err = TokenStore::new(&path, TokenCipher::new(Some("wrong")))
            .load()
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Crypto);
    }

    #[test]
    fn plain_cache_is_readable_with_a_secret_configured() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache");
        let cache = sample(now_ms());
        TokenStore::new(&path, TokenCipher::plain()).save(&cache).unwrap();

        let loaded = TokenStore::new(&path, TokenCipher::new(Some("later-secret")))
            .load()
            .unwrap();
        assert_eq!(loaded, Some(cache));
    }

    #[test]
    fn encrypted_cache_without_secret_is_a_crypto_error() {
        let stored = TokenCipher::new(Some("k")).encrypt("{}").unwrap();
        let err = TokenCipher::plain().decrypt(&stored).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Crypto);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let cipher = TokenCipher::new(Some("k"));
        for bad in ["garbage", "zz:zz", "00:11:22", "abcd:abcd"] {
            let err = cipher.decrypt(bad).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::Crypto, "input {bad}");
        }
    }

    #[test]
    fn timestamps_are_stored_as_epoch_millis() {
        let now = now_ms();
        let json = serde_json::to_value(sample(now)).unwrap();
        assert_eq!(json["last_used_at"], now.timestamp_millis());
    }

    #[test]
    fn touch_never_moves_backwards() {
        let now = now_ms();
        let mut cache = sample(now);
        cache.touch(now - Duration::minutes(5));
        assert_eq!(cache.last_used_at, now);
        cache.touch(now + Duration::seconds(30));
        assert_eq!(cache.last_used_at, now + Duration::seconds(30));
    }

    #[test]
    fn zero_lifetime_still_expires_after_issuance() {
        let now = now_ms();
        let response = OAuthTokenResponse {
            access_token: "a".into(),
            refresh_token: None,
            expires_in: 0,
            token_type: None,
            scope: None,
        };
        let cache = TokenCache::from_response(&response, now);
        assert!(cache.expires_at > now);
    }

    #[test]
    fn huge_lifetime_is_capped_instead_of_overflowing() {
        let now = now_ms();
        let response = OAuthTokenResponse {
            access_token: "a".into(),
            refresh_token: None,
            expires_in: u64::MAX,
            token_type: None,
            scope: None,
        };
        let cache = TokenCache::from_response(&response, now);
        assert_eq!(
            cache.expires_at,
            now + Duration::seconds(MAX_TOKEN_LIFETIME_SECS)
        );
    }
}
