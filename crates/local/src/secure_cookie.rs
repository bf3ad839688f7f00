// SPDX-License-Identifier: MIT

//! Shared secure-cookie key and encrypted-password handling.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lp_core::Job;
use lp_sdk::SourceError;
use sha2::{Digest, Sha256};
use std::path::Path;

pub const ENCRYPTED_PASSWORD: &str = "encryptedPassword";
pub const INITIALIZATION_VECTOR: &str = "initializationVector";
pub const PAM_PROFILE: &str = "pamProfile";

/// The shared key used to decrypt passwords sent by the launcher.
///
/// Read once from a key file that must be readable only by the plugin
/// user. A missing file leaves the plugin running without decryption
/// support; submitting a job with an encrypted password then fails.
pub struct SecureCookie {
    key: Option<String>,
}

impl SecureCookie {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let key = text.trim().to_string();
                if key.is_empty() {
                    tracing::warn!(path = %path.display(), "secure cookie key file is empty");
                    Self { key: None }
                } else {
                    Self { key: Some(key) }
                }
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no secure cookie key");
                Self { key: None }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_key(key: &str) -> Self {
        Self { key: Some(key.to_string()) }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// Decrypt the job's password, if it carries one.
///
/// Decryption happens iff the `encryptedPassword` config value is present;
/// `initializationVector` is then required and must be at least 8 bytes.
pub fn decrypt_password(job: &Job, cookie: &SecureCookie) -> Result<Option<String>, SourceError> {
    let Some(encrypted) = job.config_value(ENCRYPTED_PASSWORD) else {
        return Ok(None);
    };

    let iv = job.config_value(INITIALIZATION_VECTOR).ok_or_else(|| {
        SourceError::invalid_request("required field 'initializationVector' missing")
    })?;
    if iv.len() < 8 {
        return Err(SourceError::invalid_request(
            "required field 'initializationVector' is too short - must be at least 8 bytes",
        ));
    }

    let Some(key) = cookie.key() else {
        return Err(SourceError::unknown(
            "no secure cookie key is available to decrypt the job password",
        ));
    };

    let ciphertext = BASE64.decode(encrypted).map_err(|_| {
        SourceError::invalid_request(
            "'encryptedPassword' field or 'initializationVector' field has invalid format",
        )
    })?;

    let key_bytes = Sha256::digest(key.as_bytes());
    let nonce_bytes = Sha256::digest(iv.as_bytes());
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let plain = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes[..12]), ciphertext.as_ref())
        .map_err(|_| {
            SourceError::invalid_request(
                "'encryptedPassword' field or 'initializationVector' field has invalid format",
            )
        })?;

    let password = String::from_utf8(plain).map_err(|_| {
        SourceError::invalid_request("decrypted password is not valid UTF-8")
    })?;
    Ok(Some(password))
}

/// Encrypt a password for tests and tooling; the inverse of
/// [`decrypt_password`].
pub fn encrypt_password(password: &str, key: &str, iv: &str) -> Result<String, SourceError> {
    let key_bytes = Sha256::digest(key.as_bytes());
    let nonce_bytes = Sha256::digest(iv.as_bytes());
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes[..12]), password.as_bytes())
        .map_err(|_| SourceError::unknown("password encryption failed"))?;
    Ok(BASE64.encode(ciphertext))
}

#[cfg(test)]
#[path = "secure_cookie_tests.rs"]
mod tests;
