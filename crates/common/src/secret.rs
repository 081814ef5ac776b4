//! Secret wrapper for API keys
//!
//! Keys are redacted in Debug/Display and zeroized on drop. Each secret has a
//! stable, non-reversible fingerprint that the pool uses as the credential id,
//! so logs and health output can name a key without revealing it.

use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

/// Number of hex characters kept from the SHA-256 digest in a fingerprint.
const FINGERPRINT_HEX_LEN: usize = 12;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize + AsRef<[u8]>> Secret<T> {
    /// Stable identifier derived from the secret: `key-` followed by the first
    /// 12 hex characters of its SHA-256 digest.
    ///
    /// The same key always yields the same fingerprint, across processes.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_ref());
        let mut id = String::with_capacity(4 + FINGERPRINT_HEX_LEN);
        id.push_str("key-");
        for byte in digest.iter().take(FINGERPRINT_HEX_LEN / 2) {
            id.push_str(&format!("{byte:02x}"));
        }
        id
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_redacts_debug_and_display() {
        let secret = Secret::new(String::from("AIzaSy-test-key"));
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_secret_exposes_value() {
        let secret = Secret::new(String::from("AIzaSy-test-key"));
        assert_eq!(secret.expose(), "AIzaSy-test-key");
    }

    #[test]
    fn fingerprint_is_stable_and_prefixed() {
        let a = Secret::new(String::from("AIzaSy-one"));
        let b = Secret::new(String::from("AIzaSy-one"));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.fingerprint().starts_with("key-"));
        assert_eq!(a.fingerprint().len(), 4 + FINGERPRINT_HEX_LEN);
    }

    #[test]
    fn fingerprint_differs_between_keys() {
        let a = Secret::new(String::from("AIzaSy-one"));
        let b = Secret::new(String::from("AIzaSy-two"));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_does_not_contain_secret() {
        let secret = Secret::new(String::from("abcdef"));
        assert!(!secret.fingerprint().contains("abcdef"));
    }
}
