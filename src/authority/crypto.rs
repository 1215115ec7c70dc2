use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of random bytes in an authority credential.
pub const CREDENTIAL_BYTES: usize = 32;

/// A wrapper for the authority credential that keeps it out of logs.
///
/// `Debug` and `Display` print `[REDACTED]`; the value is only reachable
/// through [`SecretString::expose_secret`].
///
/// ```rust
/// use radio_sync::authority::crypto::SecretString;
///
/// let secret = SecretString::new("hunter2");
/// assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
/// assert_eq!(secret.expose_secret(), "hunter2");
/// ```
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl Eq for SecretString {}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // the creation response and the client credential file need the raw value
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString(s))
    }
}

/// Generates a fresh authority credential: 32 random bytes, base64url without padding.
pub fn generate_credential() -> SecretString {
    let mut bytes = [0u8; CREDENTIAL_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    SecretString(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hex SHA-256 of `credential:pepper`, the only form in which a credential is stored.
pub fn hash_credential(credential: &str, pepper: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hasher.update(b":");
    hasher.update(pepper.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks `credential` against a stored hash without leaking where they differ.
pub fn credential_matches(credential: &str, stored_hash_hex: &str, pepper: &str) -> bool {
    let candidate = hash_credential(credential, pepper);
    let (Ok(candidate), Ok(stored)) = (hex::decode(candidate), hex::decode(stored_hash_hex)) else {
        return false;
    };
    constant_time_eq(&candidate, &stored)
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_credential_shape() {
        let credential = generate_credential();
        // 32 bytes -> 43 base64url characters without padding
        assert_eq!(credential.expose_secret().len(), 43);
        assert!(credential
            .expose_secret()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(generate_credential(), credential);
    }

    #[test]
    fn test_hash_is_peppered_sha256() {
        let hash = hash_credential("secret", "");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_credential("secret", ""));
        assert_ne!(hash, hash_credential("secret", "pepper"));
        // sha256("secret:")
        let mut hasher = Sha256::new();
        hasher.update(b"secret:");
        assert_eq!(hash, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_credential_matches() {
        let stored = hash_credential("right", "p");
        assert!(credential_matches("right", &stored, "p"));
        assert!(!credential_matches("wrong", &stored, "p"));
        assert!(!credential_matches("right", &stored, "other"));
        assert!(!credential_matches("right", "not-hex", "p"));
        assert!(!credential_matches("right", "abcd", "p"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hello!"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_secret_string_redacted() {
        let secret = SecretString::new("my_secret");
        assert_eq!(format!("{secret}"), "[REDACTED]");
        assert_eq!(format!("{secret:?}"), "SecretString([REDACTED])");
    }
}
