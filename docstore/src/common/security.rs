use crate::common::MIN_KEY_LENGTH;
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use secure_string::SecureString;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

const MAX_SIMPLE_RUN: usize = 6;
const MIN_UNIQUE_DENSITY: f64 = 0.25;
const KEYBOARD_ROWS: [&str; 4] = ["1234567890", "qwertyuiop", "asdfghjkl", "zxcvbnm"];

/// A validated encryption secret.
///
/// The secret lives in a [SecureString] so it is zeroed when dropped and
/// never shows up in `Debug` output. It is never persisted; only the
/// derived 256-bit key is used by the cipher.
#[derive(Clone)]
pub struct EncryptionKey {
    secret: Arc<SecureString>,
}

impl EncryptionKey {
    /// Validates the secret and wraps it.
    ///
    /// # Errors
    ///
    /// Returns `SecurityError` when the secret is shorter than 32 characters
    /// or looks weak (see [validate_encryption_key]).
    pub fn new(secret: &str) -> DocStoreResult<Self> {
        validate_encryption_key(secret)?;
        Ok(EncryptionKey {
            secret: Arc::new(SecureString::from(secret.to_string())),
        })
    }

    /// SHA-256 digest of the secret, used as the AES-256 key.
    pub fn derive(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.unsecure().as_bytes());
        hasher.finalize().into()
    }
}

impl Debug for EncryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey(***)")
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.derive() == other.derive()
    }
}

/// Checks that a secret is long enough and not trivially guessable.
///
/// Rejects secrets that are
/// - shorter than 32 characters
/// - one repeated character
/// - containing a run of six or more sequential or keyboard-adjacent characters
/// - built from fewer than 25% unique characters
///
/// This is a heuristic; passing it says nothing about actual entropy.
pub fn validate_encryption_key(secret: &str) -> DocStoreResult<()> {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < MIN_KEY_LENGTH {
        log::error!("Encryption key must be at least {} characters", MIN_KEY_LENGTH);
        return Err(DocStoreError::new(
            &format!("Encryption key must be at least {} characters", MIN_KEY_LENGTH),
            ErrorKind::SecurityError,
        ));
    }

    if let Some(reason) = weakness(&chars) {
        log::error!("Encryption key rejected: {}", reason);
        return Err(DocStoreError::new(
            &format!("Encryption key rejected: {}", reason),
            ErrorKind::SecurityError,
        ));
    }
    Ok(())
}

fn weakness(chars: &[char]) -> Option<&'static str> {
    let first = chars.first()?;
    if chars.iter().all(|c| c == first) {
        return Some("key repeats a single character");
    }

    let lowered: Vec<char> = chars.iter().flat_map(|c| c.to_lowercase()).collect();
    if has_sequential_run(&lowered) || has_keyboard_run(&lowered) {
        return Some("key contains a sequential or keyboard run");
    }

    let unique: HashSet<&char> = chars.iter().collect();
    if (unique.len() as f64) / (chars.len() as f64) < MIN_UNIQUE_DENSITY {
        return Some("key has too few unique characters");
    }
    None
}

fn has_sequential_run(chars: &[char]) -> bool {
    let mut ascending = 1;
    let mut descending = 1;
    for pair in chars.windows(2) {
        let (a, b) = (pair[0] as i64, pair[1] as i64);
        ascending = if b - a == 1 { ascending + 1 } else { 1 };
        descending = if a - b == 1 { descending + 1 } else { 1 };
        if ascending >= MAX_SIMPLE_RUN || descending >= MAX_SIMPLE_RUN {
            return true;
        }
    }
    false
}

fn has_keyboard_run(chars: &[char]) -> bool {
    let text: String = chars.iter().collect();
    KEYBOARD_ROWS.iter().any(|row| {
        let row: Vec<char> = row.chars().collect();
        row.windows(MAX_SIMPLE_RUN).any(|window| {
            let forward: String = window.iter().collect();
            let backward: String = window.iter().rev().collect();
            text.contains(&forward) || text.contains(&backward)
        })
    })
}

/// Lowercase hex SHA-256 digest of the text.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG: &str = "v8#Lq2!rTz9@Wm4$Kp7&Xn1*Bc6^Hd3%";

    #[test]
    fn accepts_strong_key() {
        assert!(validate_encryption_key(STRONG).is_ok());
        assert!(EncryptionKey::new(STRONG).is_ok());
    }

    #[test]
    fn rejects_short_key() {
        let err = validate_encryption_key("short-but-random-9x!").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SecurityError);
    }

    #[test]
    fn rejects_single_character_key() {
        assert!(validate_encryption_key(&"a".repeat(40)).is_err());
    }

    #[test]
    fn rejects_sequential_runs() {
        assert!(validate_encryption_key("Zq8!abcdefWm4$Kp7&Xn1*Bc6^Hd3%Lr").is_err());
        assert!(validate_encryption_key("Zq8!987654Wm4$Kp7&Xn1*Bc6^Hd3%Lr").is_err());
    }

    #[test]
    fn rejects_keyboard_runs() {
        assert!(validate_encryption_key("Zq8!QWERTYWm4$Kp7&Xn1*Bc6^Hd3%Lr").is_err());
        assert!(validate_encryption_key("Zq8!lkjhgfWm4$Kp7&Xn1*Bc6^Hd3%Lr").is_err());
    }

    #[test]
    fn rejects_low_density_key() {
        assert!(validate_encryption_key("abababababababababababababababac1").is_err());
        assert!(validate_encryption_key("a1b2c3a1b2c3a1b2c3a1b2c3a1b2c3a1").is_err());
    }

    #[test]
    fn derived_key_is_stable() {
        let a = EncryptionKey::new(STRONG).unwrap();
        let b = EncryptionKey::new(STRONG).unwrap();
        assert_eq!(a.derive(), b.derive());
        assert_eq!(a, b);
        assert_eq!(format!("{:?}", a), "EncryptionKey(***)");
    }

    #[test]
    fn sha256_hex_digest() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
