//! One-shot secrets.
//!
//! Generated credentials and console passwords are visible exactly once, at
//! creation time. [`Secret`] cannot be cloned or serialized, prints redacted,
//! and yields its value only by being consumed.

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use std::fmt;

const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()_+-=[]{}|";

/// Shortest console password we will generate.
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Default console password length.
pub const DEFAULT_PASSWORD_LENGTH: usize = 16;

/// A secret value that can be read once.
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Consume the secret and return its value.
    pub fn expose(self) -> String {
        self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// What kind of secret was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretKind {
    /// Access key; the id is not secret, the secret access key is
    AccessKey { access_key_id: String },
    /// Console password; must be changed at first sign-in
    ConsolePassword,
}

/// A secret issued to one identity during apply.
#[derive(Debug)]
pub struct IssuedSecret {
    pub identity: String,
    pub kind: SecretKind,
    pub secret: Secret,
}

/// Generate a console password containing upper, lower, digit and symbol
/// characters. Lengths below [`MIN_PASSWORD_LENGTH`] are raised to it.
pub fn generate_password(length: usize) -> Secret {
    let length = length.max(MIN_PASSWORD_LENGTH);
    let mut rng = rand::rng();
    let classes = [UPPER, LOWER, DIGITS, SYMBOLS];

    let mut chars: Vec<u8> = classes
        .iter()
        .filter_map(|class| class.choose(&mut rng).copied())
        .collect();

    let all: Vec<u8> = classes.concat();
    while chars.len() < length {
        let idx = rng.random_range(0..all.len());
        chars.push(all[idx]);
    }
    chars.shuffle(&mut rng);

    Secret(String::from_utf8_lossy(&chars).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(format!("{secret}"), "***");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_generate_password_classes() {
        let password = generate_password(DEFAULT_PASSWORD_LENGTH).expose();
        assert_eq!(password.len(), DEFAULT_PASSWORD_LENGTH);
        assert!(password.bytes().any(|b| UPPER.contains(&b)));
        assert!(password.bytes().any(|b| LOWER.contains(&b)));
        assert!(password.bytes().any(|b| DIGITS.contains(&b)));
        assert!(password.bytes().any(|b| SYMBOLS.contains(&b)));
    }

    #[test]
    fn test_generate_password_minimum_length() {
        let password = generate_password(4).expose();
        assert_eq!(password.len(), MIN_PASSWORD_LENGTH);
    }
}
