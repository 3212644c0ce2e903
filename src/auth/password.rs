//! Password Hashing
//! Mission: Store bcrypt digests, never plaintext

use anyhow::{bail, Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};

/// bcrypt wrapper with a configurable work factor
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a non-empty password
    pub fn hash_password(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            bail!("Password must not be empty");
        }
        hash(plaintext, self.cost).context("Failed to hash password")
    }

    /// Check a password against a stored hash. Malformed or foreign hashes
    /// are a non-match.
    pub fn verify_password(&self, plaintext: &str, password_hash: &str) -> bool {
        verify(plaintext, password_hash).unwrap_or(false)
    }
}
