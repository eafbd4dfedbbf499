//! # Password hashing and verification: Argon2id
//!
//! [`Passwords`] produces and checks the credential digests stored on each user:
//!
//! - [`hash`](Passwords::hash): generates a random salt via [`OsRng`], hashes the
//!   plaintext with Argon2id using the configured cost parameters, and returns a
//!   PHC-format string (e.g. `$argon2id$v=19$m=19456,t=2,p=1$...`).
//!
//! - [`verify`](Passwords::verify): parses a PHC-format digest and checks the
//!   plaintext against it. The comparison happens inside the `argon2` crate and
//!   does not exit early on the first differing byte. A malformed digest is
//!   logged and counts as a mismatch.
//!
//! Verification reads the cost parameters from the digest itself, so changing
//! the configured costs only affects newly registered users.
//!
//! Both operations are CPU-heavy; async callers run them on the blocking pool.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;

use crate::settings;

/// Argon2id hasher configured with fixed cost parameters.
#[derive(Clone, Debug)]
pub struct Passwords {
    params: Params,
}

impl Passwords {
    pub fn new(settings: &settings::Password) -> Result<Self, String> {
        let params = Params::new(
            settings.memory_kib,
            settings.iterations,
            settings.parallelism,
            None,
        )
        .map_err(|e| format!("Invalid password hashing parameters: {}", e))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password using Argon2id. Returns a PHC-format string.
    pub fn hash(&self, password: &str) -> Result<String, String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| format!("Failed to hash password: {}", e))?;
        Ok(hash.to_string())
    }

    /// Verify a password against a PHC-format hash string.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Stored password digest is malformed: {}", e);
                return false;
            }
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

#[cfg(test)]
pub(crate) fn cheap() -> Passwords {
    Passwords::new(&settings::Password {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let passwords = cheap();
        let hash = passwords.hash("correctpass").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(passwords.verify("correctpass", &hash));
        assert!(!passwords.verify("wrongpass", &hash));
    }

    #[test]
    fn test_salts_differ() {
        let passwords = cheap();
        let a = passwords.hash("correctpass").unwrap();
        let b = passwords.hash("correctpass").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_digest_is_mismatch() {
        assert!(!cheap().verify("correctpass", "-1234567"));
    }

    #[test]
    fn test_rejects_invalid_params() {
        let result = Passwords::new(&settings::Password {
            memory_kib: 0,
            iterations: 0,
            parallelism: 0,
        });
        assert!(result.is_err());
    }
}
