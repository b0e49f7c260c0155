//! Password hashing and verification using Argon2id

use crate::{config::SecurityConfig, error::AppError};
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use once_cell::sync::OnceCell;

/// Password hasher with configurable parameters
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    /// 按相同参数生成的占位哈希，首次使用时计算
    dummy_hash: OnceCell<String>,
}

impl PasswordHasher {
    /// Create hasher with default parameters (OWASP recommended)
    pub fn new() -> Self {
        // m=64MiB, t=3 iterations, p=4 lanes
        Self::with_params(65536, 3, 4)
    }

    /// Create hasher with explicit cost parameters
    ///
    /// Falls back to the argon2 crate defaults when the parameters are rejected.
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        let params = Params::new(memory_kib, iterations, parallelism, None).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid Argon2 params, using defaults");
            Params::default()
        });

        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy_hash: OnceCell::new(),
        }
    }

    /// Hash a password
    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!("Failed to hash password: {:?}", e);
                AppError::Internal(format!("Failed to hash password: {}", e))
            })?
            .to_string();

        Ok(password_hash)
    }

    /// Verify a password against a hash
    ///
    /// Returns `Ok(false)` on mismatch and an error only for malformed hashes.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| {
            tracing::debug!("Failed to parse password hash: {:?}", e);
            AppError::Internal(format!("Failed to parse password hash: {}", e))
        })?;

        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Run a full verification against a placeholder hash and always return `false`
    ///
    /// Used for unknown accounts so they cost the same as a wrong password.
    pub fn verify_dummy(&self, password: &str) -> Result<bool, AppError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.hash("bostarter-placeholder"))?;
        self.verify(password, hash)?;
        Ok(false)
    }

    /// Validate password against policy, returning every violated rule
    pub fn validate_password_policy(password: &str, policy: &SecurityConfig) -> Vec<String> {
        let mut errors = Vec::new();

        if password.chars().count() < policy.password_min_length {
            errors.push(format!(
                "La password deve avere almeno {} caratteri",
                policy.password_min_length
            ));
        }

        if policy.password_require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            errors.push("La password deve contenere almeno una lettera maiuscola".to_string());
        }

        if policy.password_require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push("La password deve contenere almeno un numero".to_string());
        }

        errors
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::with_params(1024, 1, 1)
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("alicepw").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("alicepw", &hash).unwrap());
        assert!(!hasher.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn test_hash_is_different_each_time() {
        let hasher = fast_hasher();
        let hash1 = hasher.hash("alicepw").unwrap();
        let hash2 = hasher.hash("alicepw").unwrap();

        // Hashes should be different due to salt
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_verify_dummy_never_matches() {
        let hasher = fast_hasher();

        assert!(!hasher.verify_dummy("bostarter-placeholder").unwrap());
        assert!(!hasher.verify_dummy("alicepw").unwrap());

        // 占位哈希与真实哈希使用相同的代价参数
        let dummy = hasher.dummy_hash.get().unwrap();
        assert!(dummy.starts_with("$argon2id$"));
        assert!(dummy.contains("m=1024,t=1,p=1"));
    }

    #[test]
    fn test_verify_malformed_hash() {
        assert!(fast_hasher().verify("alicepw", "not-a-hash").is_err());
    }
}
