use crate::error::{AuthError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Argon2id hashing on the blocking pool, with at most `concurrency` hashes
/// running at once.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    permits: Arc<Semaphore>,
    /// Verified against when the identity has no password, so unknown and
    /// known emails cost the same.
    dummy_hash: Arc<String>,
}

impl PasswordHasher {
    pub fn new(concurrency: usize) -> Result<Self> {
        Self::with_params(concurrency, Params::default())
    }

    /// Argon2id with explicit memory (KiB) and iteration cost, single lane.
    pub fn with_cost(concurrency: usize, memory_kib: u32, iterations: u32) -> Result<Self> {
        let params =
            Params::new(memory_kib, iterations, 1, None).map_err(|e| AuthError::PasswordHash(e.to_string()))?;
        Self::with_params(concurrency, params)
    }

    pub fn with_params(concurrency: usize, params: Params) -> Result<Self> {
        let dummy_hash = hash_blocking(&params, "authcore-dummy-password-for-timing")?;
        Ok(Self {
            params,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            dummy_hash: Arc::new(dummy_hash),
        })
    }

    /// Hash a password using Argon2id
    pub async fn hash(&self, password: &str) -> Result<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let params = self.params.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hash_blocking(&params, &password)).await?
    }

    /// Verify a password against a stored hash. A missing hash still runs a
    /// full verification and then fails.
    pub async fn verify(&self, password: &str, hash: Option<&str>) -> Result<bool> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let has_hash = hash.is_some();
        let hash = hash.map_or_else(|| self.dummy_hash.as_str().to_string(), str::to_string);
        let password = password.to_string();
        let matched = tokio::task::spawn_blocking(move || verify_blocking(&password, &hash)).await??;
        Ok(has_hash && matched)
    }
}

fn argon2(params: &Params) -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone())
}

fn hash_blocking(params: &Params, password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = argon2(params)
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::PasswordHash(e.to_string()))?
        .to_string();
    Ok(password_hash)
}

fn verify_blocking(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| AuthError::PasswordHash(e.to_string()))?;

    // Parameters come from the PHC string, so older hashes keep verifying.
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::PasswordHash(e.to_string())),
    }
}

/// Validate password strength
pub fn validate_password(password: &str, min_length: usize) -> Result<()> {
    if password.chars().count() < min_length {
        return Err(AuthError::WeakPassword(format!(
            "Password must be at least {} characters",
            min_length
        )));
    }

    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one uppercase letter".to_string(),
        ));
    }

    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one lowercase letter".to_string(),
        ));
    }

    if !password.chars().any(|c| c.is_numeric()) {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one number".to_string(),
        ));
    }

    Ok(())
}

/// Cheap parameters for tests.
#[cfg(test)]
pub(crate) fn test_hasher() -> PasswordHasher {
    PasswordHasher::with_cost(2, 1024, 1).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hasher = test_hasher();
        let hash = hasher.hash("MySecureP@ssw0rd").await.unwrap();

        assert!(hasher.verify("MySecureP@ssw0rd", Some(&hash)).await.unwrap());
        assert!(!hasher.verify("WrongPassword1!", Some(&hash)).await.unwrap());
    }

    #[tokio::test]
    async fn missing_hash_never_verifies() {
        let hasher = test_hasher();
        assert!(!hasher.verify("authcore-dummy-password-for-timing", None).await.unwrap());
    }

    #[test]
    fn test_password_validation() {
        assert!(validate_password("Short1", 8).is_err());
        assert!(validate_password("nouppercase1", 8).is_err());
        assert!(validate_password("NOLOWERCASE1", 8).is_err());
        assert!(validate_password("NoNumbersHere", 8).is_err());
        assert!(validate_password("ValidPassw0rd", 8).is_ok());
        assert!(validate_password("ValidPassw0rd", 16).is_err());
    }
}
