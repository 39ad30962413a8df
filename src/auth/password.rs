use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

use crate::config::HashConfig;

/// Argon2id hashing with a fresh salt per call; the salt and cost parameters
/// live inside the PHC string, so verification needs nothing else.
#[derive(Clone)]
pub struct Hasher {
    argon2: Argon2<'static>,
}

impl Default for Hasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl Hasher {
    pub fn new(cfg: &HashConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Constant-time comparison. A malformed stored hash is reported as a
    /// mismatch, never as an error.
    pub fn verify(&self, plain: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "stored password hash is malformed");
                return false;
            }
        };
        self.argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }

    pub async fn hash_blocking(&self, plain: String) -> anyhow::Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plain)).await?
    }

    pub async fn verify_blocking(&self, plain: String, hash: String) -> bool {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) fn fast_hasher() -> Hasher {
    Hasher::new(&HashConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    })
    .expect("valid test params")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = fast_hasher();
        for password in ["Secur3P@ssw0rd!", "correct horse battery staple", "ü-ñ-ø"] {
            let hash = hasher.hash(password).expect("hashing should succeed");
            assert_ne!(hash, password);
            assert!(hasher.verify(password, &hash));
        }
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = fast_hasher();
        let hash = hasher.hash("correct-horse-battery-staple").unwrap();
        assert!(!hasher.verify("wrong-password", &hash));
    }

    #[test]
    fn verify_returns_false_on_malformed_hash() {
        let hasher = fast_hasher();
        assert!(!hasher.verify("anything", "not-a-valid-hash"));
        assert!(!hasher.verify("anything", ""));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let hasher = fast_hasher();
        let a = hasher.hash("repeat-me").unwrap();
        let b = hasher.hash("repeat-me").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn default_hasher_verifies_fast_hash() {
        // parameters come from the PHC string, not the verifier
        let hash = fast_hasher().hash("pw-123456").unwrap();
        assert!(Hasher::default().verify("pw-123456", &hash));
    }

    #[test]
    fn rejects_invalid_params() {
        let cfg = HashConfig {
            memory_kib: 0,
            iterations: 0,
            parallelism: 0,
        };
        assert!(Hasher::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn blocking_variants_agree() {
        let hasher = fast_hasher();
        let hash = hasher.hash_blocking("pw-abcdefg".into()).await.unwrap();
        assert!(hasher.verify_blocking("pw-abcdefg".into(), hash.clone()).await);
        assert!(!hasher.verify_blocking("nope".into(), hash).await);
    }
}
