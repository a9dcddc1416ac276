/// Peppered, salted password hashing
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;

/// One-way hasher bound to the installation pepper
#[derive(Clone)]
pub struct PasswordHasher {
    pepper: String,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}

impl PasswordHasher {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            pepper: pepper.into(),
        }
    }

    fn digest(&self, salt: &[u8], plain: &str) -> Vec<u8> {
        let mut inner = Sha256::new();
        inner.update(self.pepper.as_bytes());
        inner.update(b":");
        inner.update(salt);
        inner.update(b":");
        inner.update(plain.as_bytes());

        let mut outer = Sha256::new();
        outer.update(inner.finalize());
        outer.update(b"passwd");
        outer.finalize().to_vec()
    }

    /// Hash with a fresh salt; output is base64
    pub fn hash(&self, plain: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        self.encode(&salt, plain)
    }

    fn encode(&self, salt: &[u8], plain: &str) -> String {
        let inner = format!(
            "{}:{}",
            STANDARD.encode(salt),
            STANDARD.encode(self.digest(salt, plain))
        );
        STANDARD.encode(inner)
    }

    /// Constant-time comparison of `plain` against a stored hash
    pub fn verify(&self, plain: &str, stored: &str) -> bool {
        let Some((salt, expected)) = Self::split(stored) else {
            return false;
        };
        let actual = self.digest(&salt, plain);
        actual.ct_eq(&expected).into()
    }

    fn split(stored: &str) -> Option<(Vec<u8>, Vec<u8>)> {
        let raw = String::from_utf8(STANDARD.decode(stored).ok()?).ok()?;
        let (salt, digest) = raw.split_once(':')?;
        Some((STANDARD.decode(salt).ok()?, STANDARD.decode(digest).ok()?))
    }
}
