use sha2::{Digest, Sha256};

const DOMAIN: &[u8] = b"molpath-job";

/// Domain-separated SHA-256 digest of a job password. The plain password is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    pub fn new(password: &str) -> Self {
        Self(hash_secret(password))
    }

    pub fn verify(&self, password: &str) -> bool {
        constant_time_eq(hash_secret(password).as_bytes(), self.0.as_bytes())
    }
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN);
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
