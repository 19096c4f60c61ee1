use sha2::{Digest, Sha256};

const SALT: &str = "examResults";

/// Salted SHA-256, hex encoded. Thin collaborator for register/login; the
/// scoring engine never sees credentials.
pub fn hash_password(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SALT.as_bytes());
    hasher.update(raw.as_bytes());
    hasher.update(SALT.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(raw: &str, stored_hash: &str) -> bool {
    hash_password(raw) == stored_hash
}
