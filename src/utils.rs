use sha2::{Digest, Sha256};

/// Creates a truncated, salted hash of an identifier for safe logging.
///
/// Used wherever a user id would otherwise appear in log output while
/// `logging.enable_user_identifiers` is off.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hash[..4]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_salted() {
        assert_eq!(log_safe_id("u1", "salt"), log_safe_id("u1", "salt"));
        assert_ne!(log_safe_id("u1", "salt"), log_safe_id("u1", "pepper"));
        assert_eq!(log_safe_id("u1", "salt").len(), 8);
    }
}
