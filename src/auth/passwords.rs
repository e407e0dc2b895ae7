use bcrypt::BcryptError;

/// Work factor for account passwords.
const COST: u32 = 10;

/// Hash a password with a per-hash random salt.
pub fn hash(password: &str) -> Result<String, BcryptError> {
    bcrypt::hash(password, COST)
}

/// Verify a password against a stored hash - constant-time via bcrypt.
/// A malformed hash verifies as false rather than erroring.
pub fn verify(password: &str, stored_hash: &str) -> bool {
    bcrypt::verify(password, stored_hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash("hunter2").unwrap();
        assert!(verify("hunter2", &hash));
        assert!(!verify("hunter3", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let h1 = hash("same-password").unwrap();
        let h2 = hash("same-password").unwrap();
        assert_ne!(h1, h2);
        assert!(verify("same-password", &h1));
        assert!(verify("same-password", &h2));
    }

    #[test]
    fn malformed_hash_verifies_false() {
        assert!(!verify("anything", "not-a-bcrypt-hash"));
    }
}
