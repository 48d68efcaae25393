//! Password utilities

use argon2::Argon2;
use argon2::password_hash::PasswordHash;
use argon2::password_hash::PasswordHasher;
use argon2::password_hash::PasswordVerifier;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;

pub use argon2::password_hash::Error as HashError;

/// Generate a new password
pub fn generate() -> String {
    SaltString::generate(&mut OsRng).to_string()
}

/// Hash a given password
pub fn hash(password: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);

    let argon2 = Argon2::default();

    let hashed_password = argon2.hash_password(password.as_bytes(), &salt)?;

    Ok(hashed_password.to_string())
}

/// Verify a given password against a given hash
///
/// A malformed hash never verifies
pub fn verify(hashed_password: &str, password: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hashed_password) else {
        return false;
    };

    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Derive the initial password of a student from their Moodle ID
pub fn derive_student_password(moodle_id: &str) -> String {
    format!("{}@Apsit", moodle_id.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hashed = hash("verysecret").unwrap();

        assert!(verify(&hashed, "verysecret"));
        assert!(!verify(&hashed, "notsecret"));
        assert!(!verify("not-a-hash", "verysecret"));
    }

    #[test]
    fn test_derive_student_password() {
        assert_eq!(derive_student_password("S1"), "S1@Apsit");
        assert_eq!(derive_student_password(" 21104001 "), "21104001@Apsit");
    }
}
