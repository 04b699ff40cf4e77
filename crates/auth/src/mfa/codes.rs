use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const CODE_DIGITS: usize = 6;

/// Numeric one-time code for SMS and email delivery.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_DIGITS)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_code(code: &str, expected_hash: &str) -> bool {
    hash_code(code).as_bytes().ct_eq(expected_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits_and_verify() {
        let code = generate_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        let hash = hash_code(&code);
        assert!(verify_code(&code, &hash));
        assert!(verify_code(&format!(" {code} "), &hash));
        assert!(!verify_code("not-it", &hash));
    }
}
