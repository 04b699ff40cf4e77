use rand::Rng;
use sha2::{Digest, Sha256};

/// Random bytes per key; 16 bytes gives 128 bits of entropy.
const KEY_BYTES: usize = 24;
const HINT_LEN: usize = 12;

/// A freshly generated key together with what gets stored for it.
pub struct GeneratedKey {
    pub key: String,
    pub key_hash: String,
    pub key_hint: String,
}

/// Generate `<family>_<hex>` from the thread-local CSPRNG.
pub fn generate_api_key(family: &str) -> GeneratedKey {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..KEY_BYTES).map(|_| rng.gen()).collect();
    let key = format!("{}_{}", family, hex::encode(bytes));
    GeneratedKey {
        key_hash: hash_api_key(&key),
        key_hint: key.chars().take(HINT_LEN).collect(),
        key,
    }
}

pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// The family prefix of a presented key, if it has the expected shape.
pub fn key_family(key: &str) -> Option<&str> {
    let (family, random) = key.split_once('_')?;
    let well_formed = !family.is_empty()
        && random.len() == KEY_BYTES * 2
        && random.chars().all(|c| c.is_ascii_hexdigit());
    well_formed.then_some(family)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_carry_family_prefix() {
        let generated = generate_api_key("rbac");
        assert!(generated.key.starts_with("rbac_"));
        assert_eq!(key_family(&generated.key), Some("rbac"));
        assert_eq!(generated.key_hash, hash_api_key(&generated.key));
        assert_ne!(generated.key_hash, generated.key);
    }

    #[test]
    fn keys_do_not_repeat() {
        let keys: HashSet<String> = (0..1000).map(|_| generate_api_key("auth").key).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn malformed_keys_have_no_family() {
        assert_eq!(key_family("nounderscore"), None);
        assert_eq!(key_family("auth_short"), None);
        assert_eq!(key_family(&format!("_{}", "a".repeat(48))), None);
    }
}
