use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Lowercase hex SHA-512 of the concatenation of `parts`.
pub fn sha512_hex(parts: &[&str]) -> String {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Compare two hex digests in constant time, ignoring ASCII case.
pub fn hex_digest_eq(expected: &str, provided: &str) -> bool {
    let expected = expected.trim().to_ascii_lowercase();
    let provided = provided.trim().to_ascii_lowercase();

    if expected.len() != provided.len() {
        return false;
    }

    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Compare two secrets in constant time.
pub fn secret_eq(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    expected.len() == provided.len() && bool::from(expected.ct_eq(provided))
}
