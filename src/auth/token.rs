//! Random identifiers for sessions and password resets.
use rand::{rngs::OsRng, RngCore};

/// 256 bits for session ids.
pub const SESSION_ID_BYTES: usize = 32;

/// 160 bits for reset tokens (40 hex characters).
pub const RESET_TOKEN_BYTES: usize = 20;

/// Hex-encoded bytes straight from the OS entropy source.
pub fn generate_token(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buffer);
    hex::encode(buffer)
}

pub fn new_session_id() -> String {
    generate_token(SESSION_ID_BYTES)
}

pub fn new_reset_token() -> String {
    generate_token(RESET_TOKEN_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_have_expected_length_and_differ() {
        let a = new_reset_token();
        let b = new_reset_token();
        assert_eq!(a.len(), 40);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(new_session_id().len(), 64);
    }
}
