//! Public identifier helpers.
//!
//! Every entity is addressed externally by a prefixed opaque id
//! (`app_`, `end_`, `evt_`, `dlv_` followed by 32 lowercase hex characters).
//! Endpoints additionally carry a 24-hex `hook_token` embedded in their
//! capture URL.

use rand::RngCore;
use uuid::Uuid;

pub const APP_PREFIX: &str = "app_";
pub const ENDPOINT_PREFIX: &str = "end_";
pub const EVENT_PREFIX: &str = "evt_";
pub const DELIVERY_PREFIX: &str = "dlv_";

/// Length of a hook token in characters.
pub const HOOK_TOKEN_LEN: usize = 24;

/// Generate a new public id: `<prefix>` + UUIDv4 with dashes stripped.
pub fn generate(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}

/// Check that `id` is `<prefix>` followed by exactly 32 lowercase hex chars.
pub fn is_valid(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .map(|rest| rest.len() == 32 && rest.bytes().all(is_lower_hex))
        .unwrap_or(false)
}

/// Generate a new hook token: 24 lowercase hex characters.
pub fn new_hook_token() -> String {
    let mut bytes = [0u8; HOOK_TOKEN_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Check that `token` has the hook-token shape.
pub fn is_hook_token(token: &str) -> bool {
    token.len() == HOOK_TOKEN_LEN && token.bytes().all(is_lower_hex)
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_shape() {
        let id = generate(EVENT_PREFIX);
        assert!(id.starts_with("evt_"));
        assert_eq!(id.len(), 4 + 32);
        assert!(is_valid(&id, EVENT_PREFIX));
    }

    #[test]
    fn test_is_valid_rejects_wrong_prefix_and_shape() {
        let id = generate(APP_PREFIX);
        assert!(!is_valid(&id, DELIVERY_PREFIX));
        assert!(!is_valid("app_short", APP_PREFIX));
        assert!(!is_valid(
            "app_ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ",
            APP_PREFIX
        ));
        // Uppercase hex is not accepted.
        assert!(!is_valid(
            "app_ABCDEF0123456789ABCDEF0123456789",
            APP_PREFIX
        ));
    }

    #[test]
    fn test_hook_token_shape() {
        let token = new_hook_token();
        assert_eq!(token.len(), 24);
        assert!(is_hook_token(&token));
        assert!(!is_hook_token("deadbeef"));
        assert!(!is_hook_token("DEADBEEFDEADBEEFDEADBEEF"));
        assert!(!is_hook_token("zzzzzzzzzzzzzzzzzzzzzzzz"));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(generate(EVENT_PREFIX), generate(EVENT_PREFIX));
        assert_ne!(new_hook_token(), new_hook_token());
    }
}
