//! Request authentication.
//!
//! - [`hmac`] - Shopify query-string and webhook body signatures
//! - [`session`] - App Bridge session tokens (JWT) for embedded API calls

pub mod hmac;
pub mod session;

pub use self::hmac::{HmacError, verify_query, verify_webhook};
pub use self::session::{
    SessionAuthError, SessionClaims, SessionTokenError, SessionTokenVerifier, authenticate,
    bearer_token,
};

/// Compare two strings in constant time (for equal-length inputs).
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare_equal() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(constant_time_compare("", ""));
    }

    #[test]
    fn test_constant_time_compare_different() {
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hello!"));
        assert!(!constant_time_compare("a", ""));
    }
}
