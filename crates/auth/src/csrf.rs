//! Double-submit CSRF tokens.
//!
//! The raw value goes into a script-readable cookie; the sealed value
//! (`raw.timestamp.mac`) is handed to the client, which echoes it back in the
//! `X-CSRF-Token` header. A request passes only if the header unseals, within
//! the age window, to exactly the cookie value.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of randomness in the raw token (256 bits).
pub const CSRF_TOKEN_BYTES: usize = 32;

pub const CSRF_COOKIE_NAME: &str = "csrf_token";
pub const CSRF_HEADER_NAME: &str = "X-CSRF-Token";

const MAC_CONTEXT: &[u8] = b"nearme.csrf.v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("csrf signing secret must not be empty")]
    EmptySecret,

    #[error("csrf signing secret rejected: {0}")]
    InvalidKey(String),
}

/// A freshly minted token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfPair {
    /// Goes into the `csrf_token` cookie.
    pub raw: String,
    /// Returned to the caller, echoed back in `X-CSRF-Token`.
    pub signed: String,
}

/// HTTP methods with state-changing semantics. Everything else bypasses the guard.
pub fn requires_csrf(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "POST" | "PUT" | "PATCH" | "DELETE"
    )
}

/// Issues and verifies CSRF pairs with a secret independent of the token secret.
#[derive(Clone)]
pub struct CsrfGuard {
    keyed: HmacSha256,
}

impl core::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CsrfGuard").finish_non_exhaustive()
    }
}

impl CsrfGuard {
    pub fn new(secret: &[u8]) -> Result<Self, CsrfError> {
        if secret.is_empty() {
            return Err(CsrfError::EmptySecret);
        }
        let keyed = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|e| CsrfError::InvalidKey(e.to_string()))?;
        Ok(Self { keyed })
    }

    pub fn issue(&self, now: DateTime<Utc>) -> CsrfPair {
        let mut bytes = [0u8; CSRF_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let raw = URL_SAFE_NO_PAD.encode(bytes);
        let signed = self.seal(&raw, now);
        CsrfPair { raw, signed }
    }

    /// Fail-closed verification of a cookie/header pair.
    pub fn verify(
        &self,
        cookie_value: &str,
        header_value: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match self.unseal(header_value, max_age, now) {
            Some(raw) => {
                raw.len() == cookie_value.len()
                    && bool::from(raw.as_bytes().ct_eq(cookie_value.as_bytes()))
            }
            None => false,
        }
    }

    fn seal(&self, raw: &str, now: DateTime<Utc>) -> String {
        let payload = format!("{raw}.{}", now.timestamp());
        let tag = URL_SAFE_NO_PAD.encode(self.mac(&payload).finalize().into_bytes());
        format!("{payload}.{tag}")
    }

    fn unseal<'a>(&self, sealed: &'a str, max_age: Duration, now: DateTime<Utc>) -> Option<&'a str> {
        let (payload, tag) = sealed.rsplit_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
        self.mac(payload).verify_slice(&tag).ok()?;

        let (raw, issued) = payload.rsplit_once('.')?;
        let issued: i64 = issued.parse().ok()?;
        let age = now.timestamp().checked_sub(issued)?;
        if age < 0 || age > max_age.num_seconds() {
            return None;
        }
        Some(raw)
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(MAC_CONTEXT);
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn guard() -> CsrfGuard {
        CsrfGuard::new(b"csrf-secret").unwrap()
    }

    fn hour() -> Duration {
        Duration::hours(1)
    }

    #[test]
    fn issued_pair_verifies() {
        let now = Utc::now();
        let pair = guard().issue(now);

        assert!(pair.raw.len() >= 22, "at least 128 bits of entropy");
        assert!(guard().verify(&pair.raw, &pair.signed, hour(), now));
    }

    #[test]
    fn pairs_are_unique() {
        let now = Utc::now();
        let a = guard().issue(now);
        let b = guard().issue(now);
        assert_ne!(a.raw, b.raw);
        assert!(!guard().verify(&a.raw, &b.signed, hour(), now));
    }

    #[test]
    fn age_window_is_inclusive_of_max_age() {
        let now = Utc::now();
        let pair = guard().issue(now);

        assert!(guard().verify(&pair.raw, &pair.signed, hour(), now + hour()));
        assert!(!guard().verify(&pair.raw, &pair.signed, hour(), now + hour() + Duration::seconds(1)));
    }

    #[test]
    fn future_timestamp_fails_closed() {
        let now = Utc::now();
        let pair = guard().issue(now + Duration::minutes(5));
        assert!(!guard().verify(&pair.raw, &pair.signed, hour(), now));
    }

    #[test]
    fn other_secret_fails() {
        let now = Utc::now();
        let pair = CsrfGuard::new(b"other").unwrap().issue(now);
        assert!(!guard().verify(&pair.raw, &pair.signed, hour(), now));
    }

    #[test]
    fn header_equal_to_cookie_is_not_a_seal() {
        let now = Utc::now();
        let pair = guard().issue(now);
        assert!(!guard().verify(&pair.raw, &pair.raw, hour(), now));
        assert!(!guard().verify("", "", hour(), now));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert_eq!(CsrfGuard::new(b"").unwrap_err(), CsrfError::EmptySecret);
    }

    #[test]
    fn unsafe_methods() {
        for m in ["POST", "put", "PATCH", "DELETE"] {
            assert!(requires_csrf(m), "{m}");
        }
        for m in ["GET", "HEAD", "OPTIONS", "TRACE"] {
            assert!(!requires_csrf(m), "{m}");
        }
    }

    fn flip_bit(value: &str, index: usize, bit: u8) -> String {
        let mut bytes = value.as_bytes().to_vec();
        let i = index % bytes.len();
        bytes[i] ^= 1 << (bit % 8);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any single-bit mutation of the cookie value is rejected.
        #[test]
        fn cookie_bit_flip_is_rejected(index in 0usize..64, bit in 0u8..8) {
            let now = Utc::now();
            let pair = guard().issue(now);
            let mutated = flip_bit(&pair.raw, index, bit);
            prop_assert!(!guard().verify(&mutated, &pair.signed, hour(), now));
        }

        /// Property: any single-bit mutation of the sealed header is rejected.
        #[test]
        fn header_bit_flip_is_rejected(index in 0usize..256, bit in 0u8..8) {
            let now = Utc::now();
            let pair = guard().issue(now);
            let mutated = flip_bit(&pair.signed, index, bit);
            prop_assert!(!guard().verify(&pair.raw, &mutated, hour(), now));
        }
    }
}
