//! Bearer-token codec (signed JWT, HMAC family).
//!
//! `verify` never explains itself: a forged signature, an expired token and a
//! token missing its email all come back as the same [`InvalidToken`].

use core::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use nearme_core::UserId;

use crate::claims::{AccessClaims, validate_claims};
use crate::{Role, User};

/// The single, uniform verification failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid token")]
pub struct InvalidToken;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("unsupported token algorithm '{0}' (expected HS256, HS384 or HS512)")]
    UnsupportedAlgorithm(String),

    #[error("token signing secret must not be empty")]
    EmptySecret,

    #[error("token ttl must be positive")]
    NonPositiveTtl,

    #[error("token encoding failed: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

/// Identity facts embedded into a token at issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
}

impl TokenSubject {
    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// On-the-wire claim set. Optional fields so that absence surfaces as
/// `InvalidToken` instead of a distinguishable decode error.
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    sub: Option<String>,
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    iat: i64,
    exp: i64,
}

/// Parse an algorithm name, accepting only the symmetric HMAC family.
pub fn parse_algorithm(name: &str) -> Result<Algorithm, TokenError> {
    let unsupported = || TokenError::UnsupportedAlgorithm(name.to_string());
    let alg = Algorithm::from_str(name.trim()).map_err(|_| unsupported())?;
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(alg),
        _ => Err(unsupported()),
    }
}

/// Issues and verifies bearer tokens with one server secret.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    default_ttl: Duration,
}

impl core::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8], algorithm: Algorithm, default_ttl: Duration) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(TokenError::UnsupportedAlgorithm(format!("{algorithm:?}")));
        }
        if default_ttl <= Duration::zero() {
            return Err(TokenError::NonPositiveTtl);
        }
        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            default_ttl,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Sign a token valid from `now` until `now + ttl` (configured default when `None`).
    pub fn issue(
        &self,
        subject: &TokenSubject,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<String, TokenError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl <= Duration::zero() {
            return Err(TokenError::NonPositiveTtl);
        }
        let iat = now.timestamp();
        let claims = WireClaims {
            sub: Some(subject.user_id.to_string()),
            email: Some(subject.email.clone()),
            role: Some(subject.role),
            iat,
            exp: iat + ttl.num_seconds().max(1),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(self.algorithm),
            &claims,
            &self.encoding,
        )?)
    }

    /// Check signature, time window and mandatory fields.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, InvalidToken> {
        let mut validation = Validation::new(self.algorithm);
        // Expiry is checked below against the caller's clock, with no leeway.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        let wire = jsonwebtoken::decode::<WireClaims>(token, &self.decoding, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "bearer token rejected");
                InvalidToken
            })?
            .claims;

        let subject = wire
            .sub
            .as_deref()
            .and_then(|s| s.parse::<UserId>().ok())
            .ok_or(InvalidToken)?;
        let email = wire.email.filter(|e| !e.is_empty()).ok_or(InvalidToken)?;
        let issued_at = DateTime::from_timestamp(wire.iat, 0).ok_or(InvalidToken)?;
        let expires_at = DateTime::from_timestamp(wire.exp, 0).ok_or(InvalidToken)?;

        let claims = AccessClaims {
            subject,
            email,
            role: wire.role,
            issued_at,
            expires_at,
        };

        validate_claims(&claims, now).map_err(|e| {
            tracing::debug!(reason = %e, "bearer token outside validity window");
            InvalidToken
        })?;

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn codec(secret: &str) -> TokenCodec {
        TokenCodec::new(secret.as_bytes(), Algorithm::HS256, Duration::minutes(30)).unwrap()
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: UserId::new(),
            email: "alice@example.com".into(),
            role: Role::User,
        }
    }

    fn sign_raw(secret: &str, claims: &serde_json::Value) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn issued_token_verifies_with_original_claims() {
        let codec = codec("s3cret");
        let subject = subject();
        let now = Utc::now();

        let token = codec.issue(&subject, now, None).unwrap();
        let claims = codec.verify(&token, now).unwrap();

        assert_eq!(claims.subject, subject.user_id);
        assert_eq!(claims.email, subject.email);
        assert_eq!(claims.role, Some(Role::User));
        assert_eq!(claims.expires_at.timestamp(), now.timestamp() + 30 * 60);
    }

    #[test]
    fn expires_exactly_at_exp() {
        let codec = codec("s3cret");
        let now = Utc::now();
        let token = codec.issue(&subject(), now, Some(Duration::seconds(60))).unwrap();
        let exp = codec.verify(&token, now).unwrap().expires_at;

        assert!(codec.verify(&token, exp - Duration::seconds(1)).is_ok());
        assert_eq!(codec.verify(&token, exp), Err(InvalidToken));
        assert_eq!(codec.verify(&token, exp + Duration::hours(1)), Err(InvalidToken));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let now = Utc::now();
        let token = codec("one").issue(&subject(), now, None).unwrap();
        assert_eq!(codec("two").verify(&token, now), Err(InvalidToken));
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(codec("s").verify("not.a.jwt", Utc::now()), Err(InvalidToken));
        assert_eq!(codec("s").verify("", Utc::now()), Err(InvalidToken));
    }

    #[test]
    fn missing_email_or_subject_is_invalid() {
        let now = Utc::now().timestamp();
        let no_email = sign_raw(
            "s",
            &serde_json::json!({ "sub": UserId::new().to_string(), "iat": now, "exp": now + 60 }),
        );
        let no_sub = sign_raw(
            "s",
            &serde_json::json!({ "email": "a@b.co", "iat": now, "exp": now + 60 }),
        );
        let bad_sub = sign_raw(
            "s",
            &serde_json::json!({ "sub": "42", "email": "a@b.co", "iat": now, "exp": now + 60 }),
        );

        let codec = codec("s");
        assert_eq!(codec.verify(&no_email, Utc::now()), Err(InvalidToken));
        assert_eq!(codec.verify(&no_sub, Utc::now()), Err(InvalidToken));
        assert_eq!(codec.verify(&bad_sub, Utc::now()), Err(InvalidToken));
    }

    #[test]
    fn algorithm_confusion_is_rejected() {
        let now = Utc::now();
        let token = TokenCodec::new(b"s", Algorithm::HS512, Duration::minutes(1))
            .unwrap()
            .issue(&subject(), now, None)
            .unwrap();
        assert_eq!(codec("s").verify(&token, now), Err(InvalidToken));
    }

    #[test]
    fn only_hmac_algorithms_are_configurable() {
        assert_eq!(parse_algorithm("HS384").unwrap(), Algorithm::HS384);
        assert!(matches!(parse_algorithm("RS256"), Err(TokenError::UnsupportedAlgorithm(_))));
        assert!(matches!(parse_algorithm("none"), Err(TokenError::UnsupportedAlgorithm(_))));
        assert!(matches!(
            TokenCodec::new(b"", Algorithm::HS256, Duration::minutes(1)),
            Err(TokenError::EmptySecret)
        ));
    }

    #[test]
    fn non_positive_ttl_is_refused() {
        let err = codec("s").issue(&subject(), Utc::now(), Some(Duration::zero()));
        assert!(matches!(err, Err(TokenError::NonPositiveTtl)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: a token verifies at every instant before its ttl elapses and
        /// at none from then on.
        #[test]
        fn valid_iff_before_ttl(ttl_secs in 1i64..86_400, elapsed in 0i64..172_800) {
            let codec = codec("prop-secret");
            let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
            let token = codec.issue(&subject(), now, Some(Duration::seconds(ttl_secs))).unwrap();

            let at = now + Duration::seconds(elapsed);
            prop_assert_eq!(codec.verify(&token, at).is_ok(), elapsed < ttl_secs);
        }
    }
}
