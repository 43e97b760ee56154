//! Credential primitives and access policy.
//!
//! Pure building blocks: no HTTP, no storage. Callers pass the current time in.

pub mod claims;
pub mod csrf;
pub mod oauth;
pub mod password;
pub mod policy;
pub mod roles;
pub mod session;
pub mod token;
pub mod user;

pub use claims::{AccessClaims, TokenValidationError, validate_claims};
pub use csrf::{CSRF_COOKIE_NAME, CSRF_HEADER_NAME, CsrfError, CsrfGuard, CsrfPair, requires_csrf};
pub use oauth::{
    ExternalIdentity, MAX_USERNAME_ATTEMPTS, base_username, generate_state, username_candidates,
};
pub use password::{HashingCost, PasswordError, PasswordHasher, validate_password};
pub use policy::{AuthzError, authorize, ensure_active};
pub use roles::Role;
pub use session::{ClientMeta, NewSession, Session, SessionStats, generate_session_token};
pub use token::{InvalidToken, TokenCodec, TokenError, TokenSubject, parse_algorithm};
pub use user::{NewUser, User, normalize_email, validate_email, validate_full_name, validate_username};
