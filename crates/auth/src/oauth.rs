//! External identity assertions and username derivation for first-time
//! OAuth sign-in.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::user::USERNAME_MAX_LEN;

/// Upper bound on generated username candidates (the bare base included).
pub const MAX_USERNAME_ATTEMPTS: usize = 1000;

const FALLBACK_USERNAME: &str = "user";

/// Identity asserted by a provider after it has verified the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub email: String,
    /// Stable subject id at the provider.
    pub subject: String,
    pub name: Option<String>,
}

/// Random `state` value binding an authorization redirect to its callback.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Base username: the local part of the email.
///
/// Truncated so that any numeric suffix still fits the column width.
pub fn base_username(email: &str) -> String {
    let local = email.trim().split('@').next().unwrap_or_default();
    if local.is_empty() {
        return FALLBACK_USERNAME.to_string();
    }
    let room = USERNAME_MAX_LEN - suffix_width();
    local.chars().take(room).collect()
}

/// `base`, `base1`, `base2`, … for at most [`MAX_USERNAME_ATTEMPTS`] items.
pub fn username_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    core::iter::once(base.to_string())
        .chain((1..MAX_USERNAME_ATTEMPTS).map(move |n| format!("{base}{n}")))
}

fn suffix_width() -> usize {
    (MAX_USERNAME_ATTEMPTS - 1).to_string().len()
}
