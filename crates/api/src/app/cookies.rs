use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use nearme_auth::CSRF_COOKIE_NAME;

use super::services::CookieSettings;

pub const SESSION_COOKIE_NAME: &str = "session_token";
pub const OAUTH_STATE_COOKIE_NAME: &str = "oauth_state";

/// Lifetime of the OAuth `state` round trip, in seconds.
pub const OAUTH_STATE_MAX_AGE_SECONDS: i64 = 600;

fn seconds(d: chrono::Duration) -> time::Duration {
    time::Duration::seconds(d.num_seconds())
}

/// HttpOnly session cookie, lives as long as the bearer token.
pub fn with_session(jar: CookieJar, settings: &CookieSettings, token: String) -> CookieJar {
    jar.add(
        Cookie::build((SESSION_COOKIE_NAME, token))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(settings.secure)
            .path("/")
            .max_age(seconds(settings.session_max_age)),
    )
}

/// Script-readable so the client can pair it with the sealed header value.
pub fn with_csrf(jar: CookieJar, settings: &CookieSettings, raw: String) -> CookieJar {
    jar.add(
        Cookie::build((CSRF_COOKIE_NAME, raw))
            .http_only(false)
            .same_site(SameSite::Strict)
            .secure(settings.secure)
            .path("/")
            .max_age(seconds(settings.csrf_max_age)),
    )
}

pub fn with_oauth_state(jar: CookieJar, settings: &CookieSettings, state: String) -> CookieJar {
    jar.add(
        Cookie::build((OAUTH_STATE_COOKIE_NAME, state))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(settings.secure)
            .path("/")
            .max_age(time::Duration::seconds(OAUTH_STATE_MAX_AGE_SECONDS)),
    )
}

pub fn without(jar: CookieJar, name: &'static str) -> CookieJar {
    jar.remove(Cookie::build(name).path("/"))
}

pub fn value<'a>(jar: &'a CookieJar, name: &str) -> Option<&'a str> {
    jar.get(name).map(|c| c.value()).filter(|v| !v.is_empty())
}
