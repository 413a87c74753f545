// src/sessions.rs
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower_cookies::cookie::{time::Duration, SameSite};
use tower_cookies::{Cookie, Cookies};

use crate::token::SESSION_LIFETIME_SECS;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "bucket-admin-session";

/// Session cookie: HttpOnly, Secure, SameSite=Strict, whole site, 24h.
pub fn session_cookie(token: String) -> Cookie<'static> {
    let mut c = Cookie::new(COOKIE_NAME, token);
    c.set_http_only(true);
    c.set_secure(true);
    c.set_path("/");
    c.set_same_site(SameSite::Strict);
    c.set_max_age(Duration::seconds(SESSION_LIFETIME_SECS));
    c
}

pub fn start_session(cookies: &Cookies, token: String) {
    cookies.add(session_cookie(token));
}

/// Tells the browser to drop the cookie. The token itself stays valid until it expires.
pub fn end_session(cookies: &Cookies) {
    let mut c = Cookie::from(COOKIE_NAME);
    c.set_path("/");
    cookies.remove(c);
}

pub fn current_token(cookies: &Cookies) -> Option<String> {
    cookies.get(COOKIE_NAME).map(|c| c.value().to_string())
}

/// Constant-time password check.
///
/// Both sides are first reduced to fixed-length tags so that neither the
/// content nor the length of the configured password leaks through timing.
pub fn password_matches(expected: &str, candidate: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(b"bucket-admin/password-check") else {
        return false;
    };
    let mut reference = mac.clone();
    reference.update(expected.as_bytes());
    let expected_tag = reference.finalize().into_bytes();

    mac.update(candidate.as_bytes());
    mac.verify_slice(&expected_tag).is_ok()
}
