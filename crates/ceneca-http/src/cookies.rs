//! Builds the `ceneca_session` cookie: httpOnly, SameSite=Lax,
//! Path=/, `Secure` in production, `Max-Age` equal to the session timeout.

use axum_extra::extract::cookie::{Cookie, SameSite};
use std::time::Duration;

use crate::state::SESSION_COOKIE_NAME;

/// Build the `Set-Cookie` value for a newly created session.
#[must_use]
pub fn session_cookie(session_id: String, max_age: Duration, production: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, session_id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(production)
        .max_age(time::Duration::try_from(max_age).unwrap_or(time::Duration::ZERO))
        .build()
}

/// Build a cookie that immediately expires the session cookie (logout).
#[must_use]
pub fn expired_session_cookie(production: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(production)
        .max_age(time::Duration::ZERO)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_carries_expected_attributes() {
        let cookie = session_cookie("sess-1".to_string(), Duration::from_secs(3600), true);
        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.value(), "sess-1");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.secure(), Some(true));
    }

    #[test]
    fn non_production_cookie_is_not_secure() {
        let cookie = session_cookie("sess-1".to_string(), Duration::from_secs(3600), false);
        assert_eq!(cookie.secure(), Some(false));
    }

    #[test]
    fn expired_cookie_has_zero_max_age() {
        let cookie = expired_session_cookie(true);
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
    }
}
