//! Refresh credential cookie

use axum::http::{header, HeaderMap, HeaderValue};
use identity_core::CookieConfig;

pub const REFRESH_COOKIE: &str = "refresh_token";
const REFRESH_COOKIE_PATH: &str = "/auth";

fn render(config: &CookieConfig, value: &str, max_age: i64) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; Path={}; Max-Age={}; SameSite={}",
        REFRESH_COOKIE, value, REFRESH_COOKIE_PATH, max_age, config.same_site
    );
    if config.secure {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = &config.domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    cookie
}

/// `Set-Cookie` value carrying a refresh credential
pub fn refresh_cookie(config: &CookieConfig, token: &str, max_age_secs: i64) -> Option<HeaderValue> {
    HeaderValue::from_str(&render(config, token, max_age_secs.max(0))).ok()
}

/// `Set-Cookie` value that removes the refresh credential
pub fn clear_refresh_cookie(config: &CookieConfig) -> Option<HeaderValue> {
    HeaderValue::from_str(&render(config, "", 0)).ok()
}

/// Value of a named cookie from every `Cookie` header present
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use identity_core::SameSite;
    use proptest::prelude::*;

    #[test]
    fn test_cookie_attributes() {
        let config = CookieConfig {
            secure: true,
            same_site: SameSite::Strict,
            domain: Some("example.com".into()),
        };
        let value = refresh_cookie(&config, "abc.def", 3600).unwrap();
        assert_eq!(
            value.to_str().unwrap(),
            "refresh_token=abc.def; HttpOnly; Path=/auth; Max-Age=3600; SameSite=Strict; Secure; Domain=example.com"
        );
    }

    #[test]
    fn test_clear_cookie() {
        let config = CookieConfig {
            secure: false,
            same_site: SameSite::Lax,
            domain: None,
        };
        let value = clear_refresh_cookie(&config).unwrap();
        assert_eq!(
            value.to_str().unwrap(),
            "refresh_token=; HttpOnly; Path=/auth; Max-Age=0; SameSite=Lax"
        );
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; refresh_token=tok.en.value; other=1"),
        );
        assert_eq!(
            read_cookie(&headers, REFRESH_COOKIE).as_deref(),
            Some("tok.en.value")
        );
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    proptest! {
        #[test]
        fn cookie_value_survives_round_trip(token in "[A-Za-z0-9_.-]{1,200}") {
            let config = CookieConfig { secure: true, same_site: SameSite::Lax, domain: None };
            let set = refresh_cookie(&config, &token, 60).unwrap();
            // Browsers send back only the name=value pair
            let pair = set.to_str().unwrap().split(';').next().unwrap().to_string();
            let mut headers = HeaderMap::new();
            headers.insert(header::COOKIE, HeaderValue::from_str(&pair).unwrap());
            prop_assert_eq!(read_cookie(&headers, REFRESH_COOKIE), Some(token));
        }
    }
}
