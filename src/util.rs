use reqwest::Url;

pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

/// Last non-empty path segment of a URL, ignoring any query or fragment.
pub(crate) fn trailing_segment(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Resolves a (possibly relative) form action against the page it came from.
pub(crate) fn urljoin(base: &Url, path: &str) -> Option<Url> {
    base.join(path.trim()).ok()
}

/// `scheme://host[:port]` of a URL, as sent in an `Origin` header.
pub(crate) fn origin_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .map(|u| u.origin().ascii_serialization())
        .filter(|o| o != "null")
}

/// Replaces characters that cannot appear in a file name on common platforms.
pub(crate) fn sanitize_file_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_segment_strips_query() {
        assert_eq!(
            trailing_segment("https://cdd.example/api/items/LAZ_1-2?token=x").as_deref(),
            Some("LAZ_1-2")
        );
        assert_eq!(
            trailing_segment("https://cdd.example/api/items/abc/").as_deref(),
            Some("abc")
        );
        assert_eq!(trailing_segment("https://cdd.example"), None);
        assert_eq!(trailing_segment(""), None);
    }

    #[test]
    fn urljoin_handles_relative_and_absolute_actions() {
        let page = Url::parse("https://auth.example/realms/r/protocol/openid-connect/auth?x=1").unwrap();
        assert_eq!(
            urljoin(&page, "/realms/r/login-actions/authenticate?code=1")
                .unwrap()
                .as_str(),
            "https://auth.example/realms/r/login-actions/authenticate?code=1"
        );
        assert_eq!(
            urljoin(&page, "https://other.example/post").unwrap().as_str(),
            "https://other.example/post"
        );
    }

    #[test]
    fn origin_drops_path() {
        assert_eq!(
            origin_of("https://auth.example/realms/r/protocol").as_deref(),
            Some("https://auth.example")
        );
        assert_eq!(
            origin_of("http://127.0.0.1:8080/x").as_deref(),
            Some("http://127.0.0.1:8080")
        );
        assert_eq!(origin_of("not a url"), None);
    }

    #[test]
    fn sanitize_keeps_ordinary_ids() {
        assert_eq!(sanitize_file_stem("MDT-2m_1000-2000"), "MDT-2m_1000-2000");
        assert_eq!(sanitize_file_stem("a\\b:c"), "a_b_c");
        assert_eq!(sanitize_file_stem(".."), "unknown");
    }
}
