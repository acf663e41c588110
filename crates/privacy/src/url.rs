use url::Url;

/// Keeps scheme, host, port and path; query values are masked unless allow-listed.
pub fn redact_url(raw: &str, allow_keys: &[String], marker: &str) -> String {
    let Ok(parsed) = Url::parse(raw) else {
        return raw.to_string();
    };

    let mut redacted = format!("{}://", parsed.scheme());
    if let Some(host) = parsed.host_str() {
        redacted.push_str(host);
    }
    if let Some(port) = parsed.port() {
        redacted.push_str(&format!(":{port}"));
    }
    if let Some(path) = parsed.path().strip_prefix('/') {
        if !path.is_empty() {
            redacted.push('/');
            redacted.push_str(path);
        }
    }

    let filtered: Vec<String> = parsed
        .query_pairs()
        .map(|(key, value)| {
            if allow_keys.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
                format!("{key}={value}")
            } else {
                format!("{key}={marker}")
            }
        })
        .collect();
    if !filtered.is_empty() {
        redacted.push('?');
        redacted.push_str(&filtered.join("&"));
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_query() {
        let out = redact_url(
            "https://example.com/search?q=hello&safe=1",
            &["safe".into()],
            "***",
        );
        assert_eq!(out, "https://example.com/search?q=***&safe=1");
    }

    #[test]
    fn keeps_port_and_allowed_error_key() {
        let out = redact_url(
            "http://localhost:8080/login?error=invalid&token=abc",
            &["error".into()],
            "***",
        );
        assert_eq!(out, "http://localhost:8080/login?error=invalid&token=***");
    }

    #[test]
    fn non_urls_pass_through() {
        assert_eq!(redact_url("not a url", &[], "***"), "not a url");
    }
}
