/// Generic stand-in for a value that must not be shown.
pub const REDACTED: &str = "[REDACTED]";

/// Marker recorded in place of a human-supplied secret, e.g. `[SENSITIVE PASSWORD PROVIDED]`.
pub fn sensitive_marker(kind: &str) -> String {
    format!("[SENSITIVE {} PROVIDED]", kind.to_uppercase())
}

/// Replaces every occurrence of `secret` inside `text`.
pub fn scrub_secret(text: &str, secret: &str) -> String {
    if secret.is_empty() || !text.contains(secret) {
        return text.to_string();
    }
    text.replace(secret, REDACTED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_names_the_kind() {
        assert_eq!(sensitive_marker("otp"), "[SENSITIVE OTP PROVIDED]");
    }

    #[test]
    fn scrubs_embedded_secret() {
        let out = scrub_secret("typed S3cr3t! into #pw", "S3cr3t!");
        assert_eq!(out, "typed [REDACTED] into #pw");
        assert_eq!(scrub_secret("nothing here", ""), "nothing here");
    }
}
