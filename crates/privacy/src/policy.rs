use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PiiRule {
    pub name: String,
    pub pattern: String,
}

/// Redaction settings for public status, events and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionPolicy {
    /// Mask PII patterns in free text. Human secrets are redacted regardless.
    pub mask_pii: bool,
    pub mask_marker: String,
    pub message_max_len: usize,
    pub pii_patterns: Vec<PiiRule>,
    /// Query keys whose values stay readable in redacted URLs.
    pub query_allow_keys: Vec<String>,
    /// JSON keys whose string values are always replaced.
    pub secret_keys: Vec<String>,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            mask_pii: false,
            mask_marker: "***".into(),
            message_max_len: 512,
            pii_patterns: vec![
                PiiRule {
                    name: "email".into(),
                    pattern: r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}".into(),
                },
                PiiRule {
                    name: "phone".into(),
                    pattern: r"\+?\b\d{1,3}[- ]?\(?\d{3}\)?[- ]?\d{3}[- ]?\d{4}\b".into(),
                },
                PiiRule {
                    name: "credit_card".into(),
                    pattern: r"\b(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|3[47][0-9]{13}|6(?:011|5[0-9]{2})[0-9]{12})\b".into(),
                },
                PiiRule {
                    name: "secret_token".into(),
                    pattern: r"(sk|pk|tok)_[A-Za-z0-9]{16,}".into(),
                },
            ],
            query_allow_keys: vec![
                "error".into(),
                "login_error".into(),
                "auth_error".into(),
                "reason".into(),
            ],
            secret_keys: vec![
                "password".into(),
                "passwd".into(),
                "otp".into(),
                "secret".into(),
                "input_value".into(),
            ],
        }
    }
}
