use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of value a human is asked for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Text,
    Password,
    Email,
    Phone,
    #[serde(alias = "verification_code", alias = "2fa")]
    Otp,
}

impl InputKind {
    /// Password and OTP values are secrets no matter how the request was flagged.
    pub fn is_secret(self) -> bool {
        matches!(self, InputKind::Password | InputKind::Otp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::Text => "text",
            InputKind::Password => "password",
            InputKind::Email => "email",
            InputKind::Phone => "phone",
            InputKind::Otp => "otp",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending need for human-supplied information.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
    #[serde(alias = "input_type")]
    pub kind: InputKind,
    pub prompt: String,
    #[serde(default, alias = "is_sensitive")]
    pub sensitive: bool,
}

impl InputRequest {
    /// Builds a request whose sensitivity defaults to the kind's secrecy.
    pub fn new(kind: InputKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            sensitive: kind.is_secret(),
        }
    }

    pub fn with_sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    /// Whether the answer must be redacted anywhere outside the engine.
    pub fn is_redacted(&self) -> bool {
        self.sensitive || self.kind.is_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_kinds_are_always_redacted() {
        let req = InputRequest::new(InputKind::Password, "Password").with_sensitive(false);
        assert!(req.is_redacted());
        let req = InputRequest::new(InputKind::Email, "Email");
        assert!(!req.is_redacted());
        assert!(req.with_sensitive(true).is_redacted());
    }

    #[test]
    fn accepts_source_field_aliases() {
        let req: InputRequest = serde_json::from_str(
            r#"{"input_type":"otp","prompt":"Enter the code","is_sensitive":true}"#,
        )
        .unwrap();
        assert_eq!(req.kind, InputKind::Otp);
        assert!(req.sensitive);
    }
}
