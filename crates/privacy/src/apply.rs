use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::{PrivacyError, PrivacyResult};
use crate::policy::RedactionPolicy;
use crate::text::{mask_pii, truncate};
use crate::url::redact_url;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RedactReport {
    pub applied: bool,
    pub fields: Vec<String>,
}

/// A compiled [`RedactionPolicy`].
#[derive(Debug, Clone)]
pub struct Redactor {
    policy: RedactionPolicy,
    rules: Vec<Regex>,
}

impl Default for Redactor {
    fn default() -> Self {
        // Built-in patterns are known to compile.
        Self::new(RedactionPolicy::default()).unwrap_or_else(|_| Self {
            policy: RedactionPolicy::default(),
            rules: Vec::new(),
        })
    }
}

impl Redactor {
    pub fn new(policy: RedactionPolicy) -> PrivacyResult<Self> {
        let rules = policy
            .pii_patterns
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern).map_err(|source| PrivacyError::InvalidPattern {
                    name: rule.name.clone(),
                    source,
                })
            })
            .collect::<PrivacyResult<Vec<_>>>()?;
        Ok(Self { policy, rules })
    }

    pub fn policy(&self) -> &RedactionPolicy {
        &self.policy
    }

    pub fn text(&self, raw: &str) -> String {
        let masked = if self.policy.mask_pii {
            mask_pii(raw, &self.rules, &self.policy.mask_marker)
        } else {
            raw.to_string()
        };
        truncate(&masked, self.policy.message_max_len)
    }

    pub fn url(&self, raw: &str) -> String {
        redact_url(raw, &self.policy.query_allow_keys, &self.policy.mask_marker)
    }

    /// Redacts a JSON payload in place.
    pub fn json(&self, value: &mut JsonValue) -> RedactReport {
        let mut fields = Vec::new();
        self.redact_value(String::new(), value, &mut fields);
        RedactReport {
            applied: !fields.is_empty(),
            fields,
        }
    }

    fn redact_value(&self, path: String, value: &mut JsonValue, affected: &mut Vec<String>) {
        match value {
            JsonValue::String(current) => {
                let masked = self.text(current);
                if masked != *current {
                    *current = masked;
                    affected.push(path);
                }
            }
            JsonValue::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let nested_path = if path.is_empty() {
                        key.to_string()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    if let Some(raw) = val.as_str() {
                        if self.is_secret_key(key) {
                            *val = JsonValue::String(self.policy.mask_marker.clone());
                            affected.push(nested_path);
                            continue;
                        }
                        if key == "url" || key.ends_with("_url") {
                            let redacted = self.url(raw);
                            if redacted != raw {
                                *val = JsonValue::String(redacted);
                                affected.push(nested_path);
                            }
                            continue;
                        }
                    }
                    self.redact_value(nested_path, val, affected);
                }
            }
            JsonValue::Array(items) => {
                for (idx, item) in items.iter_mut().enumerate() {
                    let nested_path = format!("{}[{}]", path, idx);
                    self.redact_value(nested_path, item, affected);
                }
            }
            _ => {}
        }
    }

    fn is_secret_key(&self, key: &str) -> bool {
        self.policy
            .secret_keys
            .iter()
            .any(|secret| secret.eq_ignore_ascii_case(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PiiRule;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn redacts_secret_keys_and_urls() {
        let redactor = Redactor::default();
        let mut payload = json!({
            "failure_url": "https://site/login?error=invalid&session=abc",
            "password": "S3cr3t!",
            "nested": [{"otp": "123456", "note": "ok"}]
        });
        let report = redactor.json(&mut payload);
        assert!(report.applied);
        assert_eq!(
            payload,
            json!({
                "failure_url": "https://site/login?error=invalid&session=***",
                "password": "***",
                "nested": [{"otp": "***", "note": "ok"}]
            })
        );
    }

    #[test]
    fn masks_pii_only_when_enabled() {
        let mut policy = RedactionPolicy::default();
        let plain = Redactor::new(policy.clone()).unwrap();
        assert_eq!(plain.text("user a@b.com"), "user a@b.com");

        policy.mask_pii = true;
        let masking = Redactor::new(policy).unwrap();
        assert_eq!(masking.text("user a@b.com"), "user ***");
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let policy = RedactionPolicy {
            pii_patterns: vec![PiiRule {
                name: "broken".into(),
                pattern: "(".into(),
            }],
            ..Default::default()
        };
        let err = Redactor::new(policy).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
