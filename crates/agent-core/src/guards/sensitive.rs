//! Sensitive-field guard.
//!
//! Decides the value actually written by a fill action. Secret fields only
//! ever receive the value the human supplied; whatever the oracle proposed
//! for them is dropped.

use std::fmt;
use std::sync::Arc;

use handoff_core_types::InputKind;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::job::JobState;
use crate::metrics;
use crate::registry::ProtectionRegistry;

static SECRET_TOKENS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "password",
        "passwd",
        "pwd",
        "passcode",
        "otp",
        "one-time",
        "onetime",
        "one_time",
        "totp",
        "2fa",
        "mfa",
        "verification-code",
        "verification_code",
        "verificationcode",
        "security-code",
        "security_code",
        "auth-code",
        "auth_code",
    ]
});

static EMAIL_TOKENS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "email",
        "e-mail",
        "mail",
        "username",
        "user_name",
        "login_id",
        "identifier",
    ]
});

static PHONE_TOKENS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "phone",
        "mobile",
        "msisdn",
        "type=\"tel\"",
        "type='tel'",
        "type=tel",
    ]
});

/// Semantic class of a target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    Secret,
    Email,
    Phone,
    Other,
}

impl FieldClass {
    /// Whether a human answer of `kind` belongs in a field of this class.
    pub fn accepts(self, kind: InputKind) -> bool {
        matches!(
            (self, kind),
            (FieldClass::Secret, InputKind::Password)
                | (FieldClass::Secret, InputKind::Otp)
                | (FieldClass::Email, InputKind::Email)
                | (FieldClass::Phone, InputKind::Phone)
        )
    }
}

/// Pluggable field-sensitivity classification.
pub trait FieldSensitivity: Send + Sync + fmt::Debug {
    /// `annotated` is the proposer's explicit sensitivity flag on the fill.
    fn classify(&self, selector: &str, annotated: bool) -> FieldClass;
}

/// Extra selector tokens layered over the built-in lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldTokens {
    pub secret: Vec<String>,
    pub email: Vec<String>,
    pub phone: Vec<String>,
}

/// Substring heuristics on the lowercased selector.
///
/// An explicit annotation always wins, then secret tokens, email, phone.
#[derive(Debug, Clone, Default)]
pub struct HeuristicFieldPolicy {
    extra: FieldTokens,
}

impl HeuristicFieldPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(extra: FieldTokens) -> Self {
        let lower = |tokens: Vec<String>| {
            tokens
                .into_iter()
                .map(|token| token.to_lowercase())
                .collect::<Vec<_>>()
        };
        Self {
            extra: FieldTokens {
                secret: lower(extra.secret),
                email: lower(extra.email),
                phone: lower(extra.phone),
            },
        }
    }

    fn matches(selector: &str, builtin: &[&'static str], extra: &[String]) -> bool {
        builtin.iter().any(|token| selector.contains(token))
            || extra.iter().any(|token| selector.contains(token.as_str()))
    }
}

impl FieldSensitivity for HeuristicFieldPolicy {
    fn classify(&self, selector: &str, annotated: bool) -> FieldClass {
        if annotated {
            return FieldClass::Secret;
        }
        let selector = selector.to_lowercase();
        if Self::matches(&selector, &SECRET_TOKENS, &self.extra.secret) {
            FieldClass::Secret
        } else if Self::matches(&selector, &EMAIL_TOKENS, &self.extra.email) {
            FieldClass::Email
        } else if Self::matches(&selector, &PHONE_TOKENS, &self.extra.phone) {
            FieldClass::Phone
        } else {
            FieldClass::Other
        }
    }
}

/// Which policy rule produced the written value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillRule {
    /// Secret field during a password/OTP flow: the human value replaced the proposal.
    SecretOverride,
    /// Secret field during a password/OTP flow with no human value left: nothing is written.
    Withheld,
    /// Email or phone field matching the request kind.
    SemanticMatch,
    /// The proposal already equals the human value.
    Quoted,
    PassThrough,
}

impl FillRule {
    pub fn as_str(self) -> &'static str {
        match self {
            FillRule::SecretOverride => "secret_override",
            FillRule::Withheld => "withheld",
            FillRule::SemanticMatch => "semantic_match",
            FillRule::Quoted => "quoted",
            FillRule::PassThrough => "pass_through",
        }
    }

    /// The human value was consumed by this fill.
    pub fn consumes(self) -> bool {
        matches!(
            self,
            FillRule::SecretOverride | FillRule::SemanticMatch | FillRule::Quoted
        )
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct FillResolution {
    pub value: String,
    pub rule: FillRule,
    pub class: FieldClass,
    /// The written value must be redacted in history.
    pub sensitive: bool,
    /// Kind of the human request the value answered, if it was consumed.
    pub answered: Option<InputKind>,
}

impl fmt::Debug for FillResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = if self.sensitive { "<redacted>" } else { &self.value };
        f.debug_struct("FillResolution")
            .field("value", &value)
            .field("rule", &self.rule)
            .field("class", &self.class)
            .field("sensitive", &self.sensitive)
            .field("answered", &self.answered)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SensitiveFieldGuard {
    policy: Arc<dyn FieldSensitivity>,
}

impl Default for SensitiveFieldGuard {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicFieldPolicy::new()))
    }
}

impl SensitiveFieldGuard {
    pub fn new(policy: Arc<dyn FieldSensitivity>) -> Self {
        Self { policy }
    }

    pub fn classify(&self, selector: &str, annotated: bool) -> FieldClass {
        self.policy.classify(selector, annotated)
    }

    /// Resolves the value to write into `selector`.
    ///
    /// When the human value is consumed it is cleared from `state`, the
    /// input flow ends, and the job leaves the protection registry.
    pub fn resolve(
        &self,
        state: &mut JobState,
        registry: &ProtectionRegistry,
        selector: &str,
        proposed: &str,
        annotated: bool,
    ) -> FillResolution {
        let class = self.policy.classify(selector, annotated);
        let context_kind = state.request_context().map(|request| request.kind);
        let secret_flow = context_kind.map_or(false, InputKind::is_secret);

        let rule = if secret_flow && class == FieldClass::Secret {
            if state.has_last_response() {
                FillRule::SecretOverride
            } else {
                FillRule::Withheld
            }
        } else if state.has_last_response()
            && context_kind.map_or(false, |kind| class.accepts(kind))
        {
            FillRule::SemanticMatch
        } else if state.last_response() == Some(proposed) && !proposed.is_empty() {
            FillRule::Quoted
        } else {
            FillRule::PassThrough
        };

        let resolution = match rule {
            FillRule::SecretOverride | FillRule::SemanticMatch | FillRule::Quoted => {
                match state.take_response() {
                    Some((value, request)) => {
                        registry.release(state.id());
                        FillResolution {
                            value,
                            rule,
                            class,
                            sensitive: class == FieldClass::Secret || request.is_redacted(),
                            answered: Some(request.kind),
                        }
                    }
                    None => FillResolution {
                        value: proposed.to_string(),
                        rule: FillRule::PassThrough,
                        class,
                        sensitive: class == FieldClass::Secret,
                        answered: None,
                    },
                }
            }
            FillRule::Withheld => FillResolution {
                value: String::new(),
                rule,
                class,
                sensitive: true,
                answered: None,
            },
            FillRule::PassThrough => FillResolution {
                value: proposed.to_string(),
                rule,
                class,
                sensitive: class == FieldClass::Secret,
                answered: None,
            },
        };

        match resolution.rule {
            FillRule::PassThrough => {
                debug!(job_id = %state.id(), selector, class = ?class, "fill value passed through");
            }
            rule => {
                metrics::record_substitution(rule.as_str());
                info!(
                    job_id = %state.id(),
                    selector,
                    rule = rule.as_str(),
                    "sensitive-field guard resolved fill"
                );
            }
        }
        resolution
    }
}
