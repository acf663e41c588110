//! Classifies the page reached after a credential-bearing action.

use std::fmt;

use handoff_core_types::{Action, PageSnapshot};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use url::Url;

static FAILURE_QUERY_KEYS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "error",
        "err",
        "login_error",
        "auth_error",
        "error_code",
        "errorcode",
        "failed",
        "failure",
    ]
});

static FAILURE_PATH_MARKERS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "login-failed",
        "login_failed",
        "loginfailed",
        "signin-failed",
        "auth-error",
        "autherror",
    ]
});

static FAILURE_TEXT_PATTERNS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "invalid credentials",
        "invalid username or password",
        "invalid email or password",
        "invalid login",
        "invalid password",
        "incorrect password",
        "incorrect username or password",
        "incorrect email or password",
        "wrong password",
        "password you entered is incorrect",
        "login failed",
        "authentication failed",
        "couldn't find your account",
        "account not found",
        "invalid code",
        "invalid verification code",
        "incorrect code",
        "code you entered is incorrect",
        "code has expired",
    ]
});

static SUCCESS_TEXT_PATTERNS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "log out",
        "logout",
        "sign out",
        "signout",
        "welcome back",
        "successfully logged in",
        "login successful",
        "my account",
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialOutcome {
    Success,
    Failure,
    Indeterminate,
}

impl CredentialOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialOutcome::Success => "success",
            CredentialOutcome::Failure => "failure",
            CredentialOutcome::Indeterminate => "indeterminate",
        }
    }
}

impl fmt::Display for CredentialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub outcome: CredentialOutcome,
    /// Which marker matched.
    pub reason: Option<String>,
}

impl Classification {
    fn indeterminate() -> Self {
        Self {
            outcome: CredentialOutcome::Indeterminate,
            reason: None,
        }
    }

    fn failure(reason: String) -> Self {
        Self {
            outcome: CredentialOutcome::Failure,
            reason: Some(reason),
        }
    }

    fn success(reason: String) -> Self {
        Self {
            outcome: CredentialOutcome::Success,
            reason: Some(reason),
        }
    }
}

/// Site-specific markers added to the built-in lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierMarkers {
    pub failure_query_keys: Vec<String>,
    pub failure_text: Vec<String>,
    pub success_text: Vec<String>,
}

/// Pure function of its inputs; classifying the same snapshot twice
/// always gives the same answer.
#[derive(Debug, Clone, Default)]
pub struct OutcomeClassifier {
    extra: ClassifierMarkers,
}

impl OutcomeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_markers(markers: ClassifierMarkers) -> Self {
        let lower = |items: Vec<String>| {
            items
                .into_iter()
                .map(|item| item.to_lowercase())
                .collect::<Vec<_>>()
        };
        Self {
            extra: ClassifierMarkers {
                failure_query_keys: lower(markers.failure_query_keys),
                failure_text: lower(markers.failure_text),
                success_text: lower(markers.success_text),
            },
        }
    }

    /// Whether `action` can carry credentials at all.
    ///
    /// `submit` always can; `click` and `press` only right after a human
    /// value was written.
    pub fn is_credential_bearing(action: &Action, awaiting_outcome: bool) -> bool {
        match action {
            Action::Submit { .. } => true,
            Action::Click { .. } | Action::Press { .. } => awaiting_outcome,
            _ => false,
        }
    }

    /// Classifies the page reached by `action`. Non-credential actions are
    /// always indeterminate.
    pub fn classify(&self, action: &Action, snapshot: &PageSnapshot) -> Classification {
        match action {
            Action::Submit { .. } | Action::Click { .. } | Action::Press { .. } => {
                self.classify_page(snapshot)
            }
            _ => Classification::indeterminate(),
        }
    }

    pub fn classify_page(&self, snapshot: &PageSnapshot) -> Classification {
        if let Some(reason) = self.failure_in_url(&snapshot.url) {
            return Classification::failure(reason);
        }

        let text = page_text(snapshot);
        if let Some(pattern) = find_pattern(&text, &FAILURE_TEXT_PATTERNS, &self.extra.failure_text)
        {
            return Classification::failure(format!("page text '{pattern}'"));
        }
        if let Some(pattern) = find_pattern(&text, &SUCCESS_TEXT_PATTERNS, &self.extra.success_text)
        {
            return Classification::success(format!("page text '{pattern}'"));
        }
        Classification::indeterminate()
    }

    fn failure_in_url(&self, raw: &str) -> Option<String> {
        let parsed = Url::parse(raw).ok()?;
        for (key, value) in parsed.query_pairs() {
            let key_lower = key.to_lowercase();
            let listed = FAILURE_QUERY_KEYS.iter().any(|k| *k == key_lower)
                || self.extra.failure_query_keys.iter().any(|k| *k == key_lower);
            if listed && !is_falsy(&value) {
                return Some(format!("url query '{key}={value}'"));
            }
        }
        let path = parsed.path().to_lowercase();
        FAILURE_PATH_MARKERS
            .iter()
            .find(|marker| path.contains(*marker))
            .map(|marker| format!("url path '{marker}'"))
    }
}

fn page_text(snapshot: &PageSnapshot) -> String {
    let mut text = snapshot.visible_text.to_lowercase();
    if let Some(title) = &snapshot.title {
        text.push('\n');
        text.push_str(&title.to_lowercase());
    }
    text
}

fn find_pattern(text: &str, builtin: &[&'static str], extra: &[String]) -> Option<String> {
    builtin
        .iter()
        .find(|pattern| text.contains(*pattern))
        .map(|pattern| pattern.to_string())
        .or_else(|| {
            extra
                .iter()
                .find(|pattern| text.contains(pattern.as_str()))
                .cloned()
        })
}

fn is_falsy(value: &str) -> bool {
    matches!(value.trim(), "" | "0" | "false" | "none" | "null")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit() -> Action {
        Action::Submit { selector: None }
    }

    #[test]
    fn error_query_is_failure() {
        let classifier = OutcomeClassifier::new();
        let snap = PageSnapshot::new("https://site/login?error=invalid", "Sign in");
        let result = classifier.classify(&submit(), &snap);
        assert_eq!(result.outcome, CredentialOutcome::Failure);
        assert_eq!(result.reason.as_deref(), Some("url query 'error=invalid'"));
    }

    #[test]
    fn empty_error_query_is_ignored() {
        let classifier = OutcomeClassifier::new();
        let snap = PageSnapshot::new("https://site/login?error=", "Sign in");
        assert_eq!(
            classifier.classify(&submit(), &snap).outcome,
            CredentialOutcome::Indeterminate
        );
    }

    #[test]
    fn invalid_credentials_text_is_failure() {
        let classifier = OutcomeClassifier::new();
        let snap = PageSnapshot::new("https://site/login", "Error: Invalid Credentials. Try again.");
        assert_eq!(
            classifier.classify(&submit(), &snap).outcome,
            CredentialOutcome::Failure
        );
    }

    #[test]
    fn failure_beats_success_markers() {
        let classifier = OutcomeClassifier::new();
        let snap = PageSnapshot::new("https://site/account", "Wrong password | Sign out");
        assert_eq!(
            classifier.classify(&submit(), &snap).outcome,
            CredentialOutcome::Failure
        );
    }

    #[test]
    fn logout_link_is_success() {
        let classifier = OutcomeClassifier::new();
        let snap = PageSnapshot::new("https://site/home", "Welcome back, Ada. Log out");
        assert_eq!(
            classifier.classify(&submit(), &snap).outcome,
            CredentialOutcome::Success
        );
    }

    #[test]
    fn unmarked_page_is_indeterminate() {
        let classifier = OutcomeClassifier::new();
        let snap = PageSnapshot::new("https://site/next", "Loading...");
        assert_eq!(
            classifier.classify(&submit(), &snap).outcome,
            CredentialOutcome::Indeterminate
        );
    }

    #[test]
    fn classification_is_idempotent() {
        let classifier = OutcomeClassifier::new();
        let snaps = [
            PageSnapshot::new("https://site/login?error=invalid", ""),
            PageSnapshot::new("https://site/home", "Sign out"),
            PageSnapshot::new("https://site/", "hello"),
            PageSnapshot::new("not a url", "incorrect code"),
        ];
        for snap in &snaps {
            let first = classifier.classify(&submit(), snap);
            let second = classifier.classify(&submit(), snap);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn non_credential_actions_are_indeterminate() {
        let classifier = OutcomeClassifier::new();
        let snap = PageSnapshot::new("https://site/login?error=invalid", "");
        let nav = Action::Navigate {
            url: "https://site/login".into(),
        };
        assert_eq!(
            classifier.classify(&nav, &snap).outcome,
            CredentialOutcome::Indeterminate
        );
        assert!(!OutcomeClassifier::is_credential_bearing(&nav, true));
        let click = Action::Click {
            selector: "#login".into(),
        };
        assert!(!OutcomeClassifier::is_credential_bearing(&click, false));
        assert!(OutcomeClassifier::is_credential_bearing(&click, true));
    }

    #[test]
    fn custom_markers_are_honoured() {
        let classifier = OutcomeClassifier::with_markers(ClassifierMarkers {
            failure_query_keys: vec!["Denied".into()],
            failure_text: vec!["Zugangsdaten ungültig".into()],
            success_text: vec![],
        });
        let snap = PageSnapshot::new("https://site/login?denied=1", "");
        assert_eq!(
            classifier.classify_page(&snap).outcome,
            CredentialOutcome::Failure
        );
        let snap = PageSnapshot::new("https://site/login", "Zugangsdaten ungültig");
        assert_eq!(
            classifier.classify_page(&snap).outcome,
            CredentialOutcome::Failure
        );
    }
}
