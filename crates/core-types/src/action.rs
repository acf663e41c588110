use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::input::{InputKind, InputRequest};

/// Signatures longer than this are cut to `SIGNATURE_MAX_LEN - 3` chars plus `...`.
pub const SIGNATURE_MAX_LEN: usize = 80;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

/// One step proposed by the oracle.
///
/// The set is closed: anything the oracle emits that does not deserialize
/// into one of these variants is rejected before it reaches the loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Navigate {
        url: String,
    },
    Fill {
        selector: String,
        #[serde(alias = "text")]
        value: String,
        /// Explicit sensitivity annotation from the proposer.
        #[serde(default, skip_serializing_if = "is_false")]
        sensitive: bool,
    },
    Click {
        selector: String,
    },
    Submit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Press {
        selector: String,
        key: String,
    },
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
    },
    /// Items the oracle read off the current page; collected as job results.
    Extract {
        #[serde(default)]
        items: Vec<Value>,
    },
    #[serde(alias = "request_user_input")]
    RequestInput {
        #[serde(alias = "input_type")]
        kind: InputKind,
        prompt: String,
        #[serde(default, alias = "is_sensitive")]
        sensitive: bool,
    },
    #[serde(alias = "finish")]
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Abort {
        #[serde(default)]
        reason: String,
    },
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Fill { .. } => "fill",
            Action::Click { .. } => "click",
            Action::Submit { .. } => "submit",
            Action::Press { .. } => "press",
            Action::Scroll { .. } => "scroll",
            Action::Extract { .. } => "extract",
            Action::RequestInput { .. } => "request_input",
            Action::Complete { .. } => "complete",
            Action::Abort { .. } => "abort",
        }
    }

    /// True for actions the driver executes against the page.
    pub fn is_driver_bound(&self) -> bool {
        !matches!(
            self,
            Action::RequestInput { .. }
                | Action::Extract { .. }
                | Action::Complete { .. }
                | Action::Abort { .. }
        )
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self, Action::Navigate { .. })
    }

    /// Turns a `request_input` action into the request it describes.
    ///
    /// Secret kinds stay sensitive even if the proposer left the flag off.
    pub fn input_request(&self) -> Option<InputRequest> {
        match self {
            Action::RequestInput {
                kind,
                prompt,
                sensitive,
            } => Some(InputRequest {
                kind: *kind,
                prompt: prompt.clone(),
                sensitive: *sensitive || kind.is_secret(),
            }),
            _ => None,
        }
    }

    /// Short identity used to spot repeated failing actions.
    ///
    /// Values of sensitive fills never take part, so a secret cannot leak
    /// through a signature.
    pub fn signature(&self) -> String {
        let raw = match self {
            Action::Navigate { url } => format!("navigate|url={url}"),
            Action::Fill {
                selector,
                value,
                sensitive,
            } => {
                if *sensitive || value.trim().is_empty() {
                    format!("fill|selector={selector}")
                } else {
                    format!("fill|selector={selector}|text={}", value.trim())
                }
            }
            Action::Click { selector } => format!("click|selector={selector}"),
            Action::Submit { selector } => match selector {
                Some(selector) => format!("submit|selector={selector}"),
                None => "submit".to_string(),
            },
            Action::Press { selector, key } => format!("press|selector={selector}|key={key}"),
            Action::Scroll { direction } => format!("scroll|direction={direction:?}"),
            Action::Extract { items } => format!("extract|items={}", items.len()),
            Action::RequestInput { kind, prompt, .. } => {
                format!("request_input|kind={kind}|text={prompt}")
            }
            Action::Complete { .. } => "complete".to_string(),
            Action::Abort { .. } => "abort".to_string(),
        };
        truncate_signature(raw)
    }
}

fn truncate_signature(raw: String) -> String {
    if raw.chars().count() <= SIGNATURE_MAX_LEN {
        return raw;
    }
    let mut cut: String = raw.chars().take(SIGNATURE_MAX_LEN - 3).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_actions() {
        let action: Action =
            serde_json::from_str(r##"{"type":"fill","selector":"#email","value":"a@b.com"}"##)
                .unwrap();
        assert_eq!(
            action,
            Action::Fill {
                selector: "#email".into(),
                value: "a@b.com".into(),
                sensitive: false,
            }
        );

        let action: Action = serde_json::from_str(
            r#"{"type":"request_user_input","input_type":"password","prompt":"Password?"}"#,
        )
        .unwrap();
        let request = action.input_request().unwrap();
        assert_eq!(request.kind, InputKind::Password);
        assert!(request.sensitive);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed = serde_json::from_str::<Action>(r#"{"type":"teleport","to":"mars"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn signature_omits_sensitive_fill_values() {
        let action = Action::Fill {
            selector: "#password".into(),
            value: "hunter2".into(),
            sensitive: true,
        };
        let sig = action.signature();
        assert_eq!(sig, "fill|selector=#password");
        assert!(!sig.contains("hunter2"));
    }

    #[test]
    fn signature_keeps_plain_fill_values() {
        let first = Action::Fill {
            selector: "#search".into(),
            value: "rust books".into(),
            sensitive: false,
        };
        let second = Action::Fill {
            selector: "#search".into(),
            value: "rust novels".into(),
            sensitive: false,
        };
        assert_eq!(first.signature(), "fill|selector=#search|text=rust books");
        assert_ne!(first.signature(), second.signature());
    }

    #[test]
    fn scroll_direction_is_lowercase() {
        let action: Action =
            serde_json::from_str(r#"{"type":"scroll","direction":"down"}"#).unwrap();
        assert_eq!(
            action,
            Action::Scroll {
                direction: ScrollDirection::Down
            }
        );
    }

    #[test]
    fn extract_carries_items_and_stays_off_the_driver() {
        let action: Action = serde_json::from_str(
            r#"{"type":"extract","items":[{"title":"A","url":"/a"},{"title":"B"}]}"#,
        )
        .unwrap();
        assert!(!action.is_driver_bound());
        assert_eq!(action.signature(), "extract|items=2");
        match action {
            Action::Extract { items } => assert_eq!(items[0]["url"], "/a"),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn long_signatures_are_truncated() {
        let action = Action::Navigate {
            url: format!("https://example.com/{}", "a".repeat(200)),
        };
        let sig = action.signature();
        assert_eq!(sig.chars().count(), SIGNATURE_MAX_LEN);
        assert!(sig.ends_with("..."));
    }

    #[test]
    fn only_page_actions_are_driver_bound() {
        assert!(Action::Click {
            selector: "#go".into()
        }
        .is_driver_bound());
        assert!(!Action::Abort {
            reason: "stuck".into()
        }
        .is_driver_bound());
    }
}
