use serde::{Deserialize, Serialize};

/// Page state reported by the driver after executing an action.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    #[serde(default, alias = "visibleText")]
    pub visible_text: String,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Driver-side reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, visible_text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            visible_text: visible_text.into(),
            success: true,
            title: None,
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            visible_text: String::new(),
            success: false,
            title: None,
            error: Some(error.into()),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
