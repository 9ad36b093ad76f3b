//! Heuristic policy deciding which actions need a human's approval.
//!
//! The policy is a plain rule table: structural rules on the element's tag
//! and input type, then keyword rules matched as substrings of the element's
//! lowercased, normalized text. Bump [`RULESET_VERSION`] whenever the default
//! table changes.

use serde::Serialize;

use crate::dom::normalize_text;
use crate::types::{Action, ActionKind, ElementDescriptor};

pub const RULESET_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    FormSubmission,
    Payment,
    Destructive,
    Credential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRule {
    pub category: RiskCategory,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(category: RiskCategory, keywords: &[&str]) -> Self {
        Self {
            category,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

/// Why an action was flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskMatch {
    pub category: RiskCategory,
    /// Keyword that matched, or the structural trigger (`type=submit`, `form`).
    pub trigger: String,
}

#[derive(Debug, Clone)]
pub struct RiskPolicy {
    pub version: u32,
    pub rules: Vec<KeywordRule>,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            version: RULESET_VERSION,
            rules: vec![
                KeywordRule::new(
                    RiskCategory::Payment,
                    &["pay", "card", "cvv", "cvc", "bank", "iban", "routing", "swift"],
                ),
                KeywordRule::new(
                    RiskCategory::Destructive,
                    &[
                        "send", "post", "publish", "submit", "delete", "remove", "destroy", "erase",
                    ],
                ),
                KeywordRule::new(RiskCategory::Credential, &["password", "passcode"]),
            ],
        }
    }
}

impl RiskPolicy {
    pub fn with_rule(mut self, rule: KeywordRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// First rule the action trips, if any. Pure: same input, same answer.
    pub fn classify(&self, action: &Action, element: Option<&ElementDescriptor>) -> Option<RiskMatch> {
        if action.kind == ActionKind::Navigate {
            return None;
        }
        let element = element?;
        if !action.kind.needs_target() {
            return None;
        }

        let input_type = element.input_type.as_deref().unwrap_or_default();
        if input_type.eq_ignore_ascii_case("submit") {
            return Some(RiskMatch {
                category: RiskCategory::FormSubmission,
                trigger: "type=submit".to_string(),
            });
        }
        if element.tag.eq_ignore_ascii_case("form") {
            return Some(RiskMatch {
                category: RiskCategory::FormSubmission,
                trigger: "form".to_string(),
            });
        }

        let haystack = risk_text(element);
        self.rules.iter().find_map(|rule| {
            rule.keywords
                .iter()
                .find(|keyword| !keyword.is_empty() && haystack.contains(keyword.as_str()))
                .map(|keyword| RiskMatch {
                    category: rule.category,
                    trigger: keyword.clone(),
                })
        })
    }

    pub fn is_risky(&self, action: &Action, element: Option<&ElementDescriptor>) -> bool {
        self.classify(action, element).is_some()
    }
}

/// Lowercased, normalized text, aria-label, name and placeholder.
fn risk_text(element: &ElementDescriptor) -> String {
    let joined = [
        element.text.as_str(),
        element.aria_label.as_deref().unwrap_or_default(),
        element.name.as_deref().unwrap_or_default(),
        element.placeholder.as_deref().unwrap_or_default(),
    ]
    .join(" ");
    normalize_text(&joined).to_lowercase()
}
