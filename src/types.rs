use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_MAX_STEPS: u32 = 25;
pub const VISIBLE_TEXT_MAX_CHARS: usize = 4000;

/// Viewport-relative box of an element, as reported by `getBoundingClientRect`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// One visible, interactive node captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub id: String,
    pub tag: String,
    pub role: Option<String>,
    pub text: String,
    pub placeholder: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub input_type: Option<String>,
    pub aria_label: Option<String>,
    pub css_selector: String,
    pub bounding_rect: Rect,
    pub is_visible: bool,
    pub is_enabled: bool,
}

/// What the reasoning service sees of the page on one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub visible_text: String,
    pub elements: Vec<ElementDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Type,
    Scroll,
    Wait,
    Keypress,
    Navigate,
    Select,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
            ActionKind::Keypress => "keypress",
            ActionKind::Navigate => "navigate",
            ActionKind::Select => "select",
        }
    }

    /// Kinds that operate on a resolved element rather than on the page.
    pub fn needs_target(&self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::Type | ActionKind::Select | ActionKind::Keypress
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

/// A single UI action proposed by the reasoning service.
///
/// The wire format is flat: `type` selects the behaviour and every payload
/// field is optional. Missing payloads are not rejected here; they surface
/// when the action runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<ScrollDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            target_element_id: None,
            text: None,
            key: None,
            direction: None,
            amount: None,
            duration: None,
            url: None,
            note: None,
        }
    }

    pub fn targeting(mut self, id: impl Into<String>) -> Self {
        self.target_element_id = Some(id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Human-readable name used in logs, overlay labels and prompts.
    pub fn describe(&self) -> String {
        match &self.note {
            Some(note) if !note.is_empty() => note.clone(),
            _ => self.kind.as_str().to_string(),
        }
    }

    /// Overlay label: the note, or the kind uppercased.
    pub fn label(&self) -> String {
        match &self.note {
            Some(note) if !note.is_empty() => note.clone(),
            _ => self.kind.as_str().to_uppercase(),
        }
    }
}

/// The reasoning service's reply for one snapshot.
///
/// `actions` has no default: a reply without it does not deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub thought: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub final_message: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outbound payload sent to the reasoning client each iteration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    pub task: String,
    pub snapshot: PageSnapshot,
    pub step_count: u32,
    pub max_steps: u32,
    pub demo_mode: bool,
    /// Zero-based index of the loop iteration that produced `snapshot`.
    pub iteration: u32,
}

/// Fixed delays used to pace the loop and animate the overlay.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub action_delay: Duration,
    pub reobserve_delay: Duration,
    pub cursor_travel: Duration,
    pub cursor_frames: u32,
    pub typing_delay: Duration,
    pub scroll_settle: Duration,
    pub default_wait: Duration,
    pub modal_poll: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            action_delay: Duration::from_millis(600),
            reobserve_delay: Duration::from_millis(800),
            cursor_travel: Duration::from_millis(200),
            cursor_frames: 8,
            typing_delay: Duration::from_millis(400),
            scroll_settle: Duration::from_millis(500),
            default_wait: Duration::from_millis(500),
            modal_poll: Duration::from_millis(150),
        }
    }
}
