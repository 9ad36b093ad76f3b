//! The seam between the engine and a live document.
//!
//! Everything the engine needs from a page goes through [`Page`]: one bulk
//! capture per snapshot, a handful of element operations addressed by
//! [`NodeRef`], and overlay rendering. The Chrome backend implements it with
//! injected JavaScript; tests implement it in memory.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::types::Rect;

/// Handle to a node stamped during a capture.
///
/// `generation` identifies the capture, `slot` the candidate's position in
/// it. A handle from an older generation never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub generation: u64,
    pub slot: u32,
}

/// One ancestor level used to build a diagnostic selector.
/// Index 0 is the element itself.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathSegment {
    pub tag: String,
    pub classes: Vec<String>,
    /// Number of siblings (including this node) sharing its tag.
    pub same_tag_count: usize,
    /// 1-based position among those siblings.
    pub nth_of_type: usize,
}

/// An interactive candidate exactly as the page reported it, before any
/// filtering or normalization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCandidate {
    pub slot: u32,
    pub tag: String,
    pub dom_id: Option<String>,
    pub role: Option<String>,
    pub text: String,
    pub placeholder: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub input_type: Option<String>,
    pub aria_label: Option<String>,
    pub disabled: bool,
    pub rect: Rect,
    pub display: String,
    pub visibility: String,
    pub path: Vec<PathSegment>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCapture {
    pub url: String,
    pub title: String,
    pub body_text: String,
    pub candidates: Vec<RawCandidate>,
}

/// Synthetic DOM events the executor dispatches. All of them bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomEvent {
    Input,
    Change,
    KeyDown(String),
    KeyUp(String),
}

/// Drawing instructions for the in-page overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayCommand {
    Mount,
    Cursor { x: f64, y: f64 },
    Highlight { rect: Rect, label: String },
    Ripple { x: f64, y: f64 },
    Typing { x: f64, y: f64, visible: bool },
    ShowModal { message: String },
    DismissModal,
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Node is no longer attached to the document")]
    Detached,

    #[error("Script error: {0}")]
    Script(String),

    #[error("Browser error: {0}")]
    Browser(String),
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Stamp and describe every interactive candidate in document order.
    async fn capture(&self, generation: u64) -> Result<RawCapture, PageError>;

    async fn current_url(&self) -> Result<String, PageError>;

    /// Live box of a node, or `None` if it is gone.
    async fn bounding_rect(&self, node: NodeRef) -> Result<Option<Rect>, PageError>;

    async fn is_content_editable(&self, node: NodeRef) -> Result<bool, PageError>;

    async fn focus(&self, node: NodeRef) -> Result<(), PageError>;

    async fn click(&self, node: NodeRef) -> Result<(), PageError>;

    async fn set_value(&self, node: NodeRef, value: &str) -> Result<(), PageError>;

    async fn set_text_content(&self, node: NodeRef, text: &str) -> Result<(), PageError>;

    async fn dispatch(&self, node: NodeRef, event: DomEvent) -> Result<(), PageError>;

    /// Smooth-scroll the viewport vertically by `dy` pixels.
    async fn scroll_by(&self, dy: f64) -> Result<(), PageError>;

    async fn navigate(&self, url: &str) -> Result<(), PageError>;

    async fn render(&self, command: OverlayCommand) -> Result<(), PageError>;

    /// Answer given through the in-page modal since the last call, if any.
    async fn take_modal_answer(&self) -> Result<Option<bool>, PageError>;
}
