//! Performs proposed actions against the page.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::overlay::Overlay;
use crate::page::{DomEvent, NodeRef, Page, PageError};
use crate::resolver::ElementMap;
use crate::types::{Action, ActionKind, Pacing, ScrollDirection};

const DEFAULT_SCROLL_AMOUNT: f64 = 400.0;

#[derive(Debug, Error)]
pub enum ActionError {
    /// Target id missing from the current snapshot, or the node is gone.
    #[error("Element {0} not found")]
    ElementNotFound(String),

    #[error("Action {kind} is missing its {field}")]
    MissingField { kind: &'static str, field: &'static str },

    #[error(transparent)]
    Page(#[from] PageError),
}

impl ActionError {
    pub fn is_element_not_found(&self) -> bool {
        matches!(self, ActionError::ElementNotFound(_))
    }
}

pub struct Executor<P: ?Sized> {
    page: Arc<P>,
    pacing: Pacing,
}

impl<P: Page + ?Sized> Executor<P> {
    pub fn new(page: Arc<P>, pacing: Pacing) -> Self {
        Self { page, pacing }
    }

    pub async fn execute(
        &self,
        action: &Action,
        elements: &ElementMap,
        overlay: &mut Overlay<P>,
    ) -> Result<(), ActionError> {
        match action.kind {
            ActionKind::Wait => {
                let wait = action
                    .duration
                    .map(std::time::Duration::from_millis)
                    .unwrap_or(self.pacing.default_wait);
                tokio::time::sleep(wait).await;
                Ok(())
            }
            ActionKind::Scroll => {
                let amount = action.amount.unwrap_or(DEFAULT_SCROLL_AMOUNT);
                let dy = match action.direction.unwrap_or_default() {
                    ScrollDirection::Up => -amount,
                    ScrollDirection::Down => amount,
                };
                self.page.scroll_by(dy).await?;
                tokio::time::sleep(self.pacing.scroll_settle).await;
                Ok(())
            }
            ActionKind::Navigate => {
                let url = action.url.as_deref().ok_or(ActionError::MissingField {
                    kind: "navigate",
                    field: "url",
                })?;
                self.page.navigate(url).await?;
                Ok(())
            }
            ActionKind::Click | ActionKind::Type | ActionKind::Select | ActionKind::Keypress => {
                let node = self.approach(action, elements, overlay).await?;
                self.interact(action, node, overlay).await
            }
        }
    }

    /// Resolve the target, glide the cursor to its centre and highlight it.
    async fn approach(
        &self,
        action: &Action,
        elements: &ElementMap,
        overlay: &mut Overlay<P>,
    ) -> Result<NodeRef, ActionError> {
        let id = action.target_element_id.as_deref().unwrap_or_default();
        let not_found = || ActionError::ElementNotFound(id.to_string());

        let node = elements.resolve(id).ok_or_else(not_found)?.node;
        let rect = self.page.bounding_rect(node).await?.ok_or_else(not_found)?;

        let (x, y) = rect.center();
        overlay
            .glide_to(x, y, self.pacing.cursor_travel, self.pacing.cursor_frames)
            .await;
        overlay.highlight(rect, &action.label()).await;
        debug!(element = id, x, y, "Cursor on target");
        Ok(node)
    }

    async fn interact(
        &self,
        action: &Action,
        node: NodeRef,
        overlay: &mut Overlay<P>,
    ) -> Result<(), ActionError> {
        let page = &self.page;
        let text = action.text.as_deref().unwrap_or_default();

        match action.kind {
            ActionKind::Click => {
                page.focus(node).await?;
                page.click(node).await?;
                overlay.ripple().await;
            }
            ActionKind::Type => {
                page.focus(node).await?;
                overlay.typing(true).await;
                let written = self.write_text(node, text).await;
                tokio::time::sleep(self.pacing.typing_delay).await;
                overlay.typing(false).await;
                written?;
            }
            ActionKind::Select => {
                page.focus(node).await?;
                page.set_value(node, text).await?;
                page.dispatch(node, DomEvent::Change).await?;
            }
            ActionKind::Keypress => {
                let key = action.key.clone().unwrap_or_default();
                page.dispatch(node, DomEvent::KeyDown(key.clone())).await?;
                page.dispatch(node, DomEvent::KeyUp(key)).await?;
            }
            ActionKind::Wait | ActionKind::Scroll | ActionKind::Navigate => {}
        }
        Ok(())
    }

    async fn write_text(&self, node: NodeRef, text: &str) -> Result<(), ActionError> {
        if self.page.is_content_editable(node).await? {
            self.page.set_text_content(node, text).await?;
        } else {
            self.page.set_value(node, text).await?;
            self.page.dispatch(node, DomEvent::Input).await?;
            self.page.dispatch(node, DomEvent::Change).await?;
        }
        Ok(())
    }
}
