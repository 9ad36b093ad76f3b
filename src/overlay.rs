use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::page::{OverlayCommand, Page};
use crate::types::Rect;

/// Owned handle to the in-page overlay for one run.
///
/// Drawing is best effort: a page that refuses an overlay command only costs
/// the visual, never the action, so failures are logged and swallowed.
pub struct Overlay<P: ?Sized> {
    page: Arc<P>,
    cursor: (f64, f64),
}

impl<P: Page + ?Sized> Overlay<P> {
    pub fn new(page: Arc<P>) -> Self {
        Self { page, cursor: (0.0, 0.0) }
    }

    pub fn cursor(&self) -> (f64, f64) {
        self.cursor
    }

    async fn draw(&self, command: OverlayCommand) {
        if let Err(e) = self.page.render(command).await {
            debug!("Overlay command failed: {}", e);
        }
    }

    pub async fn mount(&self) {
        self.draw(OverlayCommand::Mount).await;
    }

    /// Move the cursor to `(x, y)` in `frames` evenly spaced hops spread
    /// over `travel`.
    pub async fn glide_to(&mut self, x: f64, y: f64, travel: Duration, frames: u32) {
        let frames = frames.max(1);
        let pause = travel / frames;
        let (from_x, from_y) = self.cursor;
        for frame in 1..=frames {
            let t = f64::from(frame) / f64::from(frames);
            let px = from_x + (x - from_x) * t;
            let py = from_y + (y - from_y) * t;
            self.draw(OverlayCommand::Cursor { x: px, y: py }).await;
            tokio::time::sleep(pause).await;
        }
        self.cursor = (x, y);
    }

    pub async fn highlight(&self, rect: Rect, label: &str) {
        self.draw(OverlayCommand::Highlight { rect, label: label.to_string() }).await;
    }

    pub async fn ripple(&self) {
        let (x, y) = self.cursor;
        self.draw(OverlayCommand::Ripple { x, y }).await;
    }

    pub async fn typing(&self, visible: bool) {
        let (x, y) = self.cursor;
        self.draw(OverlayCommand::Typing { x, y, visible }).await;
    }

    /// Show the confirmation modal, replacing any one already open.
    pub async fn show_modal(&self, message: &str) {
        self.draw(OverlayCommand::DismissModal).await;
        self.draw(OverlayCommand::ShowModal { message: message.to_string() }).await;
    }

    pub async fn dismiss_modal(&self) {
        self.draw(OverlayCommand::DismissModal).await;
    }

    pub async fn take_modal_answer(&self) -> Option<bool> {
        match self.page.take_modal_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                debug!("Modal poll failed: {}", e);
                None
            }
        }
    }
}
