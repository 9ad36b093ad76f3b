//! [`Page`] backed by a real Chrome tab over the DevTools protocol.
//!
//! Every operation is a small script evaluated in the tab. Nodes are found
//! again through the `data-wca-eid` stamps left by the last capture, so a
//! [`NodeRef`] from an older capture simply fails to match.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::dom::capture_script;
use crate::page::{DomEvent, NodeRef, OverlayCommand, Page, PageError, RawCapture};
use crate::types::Rect;

pub const DEFAULT_DEBUG_URL: &str = "http://127.0.0.1:9222";

const DETACHED: &str = "__wca_detached__";

/// Installs `window.__wca`, the overlay renderer, once per document.
///
/// Everything lives under a single `[data-wca-overlay]` root so captures skip
/// it. Only the modal takes pointer events; its buttons leave the answer in
/// `window.__wcaModalAnswer` for the engine to collect.
const OVERLAY_JS: &str = r#"
(() => {
  if (window.__wca && document.querySelector('[data-wca-overlay]')) return window.__wca;
  const root = document.createElement('div');
  root.setAttribute('data-wca-overlay', '');
  root.style.cssText = 'position:fixed;inset:0;pointer-events:none;z-index:2147483647;';
  root.innerHTML = `
    <div data-part="cursor" style="position:fixed;width:18px;height:18px;margin:-9px 0 0 -9px;border-radius:50%;background:rgba(37,99,235,.85);box-shadow:0 0 0 3px rgba(255,255,255,.9);transition:left 25ms linear,top 25ms linear;left:0;top:0;"></div>
    <div data-part="box" style="position:fixed;display:none;border:2px solid #2563eb;border-radius:4px;background:rgba(37,99,235,.08);"></div>
    <div data-part="label" style="position:fixed;display:none;padding:2px 6px;font:12px system-ui,sans-serif;color:#fff;background:#2563eb;border-radius:3px;"></div>
    <div data-part="typing" style="position:fixed;display:none;padding:2px 6px;font:11px system-ui,sans-serif;color:#1e3a8a;background:#dbeafe;border-radius:8px;">typing...</div>
  `;
  document.documentElement.appendChild(root);
  const part = (name) => root.querySelector(`[data-part="${name}"]`);

  window.__wca = {
    cursor(x, y) {
      const c = part('cursor');
      c.style.left = x + 'px';
      c.style.top = y + 'px';
    },
    highlight(rect, label) {
      const box = part('box');
      Object.assign(box.style, {
        display: 'block', top: rect.top + 'px', left: rect.left + 'px',
        width: rect.width + 'px', height: rect.height + 'px'
      });
      const tag = part('label');
      tag.textContent = label;
      Object.assign(tag.style, {
        display: 'block', top: Math.max(0, rect.top - 22) + 'px', left: rect.left + 'px'
      });
    },
    ripple(x, y) {
      const r = document.createElement('div');
      r.style.cssText = `position:fixed;left:${x - 4}px;top:${y - 4}px;width:8px;height:8px;border-radius:50%;border:2px solid #2563eb;transition:all 400ms ease-out;opacity:1;`;
      root.appendChild(r);
      requestAnimationFrame(() => {
        Object.assign(r.style, { left: (x - 20) + 'px', top: (y - 20) + 'px', width: '40px', height: '40px', opacity: '0' });
      });
      setTimeout(() => r.remove(), 450);
    },
    typing(x, y, visible) {
      const t = part('typing');
      t.style.display = visible ? 'block' : 'none';
      t.style.left = (x + 14) + 'px';
      t.style.top = (y + 14) + 'px';
    },
    showModal(message) {
      window.__wca.dismissModal();
      window.__wcaModalAnswer = undefined;
      const modal = document.createElement('div');
      modal.setAttribute('data-part', 'modal');
      modal.style.cssText = 'position:fixed;inset:0;display:flex;align-items:center;justify-content:center;background:rgba(15,23,42,.35);pointer-events:auto;';
      modal.innerHTML = `
        <div style="min-width:280px;max-width:420px;padding:18px;border-radius:8px;background:#fff;font:14px system-ui,sans-serif;color:#0f172a;box-shadow:0 10px 30px rgba(0,0,0,.25);">
          <div data-part="message" style="margin-bottom:14px;"></div>
          <div style="display:flex;gap:8px;justify-content:flex-end;">
            <button data-answer="no" style="padding:6px 12px;">Cancel</button>
            <button data-answer="yes" style="padding:6px 12px;background:#2563eb;color:#fff;border:0;border-radius:4px;">Confirm</button>
          </div>
        </div>`;
      modal.querySelector('[data-part="message"]').textContent = message;
      modal.querySelectorAll('[data-answer]').forEach((btn) => {
        btn.addEventListener('click', () => {
          window.__wcaModalAnswer = btn.getAttribute('data-answer') === 'yes';
          modal.remove();
        });
      });
      root.appendChild(modal);
    },
    dismissModal() {
      root.querySelectorAll('[data-part="modal"]').forEach((m) => m.remove());
    }
  };
  return window.__wca;
})()
"#;

const TAKE_MODAL_ANSWER_JS: &str = r#"
(() => {
  const answer = window.__wcaModalAnswer;
  window.__wcaModalAnswer = undefined;
  return typeof answer === 'boolean' ? answer : null;
})()
"#;

/// How to reach a browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// DevTools endpoint of an already running Chrome.
    pub debug_url: String,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    /// Profile used when a new Chrome has to be launched.
    pub profile_dir: Option<PathBuf>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            debug_url: DEFAULT_DEBUG_URL.to_string(),
            headless: false,
            chrome_path: None,
            profile_dir: dirs::data_local_dir().map(|dir| dir.join("webcursor").join("profile")),
        }
    }
}

pub struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    /// Attach to a running Chrome, or launch one. Blocks; see [`open`](Self::open).
    pub fn launch(options: &BrowserOptions) -> Result<Self> {
        info!("Attempting to attach to existing Chrome at {}", options.debug_url);
        if let Ok(browser) = Browser::connect(options.debug_url.clone()) {
            info!("Attached to existing Chrome");
            let existing = browser
                .get_tabs()
                .lock()
                .map_err(|_| anyhow::anyhow!("Tab list lock poisoned"))?
                .first()
                .cloned();
            let tab = match existing {
                Some(tab) => tab,
                None => {
                    debug!("No tabs found, creating new one");
                    browser.new_tab()?
                }
            };
            return Ok(Self { _browser: browser, tab });
        }

        warn!("Could not attach, launching a new Chrome");
        if let Some(profile) = &options.profile_dir {
            std::fs::create_dir_all(profile)
                .with_context(|| format!("Failed to create profile dir {}", profile.display()))?;
        }

        let launch = LaunchOptions {
            headless: options.headless,
            path: options.chrome_path.clone(),
            user_data_dir: options.profile_dir.clone(),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };
        let browser = Browser::new(launch).context("Browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;

        info!("Chrome ready");
        Ok(Self { _browser: browser, tab })
    }

    pub async fn open(options: BrowserOptions) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::launch(&options))
            .await
            .context("Browser launch panicked")?
    }

    /// Load `url` and wait for the navigation to finish.
    pub async fn goto(&self, url: &str) -> Result<()> {
        let tab = self.tab.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.navigate_to(&url)?.wait_until_navigated()?;
            Ok(())
        })
        .await
        .context("Navigation task panicked")?
    }

    async fn eval(&self, script: String) -> Result<Value, PageError> {
        let tab = self.tab.clone();
        let object = tokio::task::spawn_blocking(move || tab.evaluate(&script, false))
            .await
            .map_err(|e| PageError::Browser(e.to_string()))?
            .map_err(|e| PageError::Script(e.to_string()))?;
        Ok(object.value.unwrap_or(Value::Null))
    }

    /// Run `body` with `el` bound to the stamped node.
    async fn on_node(&self, node: NodeRef, body: &str) -> Result<Value, PageError> {
        let selector = json!(format!("[data-wca-eid=\"{}:{}\"]", node.generation, node.slot));
        let script = format!(
            "(() => {{ const el = document.querySelector({selector}); if (!el) return {DETACHED:?}; {body} }})()"
        );
        match self.eval(script).await? {
            Value::String(s) if s == DETACHED => Err(PageError::Detached),
            value => Ok(value),
        }
    }

    async fn overlay(&self, call: String) -> Result<(), PageError> {
        self.eval(format!("{OVERLAY_JS}.{call}")).await.map(drop)
    }
}

fn dispatch_script(event: &DomEvent) -> String {
    match event {
        DomEvent::Input => "el.dispatchEvent(new Event('input', { bubbles: true }));".to_string(),
        DomEvent::Change => "el.dispatchEvent(new Event('change', { bubbles: true }));".to_string(),
        DomEvent::KeyDown(key) => format!(
            "el.dispatchEvent(new KeyboardEvent('keydown', {{ key: {}, bubbles: true }}));",
            json!(key)
        ),
        DomEvent::KeyUp(key) => format!(
            "el.dispatchEvent(new KeyboardEvent('keyup', {{ key: {}, bubbles: true }}));",
            json!(key)
        ),
    }
}

fn overlay_call(command: &OverlayCommand) -> String {
    match command {
        OverlayCommand::Mount => "cursor(0, 0)".to_string(),
        OverlayCommand::Cursor { x, y } => format!("cursor({x}, {y})"),
        OverlayCommand::Highlight { rect, label } => {
            format!("highlight({}, {})", json!(rect), json!(label))
        }
        OverlayCommand::Ripple { x, y } => format!("ripple({x}, {y})"),
        OverlayCommand::Typing { x, y, visible } => format!("typing({x}, {y}, {visible})"),
        OverlayCommand::ShowModal { message } => format!("showModal({})", json!(message)),
        OverlayCommand::DismissModal => "dismissModal()".to_string(),
    }
}

/// Objects come back from `evaluate` by reference, so rect scripts hand over
/// a JSON string instead.
fn decode_rect(value: &Value) -> Result<Rect, PageError> {
    let raw = value
        .as_str()
        .ok_or_else(|| PageError::Script("Bounding rect returned no data".into()))?;
    serde_json::from_str(raw).map_err(|e| PageError::Script(e.to_string()))
}

#[async_trait]
impl Page for ChromePage {
    async fn capture(&self, generation: u64) -> Result<RawCapture, PageError> {
        let raw = self.eval(capture_script(generation)).await?;
        let raw = raw
            .as_str()
            .ok_or_else(|| PageError::Script("Capture returned no data".into()))?;
        serde_json::from_str(raw).map_err(|e| PageError::Script(e.to_string()))
    }

    async fn current_url(&self) -> Result<String, PageError> {
        let url = self.eval("window.location.href".to_string()).await?;
        Ok(url.as_str().unwrap_or_default().to_string())
    }

    async fn bounding_rect(&self, node: NodeRef) -> Result<Option<Rect>, PageError> {
        let script = "const r = el.getBoundingClientRect(); \
                      return JSON.stringify({ top: r.top, left: r.left, width: r.width, height: r.height });";
        match self.on_node(node, script).await {
            Ok(value) => decode_rect(&value).map(Some),
            Err(PageError::Detached) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn is_content_editable(&self, node: NodeRef) -> Result<bool, PageError> {
        let value = self.on_node(node, "return !!el.isContentEditable;").await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn focus(&self, node: NodeRef) -> Result<(), PageError> {
        self.on_node(node, "el.focus(); return true;").await.map(drop)
    }

    async fn click(&self, node: NodeRef) -> Result<(), PageError> {
        self.on_node(node, "el.click(); return true;").await.map(drop)
    }

    async fn set_value(&self, node: NodeRef, value: &str) -> Result<(), PageError> {
        let body = format!("el.value = {}; return true;", json!(value));
        self.on_node(node, &body).await.map(drop)
    }

    async fn set_text_content(&self, node: NodeRef, text: &str) -> Result<(), PageError> {
        let body = format!("el.textContent = {}; return true;", json!(text));
        self.on_node(node, &body).await.map(drop)
    }

    async fn dispatch(&self, node: NodeRef, event: DomEvent) -> Result<(), PageError> {
        let body = format!("{} return true;", dispatch_script(&event));
        self.on_node(node, &body).await.map(drop)
    }

    async fn scroll_by(&self, dy: f64) -> Result<(), PageError> {
        self.eval(format!("window.scrollBy({{ top: {dy}, behavior: 'smooth' }}); true"))
            .await
            .map(drop)
    }

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.eval(format!("window.location.href = {}; true", json!(url)))
            .await
            .map(drop)
    }

    async fn render(&self, command: OverlayCommand) -> Result<(), PageError> {
        self.overlay(overlay_call(&command)).await
    }

    async fn take_modal_answer(&self) -> Result<Option<bool>, PageError> {
        let value = self.eval(TAKE_MODAL_ANSWER_JS.to_string()).await?;
        Ok(value.as_bool())
    }
}
