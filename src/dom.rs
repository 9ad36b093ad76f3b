use tracing::debug;

use crate::page::{NodeRef, Page, PageError, PathSegment, RawCandidate};
use crate::resolver::ElementMap;
use crate::types::{ElementDescriptor, PageSnapshot, VISIBLE_TEXT_MAX_CHARS};

/// Interactive-role query used to pick snapshot candidates.
pub const CANDIDATE_SELECTOR: &str =
    "a, button, input, textarea, select, [role=button], [contenteditable=true]";

/// Maximum number of levels (element included) in a diagnostic selector.
const SELECTOR_DEPTH: usize = 4;
const SELECTOR_CLASSES: usize = 2;

/// JavaScript injected into the page to describe every interactive candidate.
/// NON-DESTRUCTIVE apart from the `data-wca-eid` stamps it refreshes.
///
/// The script:
///   1. Clears stamps left by the previous capture.
///   2. Walks `CANDIDATE_SELECTOR` matches in document order, skipping the
///      agent's own overlay.
///   3. Stamps each candidate with `data-wca-eid="<generation>:<slot>"`.
///   4. Reports raw attributes, box, computed visibility and up to four
///      ancestor levels; filtering and normalization happen in Rust.
const CAPTURE_JS: &str = r#"
(generation, candidateSelector) => {
  document.querySelectorAll('[data-wca-eid]').forEach((el) => el.removeAttribute('data-wca-eid'));

  const path = (el) => {
    const out = [];
    let current = el;
    while (current && current.nodeType === 1 && out.length < 4) {
      const parent = current.parentElement;
      let sameTagCount = 1;
      let nthOfType = 1;
      if (parent) {
        const same = Array.from(parent.children).filter((c) => c.tagName === current.tagName);
        sameTagCount = same.length;
        nthOfType = same.indexOf(current) + 1;
      }
      out.push({
        tag: current.tagName.toLowerCase(),
        classes: Array.from(current.classList).slice(0, 2),
        sameTagCount,
        nthOfType
      });
      current = parent;
    }
    return out;
  };

  const candidates = [];
  let slot = 0;
  document.querySelectorAll(candidateSelector).forEach((el) => {
    if (el.closest('[data-wca-overlay]')) return;
    el.setAttribute('data-wca-eid', generation + ':' + slot);
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    candidates.push({
      slot,
      tag: el.tagName.toLowerCase(),
      domId: el.id || null,
      role: el.getAttribute('role'),
      text: el.innerText || el.textContent || '',
      placeholder: el.getAttribute('placeholder'),
      name: el.getAttribute('name'),
      type: el.getAttribute('type'),
      ariaLabel: el.getAttribute('aria-label'),
      disabled: !!el.disabled,
      rect: { top: rect.top, left: rect.left, width: rect.width, height: rect.height },
      display: style.display,
      visibility: style.visibility,
      path: path(el)
    });
    slot += 1;
  });

  return JSON.stringify({
    url: window.location.href,
    title: document.title,
    bodyText: document.body ? (document.body.innerText || '') : '',
    candidates
  });
}
"#;

/// Full expression evaluating `CAPTURE_JS` for one generation.
pub fn capture_script(generation: u64) -> String {
    let selector = serde_json::to_string(CANDIDATE_SELECTOR).unwrap_or_default();
    format!("({CAPTURE_JS})({generation}, {selector})")
}

/// Collapse whitespace runs to a single space and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep at most `max` characters. Cuts on a char boundary, possibly mid-word.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Rendered with a non-empty box and not hidden by computed style.
pub fn is_visible(candidate: &RawCandidate) -> bool {
    candidate.rect.has_area()
        && candidate.visibility != "hidden"
        && candidate.display != "none"
}

/// Port of CSSOM `CSS.escape` for identifiers and class names.
pub fn css_escape(ident: &str) -> String {
    let chars: Vec<char> = ident.chars().collect();
    let mut out = String::with_capacity(ident.len());
    for (i, &ch) in chars.iter().enumerate() {
        let code = ch as u32;
        if code == 0 {
            out.push('\u{FFFD}');
        } else if (0x01..=0x1f).contains(&code)
            || code == 0x7f
            || (i == 0 && ch.is_ascii_digit())
            || (i == 1 && ch.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{code:x} "));
        } else if i == 0 && chars.len() == 1 && ch == '-' {
            out.push_str("\\-");
        } else if code >= 0x80 || ch == '-' || ch == '_' || ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else {
            out.push('\\');
            out.push(ch);
        }
    }
    out
}

/// Best-effort selector for notes and diagnostics. Never used for lookup.
pub fn generate_selector(dom_id: Option<&str>, path: &[PathSegment]) -> String {
    if let Some(id) = dom_id.filter(|id| !id.is_empty()) {
        return format!("#{}", css_escape(id));
    }

    let mut parts: Vec<String> = path
        .iter()
        .take(SELECTOR_DEPTH)
        .map(|segment| {
            let mut part = segment.tag.clone();
            let classes: Vec<String> = segment
                .classes
                .iter()
                .filter(|class| !class.is_empty())
                .take(SELECTOR_CLASSES)
                .map(|class| css_escape(class))
                .collect();
            if !classes.is_empty() {
                part.push('.');
                part.push_str(&classes.join("."));
            }
            if segment.same_tag_count > 1 {
                part.push_str(&format!(":nth-of-type({})", segment.nth_of_type));
            }
            part
        })
        .collect();
    parts.reverse();
    parts.join(" > ")
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

fn describe(id: String, candidate: &RawCandidate) -> ElementDescriptor {
    ElementDescriptor {
        id,
        tag: candidate.tag.to_lowercase(),
        role: non_empty(&candidate.role),
        text: normalize_text(&candidate.text),
        placeholder: non_empty(&candidate.placeholder),
        name: non_empty(&candidate.name),
        input_type: non_empty(&candidate.input_type),
        aria_label: non_empty(&candidate.aria_label),
        css_selector: generate_selector(candidate.dom_id.as_deref(), &candidate.path),
        bounding_rect: candidate.rect,
        is_visible: true,
        is_enabled: !candidate.disabled,
    }
}

/// Capture the page and rebuild `map` from it.
///
/// The map is cleared before the capture is requested, so on error it is
/// left empty rather than pointing at the previous document.
pub async fn build_snapshot<P>(page: &P, map: &mut ElementMap) -> Result<PageSnapshot, PageError>
where
    P: Page + ?Sized,
{
    let generation = map.begin();
    let raw = page.capture(generation).await?;

    let mut elements = Vec::new();
    for candidate in raw.candidates.iter().filter(|c| is_visible(c)) {
        let descriptor = describe(map.next_id(), candidate);
        let node = NodeRef { generation, slot: candidate.slot };
        if map.insert(node, descriptor.clone()) {
            elements.push(descriptor);
        }
    }

    debug!(
        generation,
        candidates = raw.candidates.len(),
        kept = elements.len(),
        "Snapshot captured"
    );

    Ok(PageSnapshot {
        url: raw.url,
        title: raw.title,
        visible_text: truncate_chars(&normalize_text(&raw.body_text), VISIBLE_TEXT_MAX_CHARS),
        elements,
    })
}
