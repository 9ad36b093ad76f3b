//! In-memory [`Page`] used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::page::{
    DomEvent, NodeRef, OverlayCommand, Page, PageError, PathSegment, RawCandidate, RawCapture,
};
use crate::types::Rect;

#[derive(Debug, Clone)]
pub struct FakeNode {
    tag: String,
    dom_id: Option<String>,
    classes: Vec<String>,
    attrs: HashMap<String, String>,
    text: String,
    rect: Rect,
    display: String,
    visibility: String,
    disabled: bool,
    editable: bool,
    detached: bool,
    pub value: String,
    pub text_content: String,
}

impl FakeNode {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            dom_id: None,
            classes: Vec::new(),
            attrs: HashMap::new(),
            text: String::new(),
            rect: Rect { top: 0.0, left: 0.0, width: 100.0, height: 20.0 },
            display: "inline-block".to_string(),
            visibility: "visible".to_string(),
            disabled: false,
            editable: false,
            detached: false,
            value: String::new(),
            text_content: String::new(),
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn dom_id(mut self, id: &str) -> Self {
        self.dom_id = Some(id.to_string());
        self
    }

    pub fn classes(mut self, classes: &[&str]) -> Self {
        self.classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn size(mut self, width: f64, height: f64) -> Self {
        self.rect.width = width;
        self.rect.height = height;
        self
    }

    pub fn at(mut self, top: f64, left: f64) -> Self {
        self.rect.top = top;
        self.rect.left = left;
        self
    }

    pub fn display(mut self, display: &str) -> Self {
        self.display = display.to_string();
        self
    }

    pub fn visibility(mut self, visibility: &str) -> Self {
        self.visibility = visibility.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageCall {
    Capture(u64),
    Focus(u32),
    Click(u32),
    SetValue(u32, String),
    SetText(u32, String),
    Dispatch(u32, DomEvent),
    ScrollBy(f64),
    Navigate(String),
    Render(OverlayCommand),
}

impl PageCall {
    /// Calls that change the document, as opposed to reads and overlay drawing.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, PageCall::Capture(_) | PageCall::Render(_))
    }
}

#[derive(Default)]
struct Inner {
    url: String,
    title: String,
    body_text: String,
    nodes: Vec<FakeNode>,
    generation: u64,
    calls: Vec<PageCall>,
    modal_script: VecDeque<bool>,
    modal_answer: Option<bool>,
    click_navigations: HashMap<u32, String>,
    fail_capture: bool,
}

pub struct FakePage {
    inner: Mutex<Inner>,
}

impl FakePage {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            inner: Mutex::new(Inner {
                url: url.to_string(),
                title: title.to_string(),
                ..Inner::default()
            }),
        }
    }

    /// Append a node to `<body>`; returns its capture slot.
    pub fn add(&self, node: FakeNode) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.push(node);
        (inner.nodes.len() - 1) as u32
    }

    pub fn detach(&self, slot: u32) {
        self.inner.lock().unwrap().nodes[slot as usize].detached = true;
    }

    pub fn node(&self, slot: u32) -> FakeNode {
        self.inner.lock().unwrap().nodes[slot as usize].clone()
    }

    pub fn set_body_text(&self, text: &str) {
        self.inner.lock().unwrap().body_text = text.to_string();
    }

    pub fn url(&self) -> String {
        self.inner.lock().unwrap().url.clone()
    }

    /// Clicking `slot` moves the page to `url`.
    pub fn navigate_on_click(&self, slot: u32, url: &str) {
        self.inner
            .lock()
            .unwrap()
            .click_navigations
            .insert(slot, url.to_string());
    }

    /// Answers the in-page modal gives, one per modal shown.
    pub fn script_modal(&self, answers: &[bool]) {
        self.inner.lock().unwrap().modal_script = answers.iter().copied().collect();
    }

    pub fn fail_next_capture(&self) {
        self.inner.lock().unwrap().fail_capture = true;
    }

    pub fn calls(&self) -> Vec<PageCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<PageCall> {
        self.calls().into_iter().filter(PageCall::is_mutation).collect()
    }

    pub fn overlay(&self) -> Vec<OverlayCommand> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PageCall::Render(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn capture_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, PageCall::Capture(_)))
            .count()
    }

    fn with_node<T>(
        &self,
        node: NodeRef,
        call: PageCall,
        f: impl FnOnce(&mut FakeNode) -> T,
    ) -> Result<T, PageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
        if node.generation != inner.generation {
            return Err(PageError::Detached);
        }
        match inner.nodes.get_mut(node.slot as usize) {
            Some(found) if !found.detached => Ok(f(found)),
            _ => Err(PageError::Detached),
        }
    }
}

#[async_trait]
impl Page for FakePage {
    async fn capture(&self, generation: u64) -> Result<RawCapture, PageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(PageCall::Capture(generation));
        if std::mem::take(&mut inner.fail_capture) {
            return Err(PageError::Script("capture failed".into()));
        }
        inner.generation = generation;

        let body = PathSegment {
            tag: "body".into(),
            classes: Vec::new(),
            same_tag_count: 1,
            nth_of_type: 1,
        };
        let live: Vec<&FakeNode> = inner.nodes.iter().filter(|n| !n.detached).collect();
        let mut candidates = Vec::new();
        for (slot, node) in inner.nodes.iter().enumerate() {
            if node.detached {
                continue;
            }
            let same: Vec<_> = live.iter().filter(|n| n.tag == node.tag).collect();
            let nth = same
                .iter()
                .position(|n| std::ptr::eq(**n, node))
                .map(|i| i + 1)
                .unwrap_or(1);
            candidates.push(RawCandidate {
                slot: slot as u32,
                tag: node.tag.to_uppercase(),
                dom_id: node.dom_id.clone(),
                role: node.attrs.get("role").cloned(),
                text: node.text.clone(),
                placeholder: node.attrs.get("placeholder").cloned(),
                name: node.attrs.get("name").cloned(),
                input_type: node.attrs.get("type").cloned(),
                aria_label: node.attrs.get("aria-label").cloned(),
                disabled: node.disabled,
                rect: node.rect,
                display: node.display.clone(),
                visibility: node.visibility.clone(),
                path: vec![
                    PathSegment {
                        tag: node.tag.clone(),
                        classes: node.classes.clone(),
                        same_tag_count: same.len(),
                        nth_of_type: nth,
                    },
                    body.clone(),
                ],
            });
        }

        Ok(RawCapture {
            url: inner.url.clone(),
            title: inner.title.clone(),
            body_text: inner.body_text.clone(),
            candidates,
        })
    }

    async fn current_url(&self) -> Result<String, PageError> {
        Ok(self.url())
    }

    async fn bounding_rect(&self, node: NodeRef) -> Result<Option<Rect>, PageError> {
        let inner = self.inner.lock().unwrap();
        if node.generation != inner.generation {
            return Ok(None);
        }
        Ok(inner
            .nodes
            .get(node.slot as usize)
            .filter(|n| !n.detached)
            .map(|n| n.rect))
    }

    async fn is_content_editable(&self, node: NodeRef) -> Result<bool, PageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .nodes
            .get(node.slot as usize)
            .map(|n| n.editable)
            .unwrap_or(false))
    }

    async fn focus(&self, node: NodeRef) -> Result<(), PageError> {
        self.with_node(node, PageCall::Focus(node.slot), |_| ())
    }

    async fn click(&self, node: NodeRef) -> Result<(), PageError> {
        self.with_node(node, PageCall::Click(node.slot), |_| ())?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(url) = inner.click_navigations.get(&node.slot).cloned() {
            inner.url = url;
        }
        Ok(())
    }

    async fn set_value(&self, node: NodeRef, value: &str) -> Result<(), PageError> {
        self.with_node(node, PageCall::SetValue(node.slot, value.to_string()), |n| {
            n.value = value.to_string();
        })
    }

    async fn set_text_content(&self, node: NodeRef, text: &str) -> Result<(), PageError> {
        self.with_node(node, PageCall::SetText(node.slot, text.to_string()), |n| {
            n.text_content = text.to_string();
        })
    }

    async fn dispatch(&self, node: NodeRef, event: DomEvent) -> Result<(), PageError> {
        self.with_node(node, PageCall::Dispatch(node.slot, event), |_| ())
    }

    async fn scroll_by(&self, dy: f64) -> Result<(), PageError> {
        self.inner.lock().unwrap().calls.push(PageCall::ScrollBy(dy));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(PageCall::Navigate(url.to_string()));
        inner.url = url.to_string();
        Ok(())
    }

    async fn render(&self, command: OverlayCommand) -> Result<(), PageError> {
        let mut inner = self.inner.lock().unwrap();
        if matches!(command, OverlayCommand::ShowModal { .. }) {
            inner.modal_answer = inner.modal_script.pop_front();
        }
        if matches!(command, OverlayCommand::DismissModal) {
            inner.modal_answer = None;
        }
        inner.calls.push(PageCall::Render(command));
        Ok(())
    }

    async fn take_modal_answer(&self) -> Result<Option<bool>, PageError> {
        Ok(self.inner.lock().unwrap().modal_answer.take())
    }
}
