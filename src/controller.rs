//! The perception-decision-action loop.
//!
//! A run goes Idle -> Running -> one terminal [`RunOutcome`] -> Idle. All of
//! its mutable state lives in a [`RunState`] owned by the call to
//! [`Controller::run`]; the outside world reaches a running loop only through
//! a [`ControlHandle`] (stop, step-continue, confirmation answers).

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::brain::ReasoningClient;
use crate::dom::build_snapshot;
use crate::gate::{ConfirmationGate, SuspendPoint, wait_for_step};
use crate::guard::{self, AccessDecision};
use crate::hands::Executor;
use crate::overlay::Overlay;
use crate::page::{Page, PageError};
use crate::resolver::ElementMap;
use crate::risk::RiskPolicy;
use crate::settings::{SafetyPolicy, Settings};
use crate::status::StatusSink;
use crate::types::{Action, DEFAULT_MAX_STEPS, ModelRequest, Pacing, PageSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Auto,
    Step,
}

/// Everything needed to start a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunRequest {
    pub task: String,
    pub mode: RunMode,
    pub demo_mode: bool,
    pub max_steps: u32,
    pub safety: SafetyPolicy,
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            task: String::new(),
            mode: RunMode::Auto,
            demo_mode: false,
            max_steps: DEFAULT_MAX_STEPS,
            safety: SafetyPolicy::default(),
            allowlist: Vec::new(),
            denylist: Vec::new(),
        }
    }
}

impl RunRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    /// Request carrying the stored budget, safety policy and domain lists.
    pub fn from_settings(task: impl Into<String>, settings: &Settings) -> Self {
        Self {
            task: task.into(),
            max_steps: settings.max_steps,
            safety: settings.safety,
            allowlist: settings.allowlist.clone(),
            denylist: settings.denylist.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { message: String },
    StepBudgetExhausted,
    Stopped,
    ModelError { message: String },
    /// The page could not be observed (e.g. the tab went away).
    PageFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: u32,
    pub iterations: u32,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{reason} ({hostname})")]
    DomainBlocked {
        hostname: String,
        reason: &'static str,
    },

    #[error("A run is already active on this page")]
    RunAlreadyActive,

    #[error(transparent)]
    Page(#[from] PageError),
}

/// Mutable state of one run. Created by [`Controller::run`], dropped when it
/// returns.
#[derive(Debug)]
pub struct RunState {
    pub task: String,
    pub step_mode: bool,
    pub demo_mode: bool,
    pub max_steps: u32,
    pub safety: SafetyPolicy,
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub step_count: u32,
    pub iteration: u32,
    pub elements: ElementMap,
    pub url_at_start: String,
}

impl RunState {
    fn new(request: RunRequest, url: String) -> Self {
        Self {
            task: request.task,
            step_mode: request.mode == RunMode::Step,
            demo_mode: request.demo_mode,
            max_steps: request.max_steps,
            safety: request.safety,
            allowlist: request.allowlist,
            denylist: request.denylist,
            step_count: 0,
            iteration: 0,
            elements: ElementMap::new(),
            url_at_start: url,
        }
    }

    fn budget_spent(&self) -> bool {
        self.step_count >= self.max_steps
    }

    fn model_request(&self, snapshot: PageSnapshot) -> ModelRequest {
        ModelRequest {
            task: self.task.clone(),
            snapshot,
            step_count: self.step_count,
            max_steps: self.max_steps,
            demo_mode: self.demo_mode,
            iteration: self.iteration,
        }
    }
}

/// Signals shared between a running loop and its [`ControlHandle`]s.
#[derive(Default)]
struct RunSignals {
    stop: CancellationToken,
    step: SuspendPoint<()>,
    confirm: SuspendPoint<bool>,
}

#[derive(Default)]
struct ControlShared {
    active: Option<Arc<RunSignals>>,
    last_outcome: Option<RunOutcome>,
}

/// Cloneable remote for whichever run is active.
#[derive(Clone, Default)]
pub struct ControlHandle {
    shared: Arc<Mutex<ControlShared>>,
}

impl ControlHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, ControlShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> Option<Arc<RunSignals>> {
        self.lock().active.clone()
    }

    fn claim(&self) -> Result<ActiveRun, RunError> {
        let mut shared = self.lock();
        if shared.active.is_some() {
            return Err(RunError::RunAlreadyActive);
        }
        let signals = Arc::new(RunSignals::default());
        shared.active = Some(signals.clone());
        Ok(ActiveRun {
            handle: self.clone(),
            signals,
        })
    }

    pub fn is_running(&self) -> bool {
        self.active().is_some()
    }

    /// Ask the active run to stop at its next check point.
    pub fn stop(&self) -> bool {
        match self.active() {
            Some(signals) => {
                signals.stop.cancel();
                true
            }
            None => false,
        }
    }

    /// Release a step-mode pause. A no-op unless the run is waiting.
    pub fn step_continue(&self) -> bool {
        self.active().is_some_and(|signals| signals.step.resume(()))
    }

    /// Answer the pending confirmation prompt. A no-op unless one is open.
    pub fn answer_confirmation(&self, approved: bool) -> bool {
        self.active()
            .is_some_and(|signals| signals.confirm.resume(approved))
    }

    pub fn awaiting_step(&self) -> bool {
        self.active().is_some_and(|signals| signals.step.is_pending())
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.active().is_some_and(|signals| signals.confirm.is_pending())
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.lock().last_outcome.clone()
    }
}

/// Marks a run as active for as long as it lives.
struct ActiveRun {
    handle: ControlHandle,
    signals: Arc<RunSignals>,
}

impl ActiveRun {
    fn record(&self, outcome: &RunOutcome) {
        self.handle.lock().last_outcome = Some(outcome.clone());
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        let mut shared = self.handle.lock();
        if shared
            .active
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, &self.signals))
        {
            shared.active = None;
        }
    }
}

/// A run that has claimed the page and passed the domain guard.
pub struct StartedRun {
    active: ActiveRun,
    state: RunState,
}

enum Attempt {
    Executed,
    Failed,
    Declined,
    Interrupted,
}

pub struct Controller<P: ?Sized, C: ?Sized> {
    page: Arc<P>,
    client: Arc<C>,
    status: StatusSink,
    pacing: Pacing,
    policy: RiskPolicy,
    executor: Executor<P>,
    control: ControlHandle,
}

impl<P, C> Controller<P, C>
where
    P: Page + ?Sized,
    C: ReasoningClient + ?Sized,
{
    pub fn new(page: Arc<P>, client: Arc<C>, status: StatusSink) -> Self {
        let pacing = Pacing::default();
        Self {
            executor: Executor::new(page.clone(), pacing.clone()),
            page,
            client,
            status,
            pacing,
            policy: RiskPolicy::default(),
            control: ControlHandle::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.executor = Executor::new(self.page.clone(), pacing.clone());
        self.pacing = pacing;
        self
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn status(&self) -> &StatusSink {
        &self.status
    }

    /// Run one task to a terminal outcome.
    ///
    /// Errors are reserved for runs that never start: another run is active,
    /// the domain guard refuses the page, or the page cannot report its URL.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, RunError> {
        let started = self.start(request).await?;
        Ok(self.finish(started).await)
    }

    /// Claim the page and pass the domain guard without running anything yet.
    ///
    /// The returned [`StartedRun`] holds the active-run slot until it is
    /// handed to [`finish`](Self::finish) or dropped.
    pub async fn start(&self, request: RunRequest) -> Result<StartedRun, RunError> {
        let active = self.control.claim()?;

        let url = self.page.current_url().await?;
        let hostname = guard::hostname_of(&url);
        let access = guard::evaluate(&hostname, &request.allowlist, &request.denylist);
        if access != AccessDecision::Allowed {
            self.status.error(access.reason());
            return Err(RunError::DomainBlocked {
                hostname,
                reason: access.reason(),
            });
        }

        Ok(StartedRun {
            active,
            state: RunState::new(request, url),
        })
    }

    /// Drive a started run to its terminal outcome.
    pub async fn finish(&self, started: StartedRun) -> RunReport {
        let StartedRun { active, mut state } = started;
        let mut overlay = Overlay::new(self.page.clone());
        overlay.mount().await;
        self.status.info(format!("Starting task: {}", state.task));
        info!(
            max_steps = state.max_steps,
            step_mode = state.step_mode,
            demo = state.demo_mode,
            "Run started"
        );

        let outcome = self.drive(&mut state, &mut overlay, &active.signals).await;
        match &outcome {
            RunOutcome::StepBudgetExhausted => self
                .status
                .warn(format!("Step budget exhausted after {} steps", state.step_count)),
            RunOutcome::Stopped => self.status.info("Agent stopped"),
            _ => {}
        }
        active.record(&outcome);
        info!(
            steps = state.step_count,
            iterations = state.iteration,
            ?outcome,
            "Run finished"
        );

        RunReport {
            outcome,
            steps: state.step_count,
            iterations: state.iteration,
        }
    }

    async fn drive(
        &self,
        state: &mut RunState,
        overlay: &mut Overlay<P>,
        signals: &RunSignals,
    ) -> RunOutcome {
        loop {
            if signals.stop.is_cancelled() {
                return RunOutcome::Stopped;
            }
            if state.budget_spent() {
                return RunOutcome::StepBudgetExhausted;
            }

            let snapshot = match build_snapshot(self.page.as_ref(), &mut state.elements).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    self.status.error(format!("Could not read the page: {e}"));
                    return RunOutcome::PageFailed { message: e.to_string() };
                }
            };

            let request = state.model_request(snapshot);
            let decision = match self.client.decide(&request).await {
                Ok(decision) => decision,
                Err(e) => {
                    if e.is_invalid_response() {
                        warn!(iteration = state.iteration, "Unusable model reply: {}", e);
                    }
                    self.status.error(e.to_string());
                    return RunOutcome::ModelError { message: e.to_string() };
                }
            };
            state.iteration += 1;
            if !decision.thought.is_empty() {
                debug!(thought = %decision.thought, "Model reasoning");
            }

            if decision.done {
                let message = if decision.final_message.is_empty() {
                    "Task complete".to_string()
                } else {
                    decision.final_message
                };
                self.status.success(message.clone());
                return RunOutcome::Completed { message };
            }

            for action in &decision.actions {
                if signals.stop.is_cancelled() || state.budget_spent() {
                    break;
                }

                match self.attempt(state, overlay, signals, action).await {
                    Attempt::Declined => continue,
                    Attempt::Interrupted => break,
                    Attempt::Executed | Attempt::Failed => {}
                }

                if state.step_mode {
                    self.status.info("Waiting for Step command...");
                    if !wait_for_step(&signals.step, &signals.stop).await {
                        break;
                    }
                } else {
                    tokio::time::sleep(self.pacing.action_delay).await;
                }
            }

            self.reobserve_if_navigated(state).await;
        }
    }

    /// Risk-check, maybe confirm, then execute one action.
    async fn attempt(
        &self,
        state: &mut RunState,
        overlay: &mut Overlay<P>,
        signals: &RunSignals,
        action: &Action,
    ) -> Attempt {
        let label = action.describe();

        if state.safety.require_confirm_risky {
            let element = action
                .target_element_id
                .as_deref()
                .and_then(|id| state.elements.resolve(id))
                .map(|entry| &entry.descriptor);

            if let Some(hit) = self.policy.classify(action, element) {
                warn!(category = ?hit.category, trigger = %hit.trigger, "Risky action");
                self.status.warn(format!("Risky action detected: {label}"));

                let gate = ConfirmationGate::new(&signals.confirm, &signals.stop, self.pacing.modal_poll);
                let approved = gate.confirm(overlay, &format!("Allow agent to {label}?")).await;
                if signals.stop.is_cancelled() {
                    return Attempt::Interrupted;
                }
                if !approved {
                    self.status.warn("Risky action cancelled by user");
                    return Attempt::Declined;
                }
                self.status.info("Risky action approved by user");
            }
        }

        self.status.info(format!("Action: {label}"));
        match self.executor.execute(action, &state.elements, overlay).await {
            Ok(()) => {
                state.step_count += 1;
                debug!(step = state.step_count, action = action.kind.as_str(), "Step done");
                Attempt::Executed
            }
            Err(e) => {
                if e.is_element_not_found() {
                    debug!(element = ?action.target_element_id, "Target missing from snapshot");
                } else {
                    warn!(action = action.kind.as_str(), "Action failed: {}", e);
                }
                self.status.error(format!("Action failed: {e}"));
                Attempt::Failed
            }
        }
    }

    async fn reobserve_if_navigated(&self, state: &mut RunState) {
        let url = match self.page.current_url().await {
            Ok(url) => url,
            Err(e) => {
                debug!("Could not read URL after batch: {}", e);
                return;
            }
        };
        if url != state.url_at_start {
            self.status.info("Page changed, re-observing before continuing...");
            state.url_at_start = url;
            tokio::time::sleep(self.pacing.reobserve_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::*;
    use crate::brain::{Brain, ClientError};
    use crate::page::OverlayCommand;
    use crate::settings::SettingsStore;
    use crate::status::{StatusEvent, StatusLevel};
    use crate::testing::{FakeNode, FakePage, PageCall};
    use crate::types::{ActionKind, Decision};

    type Reply = Result<Decision, ClientError>;

    /// Replays queued replies, then repeats `fallback` forever.
    struct ScriptedClient {
        replies: Mutex<VecDeque<Reply>>,
        fallback: Option<Decision>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn repeating(decision: Decision) -> Self {
            Self {
                fallback: Some(decision),
                ..Self::new(Vec::new())
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ReasoningClient for ScriptedClient {
        async fn decide(&self, request: &ModelRequest) -> Result<Decision, ClientError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(reply) = self.replies.lock().unwrap().pop_front() {
                return reply;
            }
            match &self.fallback {
                Some(decision) => Ok(decision.clone()),
                None => Ok(done("script exhausted")),
            }
        }
    }

    fn batch(actions: Vec<Action>) -> Decision {
        Decision {
            thought: String::new(),
            actions,
            done: false,
            final_message: String::new(),
        }
    }

    fn done(message: &str) -> Decision {
        Decision {
            thought: String::new(),
            actions: Vec::new(),
            done: true,
            final_message: message.to_string(),
        }
    }

    fn page() -> Arc<FakePage> {
        Arc::new(FakePage::new("https://app.example.com/home", "Example"))
    }

    fn controller<C: ReasoningClient>(page: &Arc<FakePage>, client: &Arc<C>) -> Controller<FakePage, C> {
        Controller::new(page.clone(), client.clone(), StatusSink::new(512))
    }

    fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn messages(events: &[StatusEvent]) -> Vec<String> {
        events.iter().map(|e| e.message.clone()).collect()
    }

    async fn until(mut condition: impl FnMut() -> bool) {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn step_budget_ends_the_run() {
        let page = page();
        let client = Arc::new(ScriptedClient::repeating(batch(vec![Action::new(ActionKind::Wait)])));
        let controller = controller(&page, &client);

        let mut request = RunRequest::new("keep waiting");
        request.max_steps = 3;
        let report = controller.run(request).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::StepBudgetExhausted);
        assert_eq!(report.steps, 3);
        assert_eq!(client.calls(), 3);
        assert_eq!(page.capture_count(), 3);
        assert!(!controller.control().is_running());
        assert_eq!(controller.control().last_outcome(), Some(RunOutcome::StepBudgetExhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_reached_mid_batch_skips_the_rest() {
        let page = page();
        let waits = vec![Action::new(ActionKind::Wait); 5];
        let client = Arc::new(ScriptedClient::new(vec![Ok(batch(waits))]));
        let controller = controller(&page, &client);

        let mut request = RunRequest::new("wait a lot");
        request.max_steps = 2;
        let report = controller.run(request).await.unwrap();
        assert_eq!(report.steps, 2);
        assert_eq!(report.outcome, RunOutcome::StepBudgetExhausted);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_risky_click_is_skipped() {
        let page = page();
        page.add(FakeNode::new("button").text("Delete account"));
        page.script_modal(&[false]);
        let click = Action::new(ActionKind::Click).targeting("el_0");
        let client = Arc::new(ScriptedClient::new(vec![Ok(batch(vec![click])), Ok(done("gave up"))]));
        let controller = controller(&page, &client);
        let mut rx = controller.status().subscribe();

        let report = controller.run(RunRequest::new("clean up")).await.unwrap();

        assert_eq!(report.steps, 0);
        assert_eq!(report.outcome, RunOutcome::Completed { message: "gave up".into() });
        assert!(page.mutations().is_empty());
        assert!(page.overlay().contains(&OverlayCommand::ShowModal {
            message: "Allow agent to click?".into()
        }));

        let events = drain(&mut rx);
        let log = messages(&events);
        assert!(log.contains(&"Risky action detected: click".to_string()));
        assert!(log.contains(&"Risky action cancelled by user".to_string()));
        assert!(!log.iter().any(|m| m.starts_with("Action:")));
    }

    #[tokio::test(start_paused = true)]
    async fn approval_from_control_handle_lets_the_action_run() {
        let page = page();
        page.add(FakeNode::new("input").attr("type", "submit"));
        let click = Action::new(ActionKind::Click).targeting("el_0").with_note("Submit form");
        let client = Arc::new(ScriptedClient::new(vec![Ok(batch(vec![click])), Ok(done("sent"))]));
        let controller = Arc::new(controller(&page, &client));
        let control = controller.control();

        let runner = controller.clone();
        let run = tokio::spawn(async move { runner.run(RunRequest::new("submit")).await });

        until(|| control.awaiting_confirmation()).await;
        assert!(control.answer_confirmation(true));
        let report = run.await.unwrap().unwrap();

        assert_eq!(report.steps, 1);
        assert_eq!(page.mutations(), vec![PageCall::Focus(0), PageCall::Click(0)]);
        assert!(!control.answer_confirmation(true));
    }

    #[tokio::test(start_paused = true)]
    async fn risky_actions_run_unprompted_when_policy_is_off() {
        let page = page();
        page.add(FakeNode::new("button").text("Pay now"));
        let click = Action::new(ActionKind::Click).targeting("el_0");
        let client = Arc::new(ScriptedClient::new(vec![Ok(batch(vec![click]))]));
        let controller = controller(&page, &client);

        let mut request = RunRequest::new("pay");
        request.safety.require_confirm_risky = false;
        let report = controller.run(request).await.unwrap();

        assert_eq!(report.steps, 1);
        assert!(!page
            .overlay()
            .iter()
            .any(|c| matches!(c, OverlayCommand::ShowModal { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_element_is_logged_and_skipped() {
        let page = page();
        let actions = vec![
            Action::new(ActionKind::Click).targeting("el_9"),
            Action::new(ActionKind::Wait),
        ];
        let client = Arc::new(ScriptedClient::new(vec![Ok(batch(actions)), Ok(done("ok"))]));
        let controller = controller(&page, &client);
        let mut rx = controller.status().subscribe();

        let report = controller.run(RunRequest::new("click ghost")).await.unwrap();
        assert_eq!(report.steps, 1);
        assert_eq!(report.iterations, 2);

        let events = drain(&mut rx);
        let failure = events
            .iter()
            .find(|e| e.message == "Action failed: Element el_9 not found")
            .unwrap();
        assert_eq!(failure.level, StatusLevel::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn model_errors_are_fatal() {
        let page = page();
        let client = Arc::new(ScriptedClient::new(vec![Err(ClientError::InvalidResponse(
            "Model response was not valid JSON.".into(),
        ))]));
        let controller = controller(&page, &client);
        let mut rx = controller.status().subscribe();

        let report = controller.run(RunRequest::new("anything")).await.unwrap();
        assert!(matches!(report.outcome, RunOutcome::ModelError { .. }));
        assert_eq!(client.calls(), 1);
        assert_eq!(report.iterations, 0);

        let events = drain(&mut rx);
        assert_eq!(events.last().unwrap().level, StatusLevel::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_ends_the_run() {
        let page = page();
        page.fail_next_capture();
        let client = Arc::new(ScriptedClient::new(vec![]));
        let controller = controller(&page, &client);

        let report = controller.run(RunRequest::new("anything")).await.unwrap();
        assert!(matches!(report.outcome, RunOutcome::PageFailed { .. }));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn denylisted_domain_never_starts() {
        let page = page();
        let client = Arc::new(ScriptedClient::new(vec![]));
        let controller = controller(&page, &client);

        let mut request = RunRequest::new("anything");
        request.allowlist = vec!["example.com".into()];
        request.denylist = vec!["example.com".into()];
        let err = controller.run(request).await.unwrap_err();

        assert!(matches!(err, RunError::DomainBlocked { ref hostname, .. } if hostname == "app.example.com"));
        assert_eq!(page.capture_count(), 0);
        assert!(page.overlay().is_empty());
        assert!(!controller.control().is_running());

        let mut request = RunRequest::new("anything");
        request.allowlist = vec!["other.org".into()];
        assert!(matches!(
            controller.run(request).await,
            Err(RunError::DomainBlocked { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn started_run_holds_the_page_until_finished_or_dropped() {
        let page = page();
        let client = Arc::new(ScriptedClient::new(vec![Ok(done("ok"))]));
        let controller = controller(&page, &client);
        let control = controller.control();

        let started = controller.start(RunRequest::new("first")).await.unwrap();
        assert!(control.is_running());
        assert!(matches!(
            controller.start(RunRequest::new("second")).await,
            Err(RunError::RunAlreadyActive)
        ));
        assert_eq!(page.capture_count(), 0);

        drop(started);
        assert!(!control.is_running());

        let started = controller.start(RunRequest::new("third")).await.unwrap();
        let report = controller.finish(started).await;
        assert_eq!(report.outcome, RunOutcome::Completed { message: "ok".into() });
        assert!(!control.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn step_mode_waits_for_each_continue() {
        let page = page();
        let actions = vec![Action::new(ActionKind::Wait), Action::new(ActionKind::Wait)];
        let client = Arc::new(ScriptedClient::new(vec![Ok(batch(actions)), Ok(done("stepped"))]));
        let controller = Arc::new(controller(&page, &client));
        let control = controller.control();

        assert!(!control.step_continue());

        let runner = controller.clone();
        let mut request = RunRequest::new("step through");
        request.mode = RunMode::Step;
        let run = tokio::spawn(async move { runner.run(request).await });

        until(|| control.awaiting_step()).await;
        assert!(control.step_continue());
        // Nothing is queued: a second signal before the next pause is dropped.
        assert!(!control.step_continue());

        until(|| control.awaiting_step()).await;
        assert!(control.step_continue());

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.steps, 2);
        assert_eq!(report.outcome, RunOutcome::Completed { message: "stepped".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_paused_ends_the_run_and_frees_the_page() {
        let page = page();
        let actions = vec![Action::new(ActionKind::Wait); 3];
        let client = Arc::new(ScriptedClient::new(vec![Ok(batch(actions))]));
        let controller = Arc::new(controller(&page, &client));
        let control = controller.control();

        let runner = controller.clone();
        let mut request = RunRequest::new("pause");
        request.mode = RunMode::Step;
        let run = tokio::spawn(async move { runner.run(request).await });

        until(|| control.awaiting_step()).await;
        assert!(matches!(
            controller.run(RunRequest::new("second")).await,
            Err(RunError::RunAlreadyActive)
        ));

        assert!(control.stop());
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert_eq!(report.steps, 1);
        assert_eq!(client.calls(), 1);
        assert!(!control.is_running());
        assert!(!control.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_confirmation_is_not_a_decline() {
        let page = page();
        page.add(FakeNode::new("button").text("Send"));
        let click = Action::new(ActionKind::Click).targeting("el_0");
        let client = Arc::new(ScriptedClient::new(vec![Ok(batch(vec![click]))]));
        let controller = Arc::new(controller(&page, &client));
        let control = controller.control();
        let mut rx = controller.status().subscribe();

        let runner = controller.clone();
        let run = tokio::spawn(async move { runner.run(RunRequest::new("send")).await });

        until(|| control.awaiting_confirmation()).await;
        control.stop();
        let report = run.await.unwrap().unwrap();

        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert!(page.mutations().is_empty());
        let log = messages(&drain(&mut rx));
        assert!(!log.contains(&"Risky action cancelled by user".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("Agent stopped"));
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_triggers_reobservation() {
        let page = page();
        let link = page.add(FakeNode::new("a").text("Docs"));
        page.navigate_on_click(link, "https://app.example.com/docs");
        let click = Action::new(ActionKind::Click).targeting("el_0");
        let client = Arc::new(ScriptedClient::new(vec![Ok(batch(vec![click])), Ok(done("read"))]));
        let controller = controller(&page, &client);
        let mut rx = controller.status().subscribe();

        let report = controller.run(RunRequest::new("open docs")).await.unwrap();
        assert_eq!(report.steps, 1);

        let log = messages(&drain(&mut rx));
        assert!(log.contains(&"Page changed, re-observing before continuing...".to_string()));
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[1].snapshot.url, "https://app.example.com/docs");
        assert_eq!(requests[1].step_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn demo_run_end_to_end() {
        let page = page();
        page.add(FakeNode::new("a").text("First link"));
        let input = page.add(FakeNode::new("input").attr("placeholder", "Name"));
        let settings = Arc::new(SettingsStore::in_memory("unused.json", Settings::default()));
        let brain = Arc::new(Brain::new(settings).with_env_key(None));
        let controller = controller(&page, &brain);
        let mut rx = controller.status().subscribe();

        let mut request = RunRequest::new("demo");
        request.demo_mode = true;
        let report = controller.run(request).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed { message: "Demo complete".into() });
        assert_eq!(report.iterations, 3);
        assert_eq!(report.steps, 2);
        assert_eq!(page.node(input).value, "Hello from WebCursor Agent");
        assert!(page.mutations().contains(&PageCall::ScrollBy(400.0)));

        let events = drain(&mut rx);
        assert_eq!(events.first().unwrap().message, "Starting task: demo");
        let last = events.last().unwrap();
        assert_eq!(last.level, StatusLevel::Success);
        assert_eq!(last.message, "Demo complete");
    }
}
