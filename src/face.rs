//! Local control panel: a single page plus a small JSON API over one
//! [`Controller`].

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::brain::ReasoningClient;
use crate::controller::{Controller, RunError, RunMode, RunOutcome, RunReport, RunRequest};
use crate::page::Page;
use crate::settings::{Settings, SettingsStore};

pub type DynController = Controller<dyn Page, dyn ReasoningClient>;

pub const DEFAULT_PORT: u16 = 3000;
const PORT_ATTEMPTS: u16 = 10;

pub struct PanelState {
    controller: Arc<DynController>,
    settings: Arc<SettingsStore>,
    finished: broadcast::Sender<RunReport>,
}

impl PanelState {
    pub fn new(controller: Arc<DynController>, settings: Arc<SettingsStore>) -> Arc<Self> {
        let (finished, _) = broadcast::channel(16);
        Arc::new(Self {
            controller,
            settings,
            finished,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RunPayload {
    task: String,
    mode: RunMode,
    demo_mode: bool,
}

#[derive(Debug, Deserialize)]
struct ConfirmPayload {
    approved: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunStateView {
    running: bool,
    awaiting_step: bool,
    awaiting_confirmation: bool,
    last_outcome: Option<RunOutcome>,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn router(state: Arc<PanelState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/events", get(sse_handler))
        .route("/state", get(state_handler))
        .route("/run", post(run_handler))
        .route("/stop", post(stop_handler))
        .route("/step", post(step_handler))
        .route("/confirm", post(confirm_handler))
        .route("/settings", get(get_settings_handler).post(save_settings_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state)
}

/// Bind the first free port from `port` upwards and serve until the listener fails.
pub async fn serve(state: Arc<PanelState>, port: u16) -> anyhow::Result<()> {
    let mut bound = None;
    for candidate in port..port.saturating_add(PORT_ATTEMPTS) {
        match tokio::net::TcpListener::bind(("127.0.0.1", candidate)).await {
            Ok(listener) => {
                bound = Some((listener, candidate));
                break;
            }
            Err(e) => debug!("Port {} unavailable: {}", candidate, e),
        }
    }
    let Some((listener, port)) = bound else {
        anyhow::bail!(
            "Could not bind to any port {}-{}",
            port,
            port.saturating_add(PORT_ATTEMPTS - 1)
        );
    };

    info!("Control panel running at http://localhost:{}", port);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn sse_handler(
    State(state): State<Arc<PanelState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let status = BroadcastStream::new(state.controller.status().subscribe())
        .filter_map(|event| event.ok())
        .filter_map(|event| Event::default().event("status").json_data(event).ok());
    let finished = BroadcastStream::new(state.finished.subscribe())
        .filter_map(|report| report.ok())
        .filter_map(|report| Event::default().event("finished").json_data(report).ok());

    Sse::new(status.merge(finished).map(Ok::<_, Infallible>)).keep_alive(KeepAlive::default())
}

fn state_view(controller: &DynController) -> RunStateView {
    let control = controller.control();
    RunStateView {
        running: control.is_running(),
        awaiting_step: control.awaiting_step(),
        awaiting_confirmation: control.awaiting_confirmation(),
        last_outcome: control.last_outcome(),
    }
}

async fn state_handler(State(state): State<Arc<PanelState>>) -> Json<RunStateView> {
    Json(state_view(&state.controller))
}

async fn run_handler(
    State(state): State<Arc<PanelState>>,
    Json(payload): Json<RunPayload>,
) -> Result<(StatusCode, Json<RunStateView>), ApiError> {
    let task = payload.task.trim().to_string();
    if task.is_empty() && !payload.demo_mode {
        return Err(api_error(StatusCode::BAD_REQUEST, "Enter a task first."));
    }

    let mut request = RunRequest::from_settings(task, &state.settings.get());
    request.mode = payload.mode;
    request.demo_mode = payload.demo_mode;
    info!(task = %request.task, mode = ?request.mode, "Run requested");

    let started = state.controller.start(request).await.map_err(|e| {
        warn!("Run did not start: {}", e);
        api_error(start_error_status(&e), e.to_string())
    })?;

    let controller = state.controller.clone();
    let finished = state.finished.clone();
    tokio::spawn(async move {
        let report = controller.finish(started).await;
        let _ = finished.send(report);
    });

    Ok((StatusCode::ACCEPTED, Json(state_view(&state.controller))))
}

fn start_error_status(error: &RunError) -> StatusCode {
    match error {
        RunError::RunAlreadyActive => StatusCode::CONFLICT,
        RunError::DomainBlocked { .. } => StatusCode::FORBIDDEN,
        RunError::Page(_) => StatusCode::BAD_GATEWAY,
    }
}

async fn stop_handler(State(state): State<Arc<PanelState>>) -> Json<Value> {
    Json(json!({ "ok": state.controller.control().stop() }))
}

async fn step_handler(State(state): State<Arc<PanelState>>) -> Json<Value> {
    Json(json!({ "ok": state.controller.control().step_continue() }))
}

async fn confirm_handler(
    State(state): State<Arc<PanelState>>,
    Json(payload): Json<ConfirmPayload>,
) -> Json<Value> {
    let ok = state
        .controller
        .control()
        .answer_confirmation(payload.approved);
    Json(json!({ "ok": ok }))
}

/// The stored API key is never sent back; `hasApiKey` says whether one is set.
async fn get_settings_handler(State(state): State<Arc<PanelState>>) -> Json<Value> {
    let mut settings = state.settings.get();
    let has_api_key = !std::mem::take(&mut settings.api_key).is_empty();
    let mut value = json!(settings);
    value["hasApiKey"] = json!(has_api_key);
    Json(value)
}

/// Replaces the settings wholesale. An empty `apiKey` keeps the stored one.
async fn save_settings_handler(
    State(state): State<Arc<PanelState>>,
    Json(mut settings): Json<Settings>,
) -> Result<Json<Value>, ApiError> {
    if settings.api_key.is_empty() {
        settings.api_key = state.settings.get().api_key;
    }
    state
        .settings
        .save(settings)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    info!("Settings saved to {}", state.settings.path().display());
    Ok(Json(json!({ "ok": true })))
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>WebCursor Agent</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; flex: 1; }
  header .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  header .dot.busy { background: #f59e0b; }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 860px;
    width: 100%;
    margin: 0 auto;
    padding: 20px 32px;
    gap: 12px;
    overflow: hidden;
  }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 14px; line-height: 1.4; background: #111118; border-left: 3px solid #3b82f6; }
  .entry .time { color: #666; font-size: 12px; margin-right: 8px; }
  .entry.warn { border-left-color: #f59e0b; color: #fcd34d; }
  .entry.error { border-left-color: #ef4444; color: #fca5a5; background: #1a0a0a; }
  .entry.success { border-left-color: #22c55e; color: #86efac; background: #0a1a0a; }
  .row { display: flex; gap: 8px; align-items: center; flex-wrap: wrap; }
  input[type=text], input[type=password], input[type=number], textarea, select {
    background: #111118; border: 1px solid #222; border-radius: 6px; padding: 10px 12px; color: #fff; font-size: 15px;
  }
  #task { flex: 1; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 6px; padding: 10px 18px; font-size: 14px; font-weight: 600; cursor: pointer; }
  button.secondary { background: #27272a; }
  button:disabled { background: #333; cursor: not-allowed; }
  #confirm-bar { display: none; padding: 10px 12px; background: #1a1408; border: 1px solid #f59e0b; border-radius: 6px; }
  details { background: #0f0f16; border-radius: 6px; padding: 10px 12px; }
  details label { display: block; margin: 8px 0 4px; font-size: 13px; color: #aaa; }
  details textarea { width: 100%; min-height: 60px; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>WebCursor Agent</h1>
  </header>
  <div class="main">
    <div class="row">
      <input type="text" id="task" placeholder="Describe the task..." autofocus />
      <select id="mode"><option value="auto">Auto</option><option value="step">Step</option></select>
      <label><input type="checkbox" id="demo" /> Demo</label>
    </div>
    <div class="row">
      <button id="run" onclick="run()">Run</button>
      <button class="secondary" onclick="post('/stop')">Stop</button>
      <button class="secondary" id="step" onclick="post('/step')">Step</button>
    </div>
    <div id="confirm-bar" class="row">
      <span style="flex:1">The agent is waiting for approval.</span>
      <button onclick="confirmAction(true)">Allow</button>
      <button class="secondary" onclick="confirmAction(false)">Cancel</button>
    </div>
    <div id="log"></div>
    <details>
      <summary>Settings</summary>
      <label>API key <span id="key-state"></span></label>
      <input type="password" id="apiKey" placeholder="Leave empty to keep the stored key" />
      <label>Model</label>
      <input type="text" id="model" />
      <label>Allowlist (one domain per line)</label>
      <textarea id="allowlist"></textarea>
      <label>Denylist (one domain per line)</label>
      <textarea id="denylist"></textarea>
      <label>Max steps</label>
      <input type="number" id="maxSteps" min="1" />
      <label><input type="checkbox" id="confirmRisky" /> Ask before risky actions</label>
      <div class="row" style="margin-top:10px"><button onclick="saveSettings()">Save</button></div>
    </details>
  </div>
<script>
  const log = document.getElementById('log');
  const dot = document.getElementById('status-dot');
  const esc = (s) => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');
  const lines = (id) => document.getElementById(id).value.split('\n').map(s => s.trim()).filter(Boolean);
  let current = {};

  function addEntry(level, message, timestamp) {
    const div = document.createElement('div');
    div.className = 'entry ' + level;
    const time = timestamp ? new Date(timestamp).toLocaleTimeString() : '';
    div.innerHTML = '<span class="time">' + time + '</span>' + esc(message);
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  async function post(path, body) {
    const res = await fetch(path, {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify(body || {}),
    });
    const data = await res.json().catch(() => ({}));
    if (!res.ok && data.error) addEntry('error', data.error);
    refresh();
    return data;
  }

  function run() {
    post('/run', {
      task: document.getElementById('task').value,
      mode: document.getElementById('mode').value,
      demoMode: document.getElementById('demo').checked,
    });
  }

  function confirmAction(approved) { post('/confirm', { approved }); }

  async function refresh() {
    const s = await (await fetch('/state')).json();
    dot.className = s.running ? 'dot busy' : 'dot';
    document.getElementById('run').disabled = s.running;
    document.getElementById('step').disabled = !s.awaitingStep;
    document.getElementById('confirm-bar').style.display = s.awaitingConfirmation ? 'flex' : 'none';
  }

  async function loadSettings() {
    current = await (await fetch('/settings')).json();
    document.getElementById('key-state').textContent = current.hasApiKey ? '(stored)' : '(not set)';
    document.getElementById('model').value = current.model;
    document.getElementById('allowlist').value = current.allowlist.join('\n');
    document.getElementById('denylist').value = current.denylist.join('\n');
    document.getElementById('maxSteps').value = current.maxSteps;
    document.getElementById('confirmRisky').checked = current.safety.requireConfirmRisky;
  }

  async function saveSettings() {
    const body = {
      apiKey: document.getElementById('apiKey').value.trim(),
      provider: current.provider,
      model: document.getElementById('model').value.trim(),
      allowlist: lines('allowlist'),
      denylist: lines('denylist'),
      safety: { requireConfirmRisky: document.getElementById('confirmRisky').checked },
      maxSteps: Number(document.getElementById('maxSteps').value) || 25,
    };
    const data = await post('/settings', body);
    if (data.ok) addEntry('success', 'Settings saved');
    document.getElementById('apiKey').value = '';
    loadSettings();
  }

  document.getElementById('task').addEventListener('keydown', e => { if (e.key === 'Enter') run(); });

  const es = new EventSource('/events');
  es.addEventListener('status', e => {
    const d = JSON.parse(e.data);
    addEntry(d.level, d.message, d.timestamp);
    refresh();
  });
  es.addEventListener('finished', e => {
    const r = JSON.parse(e.data);
    addEntry('info', 'Run finished after ' + r.steps + ' steps (' + r.outcome.state + ')');
    refresh();
  });

  loadSettings();
  refresh();
</script>
</body>
</html>
"##;
