use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webcursor::chrome::DEFAULT_DEBUG_URL;
use webcursor::controller::ControlHandle;
use webcursor::face::{self, DEFAULT_PORT, PanelState};
use webcursor::settings::default_settings_path;
use webcursor::{
    Brain, BrowserOptions, ChromePage, Controller, Page, ReasoningClient, RunMode, RunOutcome,
    RunRequest, SettingsStore, StatusSink,
};

#[derive(Parser)]
#[command(name = "webcursor", version, about = "Operate a Chrome tab with an LLM-guided visible cursor")]
struct Cli {
    /// Settings file (defaults to the platform config dir).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task in the terminal.
    Run {
        /// What the agent should do.
        task: String,

        /// Pause after every action until Enter is pressed.
        #[arg(long)]
        step: bool,

        /// Use the scripted demo planner instead of the model.
        #[arg(long)]
        demo: bool,

        /// Override the stored step budget.
        #[arg(long)]
        max_steps: Option<u32>,

        /// Run risky actions without asking.
        #[arg(long)]
        no_confirm: bool,

        /// Add a domain to the allowlist for this run.
        #[arg(long = "allow", value_name = "DOMAIN")]
        allow: Vec<String>,

        /// Add a domain to the denylist for this run.
        #[arg(long = "deny", value_name = "DOMAIN")]
        deny: Vec<String>,

        #[command(flatten)]
        browser: BrowserArgs,
    },
    /// Serve the control panel.
    Serve {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        #[command(flatten)]
        browser: BrowserArgs,
    },
}

#[derive(Args)]
struct BrowserArgs {
    /// Open this page before starting.
    #[arg(long)]
    url: Option<String>,

    /// DevTools endpoint of a running Chrome to attach to.
    #[arg(long, default_value = DEFAULT_DEBUG_URL)]
    debug_url: String,

    /// Launch Chrome headless when no running instance is found.
    #[arg(long)]
    headless: bool,

    #[arg(long)]
    chrome_path: Option<PathBuf>,
}

impl BrowserArgs {
    async fn open(&self) -> Result<Arc<ChromePage>> {
        let options = BrowserOptions {
            debug_url: self.debug_url.clone(),
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            ..BrowserOptions::default()
        };
        info!("Launching Chrome...");
        let page = ChromePage::open(options).await?;
        if let Some(url) = &self.url {
            page.goto(url).await.with_context(|| format!("Could not open {url}"))?;
        }
        Ok(Arc::new(page))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webcursor=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let settings = Arc::new(
        SettingsStore::open(&settings_path)
            .with_context(|| format!("Failed to load {}", settings_path.display()))?,
    );

    match cli.command {
        Command::Run {
            task,
            step,
            demo,
            max_steps,
            no_confirm,
            allow,
            deny,
            browser,
        } => {
            let page = browser.open().await?;
            let controller = build_controller(page, &settings);

            let mut request = RunRequest::from_settings(task, &settings.get());
            request.demo_mode = demo;
            if step {
                request.mode = RunMode::Step;
            }
            if let Some(max_steps) = max_steps {
                request.max_steps = max_steps;
            }
            if no_confirm {
                request.safety.require_confirm_risky = false;
            }
            request.allowlist.extend(allow);
            request.denylist.extend(deny);

            // A plain thread so a pending stdin read never holds up shutdown.
            let terminal = controller.control();
            std::thread::spawn(move || forward_terminal_input(terminal));
            let control = controller.control();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    control.stop();
                }
            });

            let report = controller.run(request).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(match report.outcome {
                RunOutcome::Completed { .. } => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            })
        }
        Command::Serve { port, browser } => {
            let page = browser.open().await?;
            let controller = build_controller(page, &settings);
            face::serve(PanelState::new(Arc::new(controller), settings), port).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_controller(
    page: Arc<ChromePage>,
    settings: &Arc<SettingsStore>,
) -> Controller<dyn Page, dyn ReasoningClient> {
    let page: Arc<dyn Page> = page;
    let brain: Arc<dyn ReasoningClient> = Arc::new(Brain::new(settings.clone()));
    Controller::new(page, brain, StatusSink::default())
}

/// Terminal stand-in for the panel buttons: Enter steps, `y`/`n` answer a
/// pending confirmation, `q` stops.
fn forward_terminal_input(control: ControlHandle) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let handled = match line.trim() {
            "y" | "yes" => control.answer_confirmation(true),
            "n" | "no" => control.answer_confirmation(false),
            "q" | "quit" | "stop" => control.stop(),
            "" => control.step_continue(),
            other => {
                warn!("Unknown input '{}' (Enter = step, y/n = confirm, q = stop)", other);
                continue;
            }
        };
        if !handled {
            warn!("Nothing is waiting for that input");
        }
    }
}
