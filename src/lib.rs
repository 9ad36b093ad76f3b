//! WebCursor: an LLM-guided agent that operates a live web page through a
//! visible synthetic cursor, pausing for a human before risky actions.

pub mod brain;
pub mod chrome;
pub mod controller;
pub mod dom;
pub mod face;
pub mod gate;
pub mod guard;
pub mod hands;
pub mod overlay;
pub mod page;
pub mod resolver;
pub mod risk;
pub mod settings;
pub mod status;
pub mod types;

#[cfg(test)]
mod testing;

pub use brain::{Brain, ClientError, OpenAiClient, ReasoningClient};
pub use chrome::{BrowserOptions, ChromePage};
pub use controller::{
    ControlHandle, Controller, RunError, RunMode, RunOutcome, RunReport, RunRequest, StartedRun,
};
pub use page::{Page, PageError};
pub use settings::{Settings, SettingsStore};
pub use status::{StatusEvent, StatusLevel, StatusSink};
