//! Boundary to the page-hosting render engine.
//!
//! The bridge never renders or runs scripts itself. It drives an engine through
//! [`HostEngine`] and consumes the signals the engine reports back as
//! [`EngineEvent`]s, polled once per main-loop iteration.

pub mod document;
pub mod fetch;
pub mod quickjs;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use quickjs::QuickJsEngine;

/// Quote `value` as a script string literal.
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_owned()).to_string()
}

/// Content to load into the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// `http(s)://`, `file://`, `data:` or `about:blank`.
    Uri(String),
    Html {
        html: String,
        base_uri: Option<String>,
    },
}

/// Page load progress. A failed load reports `Failed` and then `Finished`
/// for the error page that replaces the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    Started,
    Finished,
    Failed { uri: String, error: String },
}

/// Severity of a script-side console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleLevel {
    #[serde(rename = "LOG")]
    Log,
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warning,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "DEBUG")]
    Debug,
}

impl ConsoleLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "LOG",
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Debug => "DEBUG",
        }
    }

    /// Parse the method name a script used (`console.warn` → `warn`).
    pub fn from_method(method: &str) -> Self {
        match method {
            "info" => Self::Info,
            "warn" | "warning" => Self::Warning,
            "error" => Self::Error,
            "debug" | "trace" => Self::Debug,
            _ => Self::Log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    #[serde(rename = "message")]
    pub text: String,
    pub source: String,
    pub line: u32,
}

/// Signals an engine reports back to the bridge that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Load(LoadEvent),
    /// A script posted `body` to the message handler registered as `handler`.
    ScriptMessage { handler: String, body: String },
    Console(ConsoleMessage),
}

/// Narrow interface the bridge consumes from the page-hosting engine.
///
/// Implementations are driven from the main-loop thread only. Engines living
/// on another thread must marshal their signals through a
/// [`LoopHandle`](crate::main_loop::LoopHandle) so a blocked iteration wakes.
pub trait HostEngine {
    /// Start loading new content. Progress is reported through
    /// [`LoadEvent`]s; an error here means the load never started.
    fn load(&mut self, content: Content) -> Result<()>;

    /// Script run at document start of every subsequent load, replacing any
    /// previously set one.
    fn set_document_start_script(&mut self, source: String);

    /// Expose a message handler scripts post to through
    /// `webkit.messageHandlers[name].postMessage(body)`.
    fn register_message_handler(&mut self, name: &str);

    /// Run a script in the current document, fire-and-forget. Failures are
    /// reported by the engine's own diagnostics, not to the caller.
    fn inject_script(&mut self, source: &str);

    /// Run a script and return its completion value serialised as JSON, or
    /// `None` when the value has no JSON form (e.g. `undefined`).
    fn evaluate(&mut self, source: &str) -> Result<Option<String>>;

    /// Next pending signal, if any.
    fn poll_event(&mut self) -> Option<EngineEvent>;
}
