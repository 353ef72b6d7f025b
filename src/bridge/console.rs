use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use super::registry::CallHandler;
use super::Bridge;
use crate::engine::{ConsoleLevel, ConsoleMessage};

/// Name handed to console handlers in place of a function name.
pub const CONSOLE_HANDLER_NAME: &str = "console";

/// Routes script console output to a registered handler or the log.
pub(crate) struct ConsoleRelay {
    enabled: bool,
    handler: RefCell<Option<Rc<dyn CallHandler>>>,
}

impl ConsoleRelay {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            handler: RefCell::new(None),
        }
    }

    pub(crate) fn set_handler(&self, handler: Option<Rc<dyn CallHandler>>) {
        // the old handler drops after the borrow is released
        let previous = self.handler.replace(handler);
        drop(previous);
    }

    pub(crate) fn relay(&self, bridge: &Bridge, message: &ConsoleMessage) {
        if !self.enabled {
            return;
        }

        let handler = self.handler.borrow().clone();
        match handler {
            Some(handler) => match serde_json::to_string(message) {
                Ok(payload) => {
                    let _ = handler.call(bridge, CONSOLE_HANDLER_NAME, &payload);
                }
                Err(err) => {
                    warn!(target: "pagebridge::console", error = %err, "failed to encode console message");
                }
            },
            None => default_sink(bridge, message),
        }
    }
}

fn default_sink(bridge: &Bridge, message: &ConsoleMessage) {
    let source = message.source.as_str();
    let line = message.line;
    let bridge = bridge.name();
    match message.level {
        ConsoleLevel::Log | ConsoleLevel::Info => info!(
            target: "pagebridge::console",
            %bridge, level = message.level.as_str(), %source, line,
            "{}", message.text
        ),
        ConsoleLevel::Warning => warn!(
            target: "pagebridge::console",
            %bridge, level = message.level.as_str(), %source, line,
            "{}", message.text
        ),
        ConsoleLevel::Error => error!(
            target: "pagebridge::console",
            %bridge, level = message.level.as_str(), %source, line,
            "{}", message.text
        ),
        ConsoleLevel::Debug => debug!(
            target: "pagebridge::console",
            %bridge, level = message.level.as_str(), %source, line,
            "{}", message.text
        ),
    }
}

impl Bridge {
    /// Receive console messages instead of the default log sink.
    ///
    /// The handler is called with the name `"console"` and a JSON object
    /// `{"level", "message", "source", "line"}`. Its return value is ignored.
    pub fn set_console_handler<F>(&self, handler: F)
    where
        F: Fn(&Bridge, &str, &str) -> Option<String> + 'static,
    {
        self.inner.console.set_handler(Some(Rc::new(handler)));
    }

    /// Go back to logging console messages.
    pub fn clear_console_handler(&self) {
        self.inner.console.set_handler(None);
    }
}
