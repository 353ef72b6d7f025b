use serde::Serialize;
use tracing::trace;

use super::{shim, Bridge};
use crate::error::{BridgeError, Result};

impl Bridge {
    /// Broadcast `event` to its script-side listeners.
    ///
    /// `payload` is serialised JSON and is handed over unvalidated; `None`
    /// arrives as `null`. Fire-and-forget: with no listeners nothing happens.
    /// Events emitted in sequence reach listeners in that order.
    pub fn emit(&self, event: &str, payload: Option<&str>) -> Result<()> {
        if event.is_empty() {
            return Err(BridgeError::InvalidName);
        }
        trace!(target: "pagebridge", bridge = %self.name(), %event, "emitting event");
        self.inject(&shim::emit_event(self.namespace(), event, payload));
        Ok(())
    }

    pub fn emit_json<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> Result<()> {
        let payload = serde_json::to_string(payload)?;
        self.emit(event, Some(&payload))
    }
}
