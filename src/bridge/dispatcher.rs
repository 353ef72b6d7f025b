//! Inbound call handling.
//!
//! A call request arrives as the body the shim posted to the bridge's message
//! handler. It is decoded, looked up in the registry, handed to the bound
//! handler, and answered with a resolution script. What happens on a lookup
//! miss and how resolutions find their pending call depends on the
//! configured [`CallProtocol`].

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use super::{shim, Bridge};
use crate::config::CallProtocol;

/// One decoded call request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallRequest {
    #[serde(rename = "function")]
    pub name: String,
    /// Serialised argument array, passed through unvalidated.
    #[serde(default = "empty_args", deserialize_with = "args_payload")]
    pub args: String,
    /// Correlation token as sent by the script.
    #[serde(default)]
    pub id: JsonValue,
}

impl CallRequest {
    pub fn decode(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }
}

fn empty_args() -> String {
    "[]".to_string()
}

// The shim sends the arguments pre-serialised; tolerate a raw array too.
fn args_payload<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(raw) => raw,
        JsonValue::Null => empty_args(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and a resolution was injected.
    Resolved { name: String },
    /// No binding; the pending call was answered with a rejection.
    Rejected { name: String },
    /// Nothing was injected; the pending call (if any) stays unsettled.
    Dropped { reason: DropReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Unbound { name: String },
    Malformed { error: String },
}

/// Running totals of dispatch outcomes for one bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub resolved: usize,
    pub rejected: usize,
    pub dropped: usize,
}

impl DispatchStats {
    pub(crate) fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Resolved { .. } => self.resolved += 1,
            DispatchOutcome::Rejected { .. } => self.rejected += 1,
            DispatchOutcome::Dropped { .. } => self.dropped += 1,
        }
    }
}

pub(crate) struct CallDispatcher {
    namespace: String,
    protocol: CallProtocol,
}

impl CallDispatcher {
    pub(crate) fn new(namespace: &str, protocol: CallProtocol) -> Self {
        Self {
            namespace: namespace.to_string(),
            protocol,
        }
    }

    pub(crate) fn dispatch(&self, bridge: &Bridge, body: &str) -> DispatchOutcome {
        let request = match CallRequest::decode(body) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    target: "pagebridge::dispatch",
                    bridge = %bridge.name(),
                    error = %err,
                    "dropping undecodable call request"
                );
                return DispatchOutcome::Dropped {
                    reason: DropReason::Malformed {
                        error: err.to_string(),
                    },
                };
            }
        };

        let Some(handler) = bridge.binding(&request.name) else {
            return self.unbound(bridge, request);
        };

        debug!(
            target: "pagebridge::dispatch",
            function = %request.name,
            id = %request.id,
            "dispatching call"
        );
        let result = handler.call(bridge, &request.name, &request.args);
        // a handler that unbound itself is cleaned up here, after it returned
        drop(handler);

        let script = match self.protocol {
            CallProtocol::ByName => {
                shim::resolve_call(&self.namespace, &request.name, result.as_deref())
            }
            CallProtocol::ByToken => shim::settle_call(
                &self.namespace,
                &request.id.to_string(),
                true,
                result.as_deref(),
            ),
        };
        bridge.inject(&script);

        DispatchOutcome::Resolved { name: request.name }
    }

    fn unbound(&self, bridge: &Bridge, request: CallRequest) -> DispatchOutcome {
        match self.protocol {
            CallProtocol::ByName => {
                warn!(
                    target: "pagebridge::dispatch",
                    bridge = %bridge.name(),
                    function = %request.name,
                    "no binding for called function, dropping call"
                );
                DispatchOutcome::Dropped {
                    reason: DropReason::Unbound { name: request.name },
                }
            }
            CallProtocol::ByToken => {
                warn!(
                    target: "pagebridge::dispatch",
                    bridge = %bridge.name(),
                    function = %request.name,
                    "no binding for called function, rejecting call"
                );
                let error = json!({ "error": "unbound function", "function": &request.name });
                bridge.inject(&shim::settle_call(
                    &self.namespace,
                    &request.id.to_string(),
                    false,
                    Some(&error.to_string()),
                ));
                DispatchOutcome::Rejected { name: request.name }
            }
        }
    }
}
