//! Script-side half of the bridge.
//!
//! The shim is a single global object (named after the configured namespace)
//! installed at document start. Native code only ever talks to it through the
//! small scripts built here; every name and payload is embedded as a JSON
//! literal, never spliced in raw.

use crate::engine::js_string;
use crate::error::{BridgeError, Result};

/// Members of the shim object that a binding must not shadow.
pub const RESERVED_NAMES: &[&str] = &[
    "call",
    "on",
    "off",
    "_emit",
    "_resolveCall",
    "_settleCall",
    "_pendingCount",
    "_listenerCount",
    "__installed",
    "__proto__",
    "constructor",
];

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BridgeError::InvalidName);
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(BridgeError::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Source that installs the shim object. Running it twice is harmless.
pub fn shim_source(namespace: &str) -> String {
    SHIM_TEMPLATE.replace("__NAMESPACE__", &js_string(namespace))
}

/// Everything a fresh document needs: the shim plus one wrapper per bound name.
pub fn document_start_script<'a>(
    namespace: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> String {
    let mut script = shim_source(namespace);
    for name in names {
        script.push('\n');
        script.push_str(&bind_wrapper(namespace, name));
    }
    script
}

/// `ns[name] = (...args) => ns.call(name, ...args)`
pub fn bind_wrapper(namespace: &str, name: &str) -> String {
    let name = js_string(name);
    with_namespace(
        namespace,
        &format!("ns[{name}] = (...args) => ns.call({name}, ...args);"),
    )
}

pub fn unbind_wrapper(namespace: &str, name: &str) -> String {
    with_namespace(namespace, &format!("delete ns[{}];", js_string(name)))
}

/// Settle the oldest pending call to `name`. `None` resolves with `undefined`.
pub fn resolve_call(namespace: &str, name: &str, result: Option<&str>) -> String {
    with_namespace(
        namespace,
        &format!(
            "ns._resolveCall({}, {});",
            js_string(name),
            result.unwrap_or("undefined")
        ),
    )
}

/// Settle the call carrying `token` (a JSON literal as sent by the shim).
pub fn settle_call(namespace: &str, token: &str, ok: bool, value: Option<&str>) -> String {
    with_namespace(
        namespace,
        &format!(
            "ns._settleCall({token}, {ok}, {});",
            value.unwrap_or("undefined")
        ),
    )
}

/// Invoke the listeners of `event`. `None` is delivered as `null`.
pub fn emit_event(namespace: &str, event: &str, payload: Option<&str>) -> String {
    with_namespace(
        namespace,
        &format!("ns._emit({}, {});", js_string(event), payload.unwrap_or("null")),
    )
}

// Documents loaded without the shim (e.g. before the first bind) just ignore
// the statement.
fn with_namespace(namespace: &str, body: &str) -> String {
    format!(
        "(() => {{ const ns = globalThis[{}]; if (ns) {{ {body} }} }})();",
        js_string(namespace)
    )
}

const SHIM_TEMPLATE: &str = r#"
(() => {
    const root = globalThis;
    const namespace = __NAMESPACE__;
    if (root[namespace] && root[namespace].__installed) {
        return;
    }

    const pending = [];
    const listeners = Object.create(null);
    let nextId = 1;

    const take = (predicate) => {
        const index = pending.findIndex(predicate);
        return index < 0 ? undefined : pending.splice(index, 1)[0];
    };

    const ns = {
        __installed: true,

        call(name, ...args) {
            return new Promise((resolve, reject) => {
                const id = nextId++;
                const entry = { name, id, resolve, reject };
                pending.push(entry);
                try {
                    const handler = root.webkit.messageHandlers[namespace];
                    handler.postMessage(JSON.stringify({
                        function: name,
                        args: JSON.stringify(args),
                        id,
                    }));
                } catch (err) {
                    take((candidate) => candidate === entry);
                    reject(err);
                }
            });
        },

        on(event, callback) {
            if (typeof callback !== 'function') {
                throw new TypeError('listener must be a function');
            }
            (listeners[event] = listeners[event] || []).push(callback);
            return () => ns.off(event, callback);
        },

        off(event, callback) {
            const list = listeners[event];
            if (!list) {
                return;
            }
            const index = list.indexOf(callback);
            if (index >= 0) {
                list.splice(index, 1);
            }
            if (list.length === 0) {
                delete listeners[event];
            }
        },

        _emit(event, payload) {
            const list = listeners[event];
            if (!list) {
                return;
            }
            for (const callback of list.slice()) {
                try {
                    callback(payload);
                } catch (err) {
                    console.error('listener for ' + event + ' failed: ' + err);
                }
            }
        },

        _resolveCall(name, result) {
            const entry = take((candidate) => candidate.name === name);
            if (entry) {
                entry.resolve(result);
            }
        },

        _settleCall(id, ok, value) {
            const entry = take((candidate) => candidate.id === id);
            if (!entry) {
                return;
            }
            if (ok) {
                entry.resolve(value);
            } else {
                entry.reject(value);
            }
        },

        _pendingCount(name) {
            if (name === undefined) {
                return pending.length;
            }
            return pending.filter((entry) => entry.name === name).length;
        },

        _listenerCount(event) {
            const list = listeners[event];
            return list ? list.length : 0;
        },
    };

    root[namespace] = ns;
})();
"#;
