//! Native side of the page bridge.
//!
//! A [`Bridge`] owns one hosted page. Native code binds functions scripts can
//! call, emits events to script listeners, runs scripts and waits for the page
//! to finish loading. Everything happens on the thread that owns the
//! [`MainLoop`]; `Bridge` is deliberately `!Send`; other threads reach it
//! through a [`LoopHandle`].
//!
//! Script side, the bridge is a global object named after the configured
//! namespace (see [`shim`]):
//!
//! ```js
//! const sum = await pagebridge.add(2, 3);
//! const off = pagebridge.on('tick', (payload) => console.log(payload.n));
//! ```

mod console;
pub mod dispatcher;
mod events;
mod readiness;
mod registry;
pub mod shim;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::engine::{Content, EngineEvent, HostEngine, LoadEvent};
use crate::error::{BridgeError, Result};
use crate::main_loop::{LoopHandle, LoopSource, MainLoop, SourceStatus};

pub use console::CONSOLE_HANDLER_NAME;
pub use dispatcher::{CallRequest, DispatchOutcome, DispatchStats, DropReason};
pub use registry::CallHandler;

use dispatcher::CallDispatcher;
use readiness::Readiness;
use registry::{Binding, CallbackRegistry, ContextHandler};
use console::ConsoleRelay;

pub const DEFAULT_BRIDGE_NAME: &str = "pagebridge";

/// Completion callback of [`Bridge::execute_script`].
pub type ScriptCallback = Box<dyn FnOnce(Result<Option<String>>)>;

/// Handle to one bridged page. Clones share the same bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Rc<BridgeInner>,
}

struct BridgeInner {
    name: String,
    namespace: String,
    // taken on teardown
    engine: RefCell<Option<Box<dyn HostEngine>>>,
    registry: RefCell<CallbackRegistry>,
    dispatcher: CallDispatcher,
    readiness: Readiness,
    console: ConsoleRelay,
    stats: Cell<DispatchStats>,
    main_loop: MainLoop,
}

impl Bridge {
    /// Attach a bridge to `engine` and register it with `main_loop`.
    ///
    /// Most applications go through
    /// [`BridgeRuntime::create_bridge`](crate::runtime::BridgeRuntime::create_bridge)
    /// instead.
    pub fn new(
        name: &str,
        engine: Box<dyn HostEngine>,
        main_loop: &MainLoop,
        config: &BridgeConfig,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(BridgeError::InvalidName);
        }
        config.validate()?;

        let inner = Rc::new(BridgeInner {
            name: name.to_string(),
            namespace: config.namespace.clone(),
            engine: RefCell::new(Some(engine)),
            registry: RefCell::new(CallbackRegistry::default()),
            dispatcher: CallDispatcher::new(&config.namespace, config.call_protocol),
            readiness: Readiness::default(),
            console: ConsoleRelay::new(config.enable_console),
            stats: Cell::new(DispatchStats::default()),
            main_loop: main_loop.clone(),
        });
        let bridge = Self { inner };

        bridge.with_engine(|engine| {
            engine.register_message_handler(&config.namespace);
            engine.set_document_start_script(shim::document_start_script(
                &config.namespace,
                std::iter::empty(),
            ));
            // the current document predates the document-start script
            engine.inject_script(&shim::shim_source(&config.namespace));
        });
        main_loop.add_source(Rc::new(BridgeSource {
            bridge: Rc::downgrade(&bridge.inner),
        }));

        info!(
            target: "pagebridge",
            bridge = %name,
            namespace = %config.namespace,
            protocol = ?config.call_protocol,
            "bridge created"
        );
        Ok(bridge)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Name of the script-side global.
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn main_loop(&self) -> &MainLoop {
        &self.inner.main_loop
    }

    /// `Send` handle for scheduling work onto this bridge's loop.
    pub fn handle(&self) -> LoopHandle {
        self.inner.main_loop.handle()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.engine.borrow().is_none()
    }

    /// Expose `handler` to scripts as `<namespace>.<name>(...)`.
    ///
    /// Binding an already bound name replaces it; the old binding is dropped
    /// (running its destructor) before the new one is installed.
    pub fn bind<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&Bridge, &str, &str) -> Option<String> + 'static,
    {
        self.install(name, Rc::new(handler))
    }

    /// Like [`Bridge::bind`] for types implementing [`CallHandler`].
    pub fn bind_handler(&self, name: &str, handler: impl CallHandler + 'static) -> Result<()> {
        self.install(name, Rc::new(handler))
    }

    /// Bind with a caller-owned `context`. `destroy` receives the context
    /// exactly once, when the binding is replaced, unbound or torn down.
    pub fn bind_with_context<T, F>(
        &self,
        name: &str,
        handler: F,
        context: T,
        destroy: Option<Box<dyn FnOnce(T)>>,
    ) -> Result<()>
    where
        T: 'static,
        F: Fn(&Bridge, &str, &str, &T) -> Option<String> + 'static,
    {
        self.install(name, Rc::new(ContextHandler::new(context, handler, destroy)))
    }

    /// Bind a handler working on decoded arguments. An `Err` resolves the
    /// call with `{"error": "<message>"}`.
    pub fn bind_json<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&Bridge, Vec<JsonValue>) -> anyhow::Result<JsonValue> + 'static,
    {
        self.bind(name, move |bridge: &Bridge, _: &str, args: &str| {
            let outcome = serde_json::from_str::<Vec<JsonValue>>(args)
                .map_err(|err| anyhow::anyhow!("invalid arguments: {err}"))
                .and_then(|args| handler(bridge, args));
            let value = match outcome {
                Ok(value) => value,
                Err(err) => json!({ "error": format!("{err:#}") }),
            };
            Some(value.to_string())
        })
    }

    /// Remove a binding. Returns whether `name` was bound; unbinding an
    /// unknown name is not an error.
    pub fn unbind(&self, name: &str) -> bool {
        let removed = self.inner.registry.borrow_mut().remove(name);
        let Some(binding) = removed else {
            return false;
        };
        drop(binding);

        self.refresh_document_start();
        self.inject(&shim::unbind_wrapper(self.namespace(), name));
        debug!(target: "pagebridge", bridge = %self.name(), function = %name, "unbound");
        true
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.inner.registry.borrow().contains(name)
    }

    /// Bound names in sorted order.
    pub fn bound_names(&self) -> Vec<String> {
        self.inner.registry.borrow().names()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.inner.stats.get()
    }

    /// Load `uri` (`http(s)`, `file`, `data` or `about:blank`). Readiness
    /// drops back to loading first; errors mean the load never started.
    pub fn load_uri(&self, uri: &str) -> Result<()> {
        self.load(Content::Uri(uri.to_string()))
    }

    pub fn load_html(&self, html: &str, base_uri: Option<&str>) -> Result<()> {
        self.load(Content::Html {
            html: html.to_string(),
            base_uri: base_uri.map(str::to_string),
        })
    }

    fn load(&self, content: Content) -> Result<()> {
        self.set_loading();
        let mut engine = self.inner.engine.borrow_mut();
        let engine = engine.as_mut().ok_or(BridgeError::Destroyed)?;
        engine.load(content)
    }

    /// Run `script` in the page on the next loop iteration. The callback
    /// receives the completion value serialised as JSON.
    pub fn execute_script(&self, script: &str, callback: Option<ScriptCallback>) {
        let bridge = self.clone();
        let script = script.to_string();
        self.inner.main_loop.invoke(move || {
            let result = bridge.execute_script_sync(&script);
            match callback {
                Some(callback) => callback(result),
                None => {
                    if let Err(err) = result {
                        warn!(target: "pagebridge", bridge = %bridge.name(), error = %err, "script failed");
                    }
                }
            }
        });
    }

    /// Run `script` now and return its completion value serialised as JSON.
    pub fn execute_script_sync(&self, script: &str) -> Result<Option<String>> {
        let mut engine = self.inner.engine.borrow_mut();
        let engine = engine.as_mut().ok_or(BridgeError::Destroyed)?;
        engine.evaluate(script)
    }

    pub fn run(&self) {
        self.inner.main_loop.run();
    }

    pub fn quit(&self) {
        self.inner.main_loop.quit();
    }

    /// Release the bindings (running their destructors), then the engine.
    /// Other clones of this handle see a destroyed bridge afterwards.
    pub fn destroy(self) {
        self.inner.teardown();
    }

    fn install(&self, name: &str, binding: Binding) -> Result<()> {
        shim::validate_name(name)?;
        if self.is_destroyed() {
            return Err(BridgeError::Destroyed);
        }

        let previous = self.inner.registry.borrow_mut().remove(name);
        let replaced = previous.is_some();
        drop(previous);
        self.inner
            .registry
            .borrow_mut()
            .insert(name.to_string(), binding);

        self.refresh_document_start();
        self.inject(&shim::bind_wrapper(self.namespace(), name));
        debug!(target: "pagebridge", bridge = %self.name(), function = %name, replaced, "bound");
        Ok(())
    }

    fn refresh_document_start(&self) {
        let names = self.bound_names();
        let script =
            shim::document_start_script(self.namespace(), names.iter().map(String::as_str));
        self.with_engine(|engine| engine.set_document_start_script(script));
    }

    pub(crate) fn binding(&self, name: &str) -> Option<Binding> {
        self.inner.registry.borrow().get(name)
    }

    /// Fire-and-forget script injection; a destroyed bridge ignores it.
    pub(crate) fn inject(&self, script: &str) {
        if self.with_engine(|engine| engine.inject_script(script)).is_none() {
            debug!(target: "pagebridge", bridge = %self.name(), "bridge destroyed, script not injected");
        }
    }

    fn with_engine<R>(&self, work: impl FnOnce(&mut dyn HostEngine) -> R) -> Option<R> {
        let mut engine = self.inner.engine.borrow_mut();
        engine.as_mut().map(|engine| work(engine.as_mut()))
    }

    fn next_engine_event(&self) -> Option<EngineEvent> {
        let mut engine = self.inner.engine.try_borrow_mut().ok()?;
        engine.as_mut()?.poll_event()
    }

    fn route(&self, event: EngineEvent) {
        match event {
            EngineEvent::Load(LoadEvent::Started) => {
                debug!(target: "pagebridge", bridge = %self.name(), "load started");
                self.set_loading();
            }
            EngineEvent::Load(LoadEvent::Finished) => self.set_ready(),
            EngineEvent::Load(LoadEvent::Failed { uri, error }) => {
                warn!(target: "pagebridge", bridge = %self.name(), %uri, %error, "load failed");
            }
            EngineEvent::ScriptMessage { handler, body } if handler == self.inner.namespace => {
                let outcome = self.inner.dispatcher.dispatch(self, &body);
                let mut stats = self.inner.stats.get();
                stats.record(&outcome);
                self.inner.stats.set(stats);
            }
            EngineEvent::ScriptMessage { handler, .. } => {
                debug!(target: "pagebridge", bridge = %self.name(), %handler, "ignoring message for foreign handler");
            }
            EngineEvent::Console(message) => self.inner.console.relay(self, &message),
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("name", &self.inner.name)
            .field("namespace", &self.inner.namespace)
            .field("ready", &self.is_ready())
            .field("bound", &self.inner.registry.borrow().len())
            .finish()
    }
}

impl BridgeInner {
    fn teardown(&self) {
        let bindings = self.registry.borrow_mut().take_all();
        drop(bindings);
        let engine = self.engine.borrow_mut().take();
        if engine.is_some() {
            drop(engine);
            info!(target: "pagebridge", bridge = %self.name, "bridge destroyed");
        }
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Drains a bridge's engine signals on every loop iteration.
struct BridgeSource {
    bridge: Weak<BridgeInner>,
}

impl LoopSource for BridgeSource {
    fn dispatch(&self) -> SourceStatus {
        let Some(inner) = self.bridge.upgrade() else {
            return SourceStatus::Detached;
        };
        let bridge = Bridge { inner };
        if bridge.is_destroyed() {
            return SourceStatus::Detached;
        }

        let mut status = SourceStatus::Idle;
        while let Some(event) = bridge.next_engine_event() {
            bridge.route(event);
            status = SourceStatus::Busy;
        }
        status
    }
}
