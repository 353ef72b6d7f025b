use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rquickjs::function::Opt;
use rquickjs::{Context, Ctx, Error as JsError, Function, Runtime, Value};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::document::{collect_scripts, execution_order, ScriptSource};
use super::fetch::{fetch_document, fetch_resource, FetchedDocument, ABOUT_BLANK};
use super::{
    js_string, ConsoleLevel, ConsoleMessage, Content, EngineEvent, HostEngine, LoadEvent,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

const MAX_JOBS: usize = 1000;
const DOCUMENT_START_FILE: &str = "pagebridge:document-start";
const INJECT_FILE: &str = "pagebridge:inject";
const EVALUATE_FILE: &str = "pagebridge:evaluate";

type EventQueue = Rc<RefCell<VecDeque<EngineEvent>>>;

enum Resolved {
    Document(FetchedDocument),
    Failed { uri: String, error: BridgeError },
}

/// Headless page engine backed by QuickJS.
///
/// Every load gets a fresh QuickJS context with a small browser-like
/// environment (`window`, `navigator`, `location`, `console`,
/// `webkit.messageHandlers`). Inline and external classic `<script>`s run in
/// document order; there is no DOM or layout. Signals are queued and handed
/// out through [`HostEngine::poll_event`].
pub struct QuickJsEngine {
    // dropped before the runtime
    context: Context,
    runtime: Runtime,
    events: EventQueue,
    current_script: Rc<RefCell<String>>,
    document_start: Option<String>,
    message_handlers: Vec<String>,
    user_agent: String,
    width: u32,
    height: u32,
    developer_extras: bool,
    location: String,
}

impl QuickJsEngine {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let runtime = Runtime::new().map_err(|err| {
            BridgeError::BackendUnavailable(format!("failed to create QuickJS runtime: {err}"))
        })?;
        let context = Context::full(&runtime).map_err(|err| {
            BridgeError::BackendUnavailable(format!("failed to create QuickJS context: {err}"))
        })?;

        let engine = Self {
            context,
            runtime,
            events: Rc::new(RefCell::new(VecDeque::new())),
            current_script: Rc::new(RefCell::new(String::new())),
            document_start: None,
            message_handlers: Vec::new(),
            user_agent: config.user_agent.clone().unwrap_or_else(|| {
                format!("pagebridge/{} (headless)", env!("CARGO_PKG_VERSION"))
            }),
            width: config.width,
            height: config.height,
            developer_extras: config.enable_developer_extras,
            location: ABOUT_BLANK.to_string(),
        };
        engine.install_environment()?;
        Ok(engine)
    }

    /// URL of the currently loaded document.
    pub fn location(&self) -> &str {
        &self.location
    }

    fn push(&self, event: EngineEvent) {
        self.events.borrow_mut().push_back(event);
    }

    fn install_environment(&self) -> Result<()> {
        let console_events = Rc::clone(&self.events);
        let post_events = Rc::clone(&self.events);
        let current_script = Rc::clone(&self.current_script);
        let settings = json!({
            "userAgent": self.user_agent,
            "width": self.width,
            "height": self.height,
            "location": self.location,
        })
        .to_string();
        let bootstrap = format!("({ENVIRONMENT_BOOTSTRAP})({settings});");

        self.context
            .with(|ctx| -> rquickjs::Result<()> {
                let global = ctx.globals();

                let console_fn = Function::new(
                    ctx.clone(),
                    move |method: String, text: String, line: Opt<u32>| -> rquickjs::Result<()> {
                        let source = current_script.borrow().clone();
                        console_events
                            .borrow_mut()
                            .push_back(EngineEvent::Console(ConsoleMessage {
                                level: ConsoleLevel::from_method(&method),
                                text,
                                source,
                                line: line.0.unwrap_or(0),
                            }));
                        Ok(())
                    },
                )?
                .with_name("__pagebridge_console")?;
                global.set("__pagebridge_console", console_fn)?;

                let post_fn = Function::new(
                    ctx.clone(),
                    move |handler: String, body: String| -> rquickjs::Result<()> {
                        post_events
                            .borrow_mut()
                            .push_back(EngineEvent::ScriptMessage { handler, body });
                        Ok(())
                    },
                )?
                .with_name("__pagebridge_post")?;
                global.set("__pagebridge_post", post_fn)?;

                ctx.eval::<(), _>(bootstrap.into_bytes())?;

                for name in &self.message_handlers {
                    let register = format!("__pagebridge_register_handler({});", js_string(name));
                    ctx.eval::<(), _>(register.into_bytes())?;
                }
                Ok(())
            })
            .map_err(|err| {
                BridgeError::Script(format!("failed to install page environment: {err}"))
            })
    }

    fn reset_context(&mut self, location: &str) -> Result<()> {
        self.context = Context::full(&self.runtime).map_err(|err| {
            BridgeError::BackendUnavailable(format!("failed to create QuickJS context: {err}"))
        })?;
        self.location = location.to_string();
        self.install_environment()
    }

    /// Evaluate `source` and serialise its completion value as JSON.
    fn eval_json(&self, source: &str, filename: &str) -> Result<Option<String>> {
        self.current_script.replace(filename.to_string());
        let script = with_source_url(source, filename);

        let outcome = self.context.with(|ctx| match ctx.eval::<Value, _>(script) {
            Ok(value) => to_json(&ctx, value).map_err(|err| describe_error(&ctx, err)),
            Err(err) => Err(describe_error(&ctx, err)),
        });

        // Promise continuations queued by the script run before control returns.
        self.execute_pending_jobs();

        outcome.map_err(BridgeError::Script)
    }

    fn run_logged(&self, source: &str, filename: &str) {
        if let Err(err) = self.eval_json(source, filename) {
            warn!(target: "quickjs", %filename, error = %err, "script execution failed");
        }
    }

    fn execute_pending_jobs(&self) {
        let mut job_count = 0;

        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= MAX_JOBS {
                        warn!(
                            target: "quickjs",
                            "Stopped processing jobs after {} iterations (possible infinite loop)",
                            MAX_JOBS
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    error!(target: "quickjs", "Job execution error: {:?}", job_exception);
                    break;
                }
            }
        }

        if job_count > 0 {
            debug!(target: "quickjs", jobs = job_count, "executed pending jobs");
        }
    }

    fn resolve_content(&self, content: Content) -> Result<Resolved> {
        match content {
            Content::Html { html, base_uri } => Ok(Resolved::Document(FetchedDocument {
                base_url: base_uri.unwrap_or_else(|| ABOUT_BLANK.to_string()),
                contents: html,
            })),
            Content::Uri(uri) => match fetch_document(&uri) {
                Ok(document) => Ok(Resolved::Document(document)),
                // malformed input is the caller's error; everything else is a failed load
                Err(err @ BridgeError::InvalidUri { .. }) => Err(err),
                Err(error) => Ok(Resolved::Failed { uri, error }),
            },
        }
    }

    fn run_page_scripts(&self, document: &FetchedDocument) -> Result<usize> {
        let scripts = collect_scripts(&document.contents)?;
        let mut executed = 0usize;

        for descriptor in execution_order(&scripts) {
            let filename = descriptor.filename();
            let source = match &descriptor.source {
                ScriptSource::Inline { code } => code.clone(),
                ScriptSource::External { src } => {
                    match fetch_resource(src, Some(&document.base_url)) {
                        Ok(code) => code,
                        Err(err) => {
                            error!(target: "quickjs", %filename, error = %err, "failed to fetch external script");
                            continue;
                        }
                    }
                }
            };

            match self.eval_json(&source, &filename) {
                Ok(_) => executed += 1,
                Err(err) => {
                    error!(target: "quickjs", %filename, error = %err, "page script execution failed");
                }
            }
        }

        Ok(executed)
    }
}

impl HostEngine for QuickJsEngine {
    fn load(&mut self, content: Content) -> Result<()> {
        let document = match self.resolve_content(content)? {
            Resolved::Document(document) => document,
            Resolved::Failed { uri, error: err } => {
                // an empty error page replaces the old document and the load
                // still finishes
                self.push(EngineEvent::Load(LoadEvent::Started));
                self.reset_context(&uri)?;
                if let Some(script) = self.document_start.clone() {
                    self.run_logged(&script, DOCUMENT_START_FILE);
                }
                self.push(EngineEvent::Load(LoadEvent::Failed {
                    uri,
                    error: err.to_string(),
                }));
                self.push(EngineEvent::Load(LoadEvent::Finished));
                return Ok(());
            }
        };

        self.push(EngineEvent::Load(LoadEvent::Started));
        self.reset_context(&document.base_url)?;

        if let Some(script) = self.document_start.clone() {
            self.run_logged(&script, DOCUMENT_START_FILE);
        }

        let executed = self.run_page_scripts(&document)?;
        info!(
            target: "quickjs",
            url = %document.base_url,
            scripts = executed,
            "document loaded"
        );

        self.push(EngineEvent::Load(LoadEvent::Finished));
        Ok(())
    }

    fn set_document_start_script(&mut self, source: String) {
        self.document_start = Some(source);
    }

    fn register_message_handler(&mut self, name: &str) {
        if !self.message_handlers.iter().any(|existing| existing == name) {
            self.message_handlers.push(name.to_string());
        }
        let register = format!("__pagebridge_register_handler({});", js_string(name));
        self.run_logged(&register, DOCUMENT_START_FILE);
    }

    fn inject_script(&mut self, source: &str) {
        if self.developer_extras {
            debug!(target: "quickjs", %source, "injecting script");
        }
        self.run_logged(source, INJECT_FILE);
    }

    fn evaluate(&mut self, source: &str) -> Result<Option<String>> {
        self.eval_json(source, EVALUATE_FILE)
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.borrow_mut().pop_front()
    }
}

fn to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<Option<String>> {
    if value.is_undefined() || value.is_function() || value.is_symbol() {
        return Ok(None);
    }
    match ctx.json_stringify(value)? {
        Some(text) => Ok(Some(text.to_string()?)),
        None => Ok(None),
    }
}

fn describe_error(ctx: &Ctx<'_>, err: JsError) -> String {
    match err {
        JsError::Exception => capture_exception_message(ctx),
        other => other.to_string(),
    }
}

fn capture_exception_message(ctx: &Ctx<'_>) -> String {
    let exception: Value = ctx.catch();

    if let Some(obj) = exception.as_object() {
        if let Ok(message) = obj.get::<_, String>("message") {
            if let Ok(stack) = obj.get::<_, String>("stack") {
                return format!("Error: {}\nStack: {}", message, stack);
            }
            return format!("Error: {}", message);
        }
    }

    if let Some(text) = exception.as_string().and_then(|text| text.to_string().ok()) {
        return text;
    }

    format!("{:?}", exception)
}

fn with_source_url(source: &str, filename: &str) -> Vec<u8> {
    let mut script = String::with_capacity(source.len() + filename.len() + 32);
    script.push_str(source);
    if !source.ends_with('\n') {
        script.push('\n');
    }
    script.push_str("//# sourceURL=");
    script.push_str(filename);
    script.push('\n');
    script.into_bytes()
}

const ENVIRONMENT_BOOTSTRAP: &str = r#"
(settings) => {
    const global = globalThis;
    if (typeof global.window === 'undefined') {
        global.window = global;
    }
    if (typeof global.self === 'undefined') {
        global.self = global;
    }
    global.navigator = { userAgent: settings.userAgent };
    global.location = { href: settings.location };
    global.innerWidth = settings.width;
    global.innerHeight = settings.height;

    const post = global.__pagebridge_post;
    const report = global.__pagebridge_console;
    delete global.__pagebridge_post;
    delete global.__pagebridge_console;

    const handlers = {};
    global.webkit = { messageHandlers: handlers };
    global.__pagebridge_register_handler = (name) => {
        handlers[name] = {
            postMessage(body) {
                post(name, typeof body === 'string' ? body : JSON.stringify(body));
            },
        };
    };

    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            if (typeof value === 'object') {
                try {
                    return JSON.stringify(value);
                } catch (err) {
                    return String(value);
                }
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    // frames: [0] callerLine, [1] the console method, [2] its caller
    const callerLine = () => {
        const frames = String(new Error().stack || '').split('\n');
        const match = /:(\d+)(?::\d+)?\)?\s*$/.exec(frames[2] || '');
        return match ? Number(match[1]) : 0;
    };

    const method = (name) => (...args) => {
        try {
            report(name, args.map(stringify).join(' '), callerLine());
        } catch (err) {
            // console must never throw
        }
    };

    global.console = {};
    for (const name of ['log', 'info', 'warn', 'error', 'debug', 'trace']) {
        global.console[name] = method(name);
    }
}
"#;
