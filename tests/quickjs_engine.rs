use pagebridge::engine::{ConsoleLevel, Content, EngineEvent, LoadEvent};
use pagebridge::{BridgeConfig, BridgeError, HostEngine, QuickJsEngine};

fn engine() -> QuickJsEngine {
    QuickJsEngine::new(&BridgeConfig::default()).expect("engine")
}

fn drain(engine: &mut QuickJsEngine) -> Vec<EngineEvent> {
    std::iter::from_fn(|| engine.poll_event()).collect()
}

#[test]
fn evaluates_to_json() {
    let mut engine = engine();
    assert_eq!(
        engine.evaluate("(() => 40 + 2)()").expect("number"),
        Some("42".to_string())
    );
    assert_eq!(
        engine.evaluate("({ a: [1, 'two'] })").expect("object"),
        Some(r#"{"a":[1,"two"]}"#.to_string())
    );
    assert_eq!(engine.evaluate("undefined").expect("undefined"), None);
    assert_eq!(engine.evaluate("() => 1").expect("function"), None);
}

#[test]
fn script_errors_are_reported() {
    let mut engine = engine();
    let err = engine
        .evaluate("throw new Error('nope')")
        .expect_err("thrown error");
    assert!(matches!(&err, BridgeError::Script(message) if message.contains("nope")));
    assert!(engine.evaluate("this is not javascript").is_err());
}

#[test]
fn promise_jobs_run_before_returning() {
    let mut engine = engine();
    engine.inject_script("Promise.resolve(5).then((value) => { globalThis.settled = value; });");
    assert_eq!(
        engine.evaluate("globalThis.settled").expect("settled"),
        Some("5".to_string())
    );
}

#[test]
fn environment_exposes_browser_globals() {
    let config = BridgeConfig {
        width: 800,
        height: 600,
        user_agent: Some("test-agent".to_string()),
        ..BridgeConfig::default()
    };
    let mut engine = QuickJsEngine::new(&config).expect("engine");
    assert_eq!(
        engine
            .evaluate("[window === globalThis, navigator.userAgent, innerWidth, innerHeight, location.href]")
            .expect("globals"),
        Some(r#"[true,"test-agent",800,600,"about:blank"]"#.to_string())
    );
}

#[test]
fn message_handlers_post_script_messages() {
    let mut engine = engine();
    engine.register_message_handler("native");
    engine.inject_script("webkit.messageHandlers.native.postMessage('hello');");
    engine.inject_script("webkit.messageHandlers.native.postMessage({ n: 1 });");

    assert_eq!(
        drain(&mut engine),
        vec![
            EngineEvent::ScriptMessage {
                handler: "native".into(),
                body: "hello".into()
            },
            EngineEvent::ScriptMessage {
                handler: "native".into(),
                body: r#"{"n":1}"#.into()
            },
        ]
    );
    assert_eq!(
        engine
            .evaluate("typeof webkit.messageHandlers.unknown")
            .expect("lookup"),
        Some("\"undefined\"".to_string())
    );
}

#[test]
fn load_runs_document_start_before_page_scripts() {
    let mut engine = engine();
    engine.register_message_handler("native");
    engine.set_document_start_script("globalThis.order = ['start'];".to_string());
    engine
        .load(Content::Html {
            html: r#"
                <script defer>order.push('deferred');</script>
                <script>order.push('inline');</script>
                <script type="application/json">{"skipped": true}</script>
                <script>webkit.messageHandlers.native.postMessage(JSON.stringify(order));</script>
            "#
            .to_string(),
            base_uri: Some("https://example.test/app/".to_string()),
        })
        .expect("load");

    assert_eq!(
        drain(&mut engine),
        vec![
            EngineEvent::Load(LoadEvent::Started),
            EngineEvent::ScriptMessage {
                handler: "native".into(),
                body: r#"["start","inline"]"#.into()
            },
            EngineEvent::Load(LoadEvent::Finished),
        ]
    );
    assert_eq!(
        engine.evaluate("order").expect("order"),
        Some(r#"["start","inline","deferred"]"#.to_string())
    );
    assert_eq!(engine.location(), "https://example.test/app/");
}

#[test]
fn each_load_gets_a_fresh_context() {
    let mut engine = engine();
    engine.inject_script("globalThis.leftover = 1;");
    engine
        .load(Content::Uri("about:blank".to_string()))
        .expect("load");
    assert_eq!(
        engine.evaluate("typeof leftover").expect("typeof"),
        Some("\"undefined\"".to_string())
    );
}

#[test]
fn failing_page_script_does_not_abort_the_load() {
    let mut engine = engine();
    engine
        .load(Content::Html {
            html: "<script>throw new Error('first');</script><script>globalThis.second = true;</script>"
                .to_string(),
            base_uri: None,
        })
        .expect("load");
    let events = drain(&mut engine);
    assert_eq!(events.last(), Some(&EngineEvent::Load(LoadEvent::Finished)));
    assert_eq!(
        engine.evaluate("globalThis.second").expect("second"),
        Some("true".to_string())
    );
}

#[test]
fn console_calls_become_events() {
    let mut engine = engine();
    engine.inject_script("console.debug('dbg'); console.trace('tr'); console.log(null, undefined, [1]);");
    let levels: Vec<(ConsoleLevel, String)> = drain(&mut engine)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::Console(message) => Some((message.level, message.text)),
            _ => None,
        })
        .collect();
    assert_eq!(
        levels,
        vec![
            (ConsoleLevel::Debug, "dbg".to_string()),
            (ConsoleLevel::Debug, "tr".to_string()),
            (ConsoleLevel::Log, "null undefined [1]".to_string()),
        ]
    );
}

#[test]
fn unreachable_content_fails_then_finishes_on_an_error_page() {
    let mut engine = engine();
    engine.set_document_start_script("globalThis.started = true;".to_string());
    engine.inject_script("globalThis.leftover = 1;");
    engine
        .load(Content::Uri("file:///definitely/not/here.html".to_string()))
        .expect("load starts");
    let events = drain(&mut engine);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], EngineEvent::Load(LoadEvent::Started));
    assert!(matches!(
        &events[1],
        EngineEvent::Load(LoadEvent::Failed { uri, .. }) if uri == "file:///definitely/not/here.html"
    ));
    assert_eq!(events[2], EngineEvent::Load(LoadEvent::Finished));

    assert_eq!(engine.location(), "file:///definitely/not/here.html");
    assert_eq!(
        engine
            .evaluate("[typeof leftover, globalThis.started]")
            .expect("error page"),
        Some(r#"["undefined",true]"#.to_string())
    );
}
