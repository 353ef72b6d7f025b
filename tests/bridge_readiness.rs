use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use pagebridge::{Bridge, BridgeConfig, BridgeError, MainLoop, QuickJsEngine};
use url::Url;

fn bridge() -> (MainLoop, Bridge) {
    let config = BridgeConfig::default();
    let main_loop = MainLoop::new().expect("main loop");
    let engine = QuickJsEngine::new(&config).expect("engine");
    let bridge = Bridge::new("readiness", Box::new(engine), &main_loop, &config).expect("bridge");
    (main_loop, bridge)
}

#[test]
fn wait_ready_times_out_without_a_load() {
    let (_main_loop, bridge) = bridge();
    let started = Instant::now();
    assert!(!bridge.wait_ready(Some(Duration::from_millis(100))));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(!bridge.is_ready());
}

#[test]
fn ready_after_load_and_reset_by_the_next_one() {
    let (_main_loop, bridge) = bridge();
    bridge.load_html("<p>first</p>", None).expect("load");
    assert!(!bridge.is_ready());
    assert!(bridge.wait_ready(Some(Duration::from_secs(5))));
    assert!(bridge.is_ready());

    // already ready: returns at once
    let started = Instant::now();
    assert!(bridge.wait_ready(Some(Duration::from_secs(5))));
    assert!(started.elapsed() < Duration::from_secs(1));

    bridge.load_uri("about:blank").expect("reload");
    assert!(!bridge.is_ready());
    assert!(bridge.wait_ready(None));
}

#[test]
fn loads_file_urls_with_relative_scripts() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("index.html"),
        r#"<html><head><script src="app.js"></script></head><body></body></html>"#,
    )
    .expect("write page");
    std::fs::write(dir.path().join("app.js"), "globalThis.loaded = 'app';").expect("write script");
    let uri = Url::from_file_path(dir.path().join("index.html")).expect("file url");

    let (_main_loop, bridge) = bridge();
    bridge.load_uri(uri.as_str()).expect("load");
    assert!(bridge.wait_ready(Some(Duration::from_secs(5))));
    assert_eq!(
        bridge.execute_script_sync("globalThis.loaded").expect("eval"),
        Some("\"app\"".to_string())
    );
    assert_eq!(
        bridge.execute_script_sync("location.href").expect("eval"),
        Some(serde_json::to_string(uri.as_str()).expect("quote"))
    );
}

#[test]
fn failed_load_still_becomes_ready() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = Url::from_file_path(dir.path().join("missing.html")).expect("file url");

    let (_main_loop, bridge) = bridge();
    bridge
        .bind("ping", |_: &Bridge, _: &str, _: &str| Some("\"pong\"".to_string()))
        .expect("bind");
    bridge.load_uri(missing.as_str()).expect("load starts");
    assert!(bridge.wait_ready(None));

    // the shim is present on the error page
    assert_eq!(
        bridge
            .execute_script_sync("typeof pagebridge.ping")
            .expect("eval"),
        Some("\"function\"".to_string())
    );
}

#[test]
fn malformed_uri_is_rejected_up_front() {
    let (_main_loop, bridge) = bridge();
    assert!(matches!(
        bridge.load_uri("not a uri"),
        Err(BridgeError::InvalidUri { .. })
    ));
    assert!(!bridge.is_ready());
}

#[test]
fn ready_observers_run_once_per_load() {
    let (main_loop, bridge) = bridge();
    let hits = Rc::new(Cell::new(0));

    let counter = Rc::clone(&hits);
    bridge.on_ready(move |bridge| {
        assert!(bridge.is_ready());
        counter.set(counter.get() + 1);
    });
    bridge.load_html("<p>one</p>", None).expect("load");
    assert!(bridge.wait_ready(Some(Duration::from_secs(5))));
    assert_eq!(hits.get(), 1);

    // registered after the fact: runs on the next iteration
    let counter = Rc::clone(&hits);
    bridge.on_ready(move |_| counter.set(counter.get() + 10));
    assert_eq!(hits.get(), 1);
    main_loop.iterate(false);
    assert_eq!(hits.get(), 11);
}

#[test]
fn wait_ready_wakes_for_work_from_other_threads() {
    let (main_loop, bridge) = bridge();
    let handle = main_loop.handle();
    let target = bridge.clone();
    let loader = main_loop.channel(move |html: String| {
        target.load_html(&html, None).expect("load");
    });

    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        loader.send("<p>late</p>".to_string()).expect("loop alive");
        handle.invoke(|| {})
    });

    let started = Instant::now();
    assert!(bridge.wait_ready(Some(Duration::from_secs(5))));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(worker.join().expect("worker"));
}
