use std::thread;
use std::time::Duration;

use pagebridge::{Bridge, BridgeConfig, MainLoop, QuickJsEngine};
use serde_json::json;

fn page_bridge() -> (MainLoop, Bridge) {
    let config = BridgeConfig::default();
    let main_loop = MainLoop::new().expect("main loop");
    let engine = QuickJsEngine::new(&config).expect("engine");
    let bridge = Bridge::new("events", Box::new(engine), &main_loop, &config).expect("bridge");
    bridge
        .load_html("<script>globalThis.seen = [];</script>", None)
        .expect("load page");
    assert!(bridge.wait_ready(Some(Duration::from_secs(5))));
    (main_loop, bridge)
}

fn eval(bridge: &Bridge, script: &str) -> String {
    bridge
        .execute_script_sync(script)
        .expect("script result")
        .unwrap_or_else(|| "undefined".to_string())
}

#[test]
fn late_listener_only_sees_later_events() {
    let (_main_loop, bridge) = page_bridge();

    bridge.emit("tick", Some(r#"{"n":1}"#)).expect("emit first");
    eval(&bridge, "pagebridge.on('tick', (payload) => seen.push(payload)); 0");
    bridge.emit("tick", Some(r#"{"n":2}"#)).expect("emit second");

    assert_eq!(eval(&bridge, "seen"), r#"[{"n":2}]"#);
}

#[test]
fn emitting_without_listeners_is_silent() {
    let (_main_loop, bridge) = page_bridge();
    bridge.emit("nobody", None).expect("emit");
    bridge
        .emit_json("nobody", &json!({ "ignored": true }))
        .expect("emit json");
    assert_eq!(eval(&bridge, "pagebridge._listenerCount('nobody')"), "0");
    assert_eq!(eval(&bridge, "seen.length"), "0");
}

#[test]
fn events_arrive_in_emission_order() {
    let (_main_loop, bridge) = page_bridge();
    eval(&bridge, "pagebridge.on('count', (n) => seen.push(n)); 0");
    for n in 1..=5 {
        bridge.emit_json("count", &n).expect("emit");
    }
    assert_eq!(eval(&bridge, "seen"), "[1,2,3,4,5]");
}

#[test]
fn missing_payload_arrives_as_null() {
    let (_main_loop, bridge) = page_bridge();
    eval(&bridge, "pagebridge.on('reset', (payload) => seen.push(payload === null)); 0");
    bridge.emit("reset", None).expect("emit");
    assert_eq!(eval(&bridge, "seen"), "[true]");
}

#[test]
fn unsubscribe_stops_delivery() {
    let (_main_loop, bridge) = page_bridge();
    eval(
        &bridge,
        r#"
        globalThis.stop = pagebridge.on('tick', (payload) => seen.push('a' + payload.n));
        globalThis.other = (payload) => seen.push('b' + payload.n);
        pagebridge.on('tick', other);
        0
        "#,
    );
    bridge.emit_json("tick", &json!({ "n": 1 })).expect("emit");
    eval(&bridge, "stop(); pagebridge.off('tick', other); 0");
    bridge.emit_json("tick", &json!({ "n": 2 })).expect("emit");

    assert_eq!(eval(&bridge, "seen"), r#"["a1","b1"]"#);
    assert_eq!(eval(&bridge, "pagebridge._listenerCount('tick')"), "0");
}

#[test]
fn failing_listener_does_not_block_others() {
    let (_main_loop, bridge) = page_bridge();
    eval(
        &bridge,
        r#"
        pagebridge.on('tick', () => { throw new Error('boom'); });
        pagebridge.on('tick', (payload) => seen.push(payload.n));
        0
        "#,
    );
    bridge.emit_json("tick", &json!({ "n": 7 })).expect("emit");
    assert_eq!(eval(&bridge, "seen"), "[7]");
}

#[test]
fn event_names_are_not_spliced_into_scripts() {
    let (_main_loop, bridge) = page_bridge();
    let name = "odd'); seen.push('injected";
    eval(
        &bridge,
        &format!(
            "pagebridge.on({}, () => seen.push('listener')); 0",
            serde_json::to_string(name).expect("quote")
        ),
    );
    bridge.emit(name, None).expect("emit");
    assert_eq!(eval(&bridge, "seen"), r#"["listener"]"#);
}

#[test]
fn worker_thread_events_are_marshaled_through_the_loop() {
    let (main_loop, bridge) = page_bridge();
    eval(&bridge, "pagebridge.on('sample', (n) => seen.push(n)); 0");

    let target = bridge.clone();
    let sender = main_loop.channel(move |n: u32| {
        target.emit_json("sample", &n).expect("emit sample");
    });
    let worker = thread::spawn(move || {
        for n in 0..4 {
            sender.send(n).expect("loop alive");
        }
    });
    worker.join().expect("worker");

    for _ in 0..4 {
        if !main_loop.iterate(false) {
            break;
        }
    }
    assert_eq!(eval(&bridge, "seen"), "[0,1,2,3]");
}
