//! Kiosk-style dashboard demo.
//!
//! Binds a few hardware-flavoured functions, streams simulated sensor readings
//! from a worker thread and emits a clock tick from a main-loop timeout. The
//! page reports what it sees through `console.log`.

use std::cell::Cell;
use std::env;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use pagebridge::{logging, Bridge, BridgeConfig, BridgeRuntime};
use serde::Serialize;
use serde_json::json;
use tracing::info;

const DEFAULT_TICKS: u32 = 10;
const TICK_INTERVAL: Duration = Duration::from_millis(500);
const SENSOR_INTERVAL: Duration = Duration::from_millis(200);

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>pagebridge dashboard</title></head>
<body>
<script>
    pagebridge.getSystemInfo().then((info) => {
        console.log('system: ' + JSON.stringify(info));
    });

    pagebridge.on('sensor', (reading) => {
        if (reading.temperature > 24) {
            pagebridge.setLed(true).then((state) => console.warn('warm, led ' + state.led));
        }
    });

    const stop = pagebridge.on('tick', (tick) => {
        console.log('tick ' + tick.n + ' at ' + tick.uptime_ms + 'ms');
        if (tick.last) {
            stop();
            pagebridge.setLed(false).then(() => console.info('dashboard done'));
        }
    });
</script>
</body>
</html>
"#;

#[derive(Debug, Clone, Copy, Serialize)]
struct SensorReading {
    sample: u64,
    temperature: f64,
    humidity: f64,
}

impl SensorReading {
    fn simulated(sample: u64) -> Self {
        let phase = sample as f64 / 8.0;
        Self {
            sample,
            temperature: 22.0 + 3.0 * phase.sin(),
            humidity: 45.0 + 5.0 * phase.cos(),
        }
    }
}

struct LedState {
    on: Cell<bool>,
    toggles: Cell<u32>,
}

fn bind_hardware(bridge: &Bridge, config: &BridgeConfig, started: Instant) -> Result<()> {
    let (width, height) = (config.width, config.height);
    bridge.bind_json("getSystemInfo", move |bridge, _| {
        Ok(json!({
            "bridge": bridge.name(),
            "width": width,
            "height": height,
            "uptime_ms": started.elapsed().as_millis() as u64,
            "version": env!("CARGO_PKG_VERSION"),
        }))
    })?;

    let led = LedState {
        on: Cell::new(false),
        toggles: Cell::new(0),
    };
    bridge.bind_with_context(
        "setLed",
        |_: &Bridge, _: &str, args: &str, led: &LedState| {
            let on = serde_json::from_str::<Vec<bool>>(args)
                .ok()
                .and_then(|args| args.first().copied())
                .unwrap_or(false);
            if led.on.replace(on) != on {
                led.toggles.set(led.toggles.get() + 1);
            }
            Some(json!({ "led": on }).to_string())
        },
        led,
        Some(Box::new(|led: LedState| {
            info!(toggles = led.toggles.get(), "led released");
        })),
    )?;
    Ok(())
}

fn spawn_sensor(bridge: &Bridge) {
    let target = bridge.clone();
    let sender = bridge.main_loop().channel(move |reading: SensorReading| {
        if let Err(err) = target.emit_json("sensor", &reading) {
            info!(error = %err, "dropping sensor reading");
        }
    });

    thread::spawn(move || {
        for sample in 0.. {
            thread::sleep(SENSOR_INTERVAL);
            if sender.send(SensorReading::simulated(sample)).is_err() {
                break;
            }
        }
    });
}

fn start_clock(bridge: &Bridge, ticks: u32, started: Instant) {
    let target = bridge.clone();
    let count = Rc::new(Cell::new(0u32));
    bridge.main_loop().add_timeout(TICK_INTERVAL, move || {
        let n = count.get() + 1;
        count.set(n);
        let last = n >= ticks;
        let tick = json!({
            "n": n,
            "uptime_ms": started.elapsed().as_millis() as u64,
            "last": last,
        });
        if target.emit_json("tick", &tick).is_err() || last {
            let closing = target.clone();
            // let the page settle its final calls before stopping
            target.main_loop().add_timeout(TICK_INTERVAL, move || {
                closing.quit();
                false
            });
            return false;
        }
        true
    });
}

fn main() -> Result<()> {
    logging::init_tracing("info");

    let ticks = match env::args().nth(1) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow!("usage: dashboard [ticks]"))?,
        None => DEFAULT_TICKS,
    };

    let config = BridgeConfig::from_env().context("load configuration")?;
    let runtime = BridgeRuntime::init(config).context("initialize bridge runtime")?;
    let bridge = runtime.create_bridge(Some("dashboard"))?;
    let started = Instant::now();

    bind_hardware(&bridge, runtime.config(), started)?;
    bridge.load_html(PAGE, None)?;
    if !bridge.wait_ready(Some(Duration::from_secs(5))) {
        return Err(anyhow!("dashboard page did not load"));
    }

    spawn_sensor(&bridge);
    start_clock(&bridge, ticks, started);

    info!(ticks, "dashboard running");
    runtime.run();

    let stats = bridge.dispatch_stats();
    info!(
        resolved = stats.resolved,
        dropped = stats.dropped,
        "dashboard stopped"
    );
    bridge.destroy();
    Ok(())
}
