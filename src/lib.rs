//! Bridge between native Rust code and scripts running in a hosted page.
//!
//! Native code binds functions scripts can call (they come back as promises),
//! broadcasts events to script listeners, runs scripts in the page and waits
//! for it to load. All of it is driven from one cooperative [`MainLoop`].
//!
//! ```no_run
//! use pagebridge::{BridgeConfig, BridgeRuntime};
//!
//! # fn main() -> pagebridge::Result<()> {
//! let runtime = BridgeRuntime::init(BridgeConfig::default())?;
//! let bridge = runtime.create_bridge(Some("demo"))?;
//! bridge.bind("add", |_, _, args| {
//!     let values: Vec<f64> = serde_json::from_str(args).ok()?;
//!     Some(values.iter().sum::<f64>().to_string())
//! })?;
//! bridge.load_html("<script>pagebridge.add(2, 3).then(console.log)</script>", None)?;
//! bridge.wait_ready(None);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod main_loop;
pub mod runtime;

pub use bridge::{Bridge, CallHandler, DispatchOutcome, DispatchStats, ScriptCallback};
pub use config::{BridgeConfig, CallProtocol, Platform};
pub use engine::{HostEngine, QuickJsEngine};
pub use error::{BridgeError, Result};
pub use main_loop::{LoopHandle, LoopSender, MainLoop, TimeoutId};
pub use runtime::BridgeRuntime;
