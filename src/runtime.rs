//! Process-wide bridge runtime.
//!
//! One runtime per process owns the main loop and the engine backend every
//! bridge is created from. It is an explicit value rather than hidden global
//! state: [`BridgeRuntime::init`] fails with
//! [`BridgeError::AlreadyInitialized`] while another runtime is alive, and
//! dropping the runtime is the cleanup.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::bridge::{Bridge, DEFAULT_BRIDGE_NAME};
use crate::config::{BridgeConfig, Platform};
use crate::engine::{HostEngine, QuickJsEngine};
use crate::error::{BridgeError, Result};
use crate::main_loop::{LoopHandle, MainLoop};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Builds the engine behind each new bridge.
pub type EngineFactory = Box<dyn Fn(&BridgeConfig) -> Result<Box<dyn HostEngine>>>;

pub struct BridgeRuntime {
    config: BridgeConfig,
    platform: Platform,
    factory: EngineFactory,
    main_loop: MainLoop,
}

impl BridgeRuntime {
    /// Initialise with the built-in backend for the configured platform.
    /// Only `headless` ships built in; other platforms need
    /// [`BridgeRuntime::with_engine_factory`].
    pub fn init(config: BridgeConfig) -> Result<Self> {
        Self::start(config, None)
    }

    /// Initialise with an application-supplied engine backend.
    pub fn with_engine_factory<F>(config: BridgeConfig, factory: F) -> Result<Self>
    where
        F: Fn(&BridgeConfig) -> Result<Box<dyn HostEngine>> + 'static,
    {
        Self::start(config, Some(Box::new(factory)))
    }

    fn start(config: BridgeConfig, factory: Option<EngineFactory>) -> Result<Self> {
        if INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BridgeError::AlreadyInitialized);
        }

        match Self::build(config, factory) {
            Ok(runtime) => Ok(runtime),
            Err(err) => {
                INITIALIZED.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn build(config: BridgeConfig, factory: Option<EngineFactory>) -> Result<Self> {
        config.validate()?;
        let platform = config.resolved_platform()?;
        let factory = match factory {
            Some(factory) => factory,
            None => builtin_factory(platform)?,
        };
        let main_loop = MainLoop::new()?;

        info!(
            target: "pagebridge",
            platform = platform.as_str(),
            width = config.width,
            height = config.height,
            "bridge runtime initialized"
        );
        debug!(
            target: "pagebridge",
            cache_dir = ?config.cache_dir(),
            data_dir = ?config.data_dir(),
            module_dir = ?config.module_dir,
            "runtime directories"
        );

        Ok(Self {
            config,
            platform,
            factory,
            main_loop,
        })
    }

    /// Create a bridge with a fresh engine. `None` uses
    /// [`DEFAULT_BRIDGE_NAME`].
    pub fn create_bridge(&self, name: Option<&str>) -> Result<Bridge> {
        let engine = (self.factory)(&self.config)?;
        Bridge::new(
            name.unwrap_or(DEFAULT_BRIDGE_NAME),
            engine,
            &self.main_loop,
            &self.config,
        )
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The platform the configuration resolved to.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn main_loop(&self) -> &MainLoop {
        &self.main_loop
    }

    pub fn handle(&self) -> LoopHandle {
        self.main_loop.handle()
    }

    pub fn run(&self) {
        self.main_loop.run();
    }

    pub fn quit(&self) {
        self.main_loop.quit();
    }

    pub fn is_initialized() -> bool {
        INITIALIZED.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for BridgeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeRuntime")
            .field("platform", &self.platform)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for BridgeRuntime {
    fn drop(&mut self) {
        INITIALIZED.store(false, Ordering::SeqCst);
        info!(target: "pagebridge", "bridge runtime cleaned up");
    }
}

fn builtin_factory(platform: Platform) -> Result<EngineFactory> {
    match platform {
        Platform::Headless | Platform::Auto => Ok(Box::new(|config: &BridgeConfig| {
            Ok(Box::new(QuickJsEngine::new(config)?) as Box<dyn HostEngine>)
        })),
        other => Err(BridgeError::BackendUnavailable(format!(
            "no built-in backend for platform `{}`",
            other.as_str()
        ))),
    }
}
