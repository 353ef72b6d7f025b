use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

pub const CONFIG_ENV: &str = "PAGEBRIDGE_CONFIG";
pub const PLATFORM_ENV: &str = "PAGEBRIDGE_PLATFORM";
pub const MODULE_DIR_ENV: &str = "PAGEBRIDGE_MODULE_DIR";

pub const DEFAULT_NAMESPACE: &str = "pagebridge";

/// Platform backend used to host the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Direct framebuffer rendering, no window system.
    Drm,
    /// No visual output at all.
    Headless,
    Gtk4,
    Wayland,
    X11,
    /// Use `platform_name` if set, otherwise the built-in default.
    #[default]
    Auto,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drm => "drm",
            Self::Headless => "headless",
            Self::Gtk4 => "gtk4",
            Self::Wayland => "wayland",
            Self::X11 => "x11",
            Self::Auto => "auto",
        }
    }
}

impl FromStr for Platform {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drm" => Ok(Self::Drm),
            "headless" => Ok(Self::Headless),
            "gtk4" => Ok(Self::Gtk4),
            "wayland" => Ok(Self::Wayland),
            "x11" => Ok(Self::X11),
            "auto" | "" => Ok(Self::Auto),
            other => Err(BridgeError::BackendUnavailable(format!(
                "unknown platform `{other}`"
            ))),
        }
    }
}

/// How call results are routed back to pending script-side calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallProtocol {
    /// Results settle the oldest pending call with the same function name.
    /// Overlapping calls to one name settle in emission order, and calls to
    /// unbound names never settle.
    #[default]
    ByName,
    /// Results echo the per-call token and settle exactly that call; lookup
    /// misses are answered with a rejection.
    ByToken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub width: u32,
    pub height: u32,
    pub enable_console: bool,
    pub enable_developer_extras: bool,
    pub cache_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub platform: Platform,
    /// Deprecated: prefer `platform`. Only consulted when `platform` is `auto`.
    pub platform_name: Option<String>,
    pub module_dir: Option<PathBuf>,
    /// Global object name the script side sees, e.g. `window.pagebridge`.
    pub namespace: String,
    pub call_protocol: CallProtocol,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            enable_console: true,
            enable_developer_extras: false,
            cache_dir: None,
            data_dir: None,
            user_agent: None,
            platform: Platform::Auto,
            platform_name: None,
            module_dir: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            call_protocol: CallProtocol::ByName,
        }
    }
}

impl BridgeConfig {
    /// Load a YAML config file. A missing path or file yields the defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                serde_yaml::from_str(&contents)?
            }
            _ => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `PAGEBRIDGE_CONFIG` and apply the platform/module overrides.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let mut config = Self::load(path)?;

        if let Ok(platform) = std::env::var(PLATFORM_ENV) {
            config.platform = platform.parse()?;
        }
        if let Ok(module_dir) = std::env::var(MODULE_DIR_ENV) {
            config.module_dir = Some(PathBuf::from(module_dir));
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(BridgeError::InvalidConfig(format!(
                "viewport must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if !is_identifier(&self.namespace) {
            return Err(BridgeError::InvalidConfig(format!(
                "namespace `{}` is not a valid script identifier",
                self.namespace
            )));
        }
        if ENVIRONMENT_GLOBALS.contains(&self.namespace.as_str()) {
            return Err(BridgeError::InvalidConfig(format!(
                "namespace `{}` would replace a page global",
                self.namespace
            )));
        }
        Ok(())
    }

    /// Resolve which backend to start: explicit enum, then the deprecated
    /// name, then the built-in default.
    pub fn resolved_platform(&self) -> Result<Platform> {
        if self.platform != Platform::Auto {
            return Ok(self.platform);
        }
        match self.platform_name.as_deref() {
            Some(name) => match name.parse()? {
                Platform::Auto => Ok(Platform::Headless),
                platform => Ok(platform),
            },
            None => Ok(Platform::Headless),
        }
    }

    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.cache_dir().to_path_buf()))
    }

    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().to_path_buf()))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "pagebridge", "pagebridge")
}

/// Globals the page environment defines; a shim installed under one of
/// these names would clobber it.
const ENVIRONMENT_GLOBALS: &[&str] = &[
    "webkit",
    "window",
    "self",
    "globalThis",
    "console",
    "navigator",
    "location",
    "document",
    "innerWidth",
    "innerHeight",
    "Object",
    "Array",
    "Function",
    "String",
    "Number",
    "Boolean",
    "Symbol",
    "Error",
    "Promise",
    "JSON",
    "Math",
    "Date",
    "RegExp",
    "Map",
    "Set",
    "Reflect",
    "Proxy",
];

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$')
}
