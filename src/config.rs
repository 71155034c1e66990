//! TOML-based configuration system.
//!
//! Loads settings from a `kiosk.toml` file, falling back to defaults that
//! describe a locked-down kiosk. Every struct implements `Default` so a
//! missing or partial config file still yields a usable configuration.
//!
//! ## Config file search order
//!
//! 1. `--config PATH` on the command line (see `main.rs`)
//! 2. `KIOSK_CONFIG` environment variable
//! 3. Next to the executable (`<exe_dir>/kiosk.toml`)
//! 4. Platform config directory (`%APPDATA%\KioskHost\kiosk.toml` on Windows)
//! 5. Current working directory (`./kiosk.toml`)
//! 6. No file found → `KioskConfig::default()`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const CONFIG_FILE: &str = "kiosk.toml";

// ─────────────────────────────────────────────────────────────────────────────
// Config structs
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub general: GeneralConfig,
    pub storage: StorageConfig,
    pub content: ContentConfig,
    pub server: ServerConfig,
    pub surface: SurfaceConfig,
    pub lockdown: LockdownConfig,
}

/// Window and process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub window_title: String,
    pub width: u32,
    pub height: u32,
    /// Borderless fullscreen on the primary monitor.
    pub fullscreen: bool,
    /// Honour the window manager's close request while the lockdown is armed.
    pub allow_window_close: bool,
}

/// Storage connection and retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file, relative paths resolve against the working directory.
    pub database: PathBuf,
    /// Retries after the initial attempt before the operator is asked.
    pub max_retries: u32,
    pub backoff_ms: u64,
    /// Longer pause applied after the operator chooses "retry".
    pub recovery_backoff_ms: u64,
}

/// Where the UI bundle is expected and where a build may be found.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Bundle directory relative to the host's working directory.
    pub bundle_dir: PathBuf,
    /// Entry document inside the bundle.
    pub entry: String,
    /// Build output relative to each ancestor of the working directory.
    pub build_output: PathBuf,
    /// How many parent directories are searched for `build_output`.
    pub search_depth: usize,
    /// Shown in the diagnostic page when nothing is found.
    pub build_command: String,
}

/// Local API server (HTTP transport and static bundle hosting).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    /// 0 = ephemeral port chosen by the OS.
    pub port: u16,
}

/// Capability set applied to the rendering surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub devtools: bool,
    pub context_menu: bool,
    pub accelerator_keys: bool,
    pub swipe_navigation: bool,
    pub host_objects: bool,
}

/// Kiosk hotkeys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockdownConfig {
    pub enabled: bool,
    /// `ctrl`, `alt` or `shift`.
    pub exit_modifier: String,
    /// Function key name, `F1`..`F24`.
    pub exit_key: String,
    /// Function key suppressed system-wide while armed.
    pub forbidden_key: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Default impls
// ─────────────────────────────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            window_title: "Kiosk".to_string(),
            width: 1280,
            height: 800,
            fullscreen: true,
            allow_window_close: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("kiosk.db"),
            max_retries: 3,
            backoff_ms: 500,
            recovery_backoff_ms: 1000,
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("wwwroot"),
            entry: "index.html".to_string(),
            build_output: PathBuf::from("frontend").join("dist"),
            search_depth: 4,
            build_command: "npm run build".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            // Debug builds keep the remote devtools server for diagnosis.
            devtools: cfg!(debug_assertions),
            context_menu: false,
            accelerator_keys: false,
            swipe_navigation: false,
            host_objects: true,
        }
    }
}

impl Default for LockdownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exit_modifier: "ctrl".to_string(),
            exit_key: "F4".to_string(),
            forbidden_key: "F12".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_millis(self.recovery_backoff_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config loading and saving
// ─────────────────────────────────────────────────────────────────────────────

impl KioskConfig {
    /// Loads configuration from a TOML file. Never panics: returns defaults
    /// if no file is found or if parsing fails.
    pub fn load(explicit: Option<&Path>) -> Self {
        match find_config_path(explicit) {
            Some(path) => Self::load_from(&path),
            None => {
                info!("No config file found, using defaults");
                KioskConfig::default()
            }
        }
    }

    fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<KioskConfig>(&content) {
                Ok(config) => {
                    info!(path = %path.display(), "Configuration loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                    KioskConfig::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read config, using defaults");
                KioskConfig::default()
            }
        }
    }

    /// Writes the configuration to the platform config directory.
    pub fn save(&self) -> io::Result<PathBuf> {
        let path = save_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(&path, content)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(path)
    }
}

/// Searches for a config file in the standard locations.
fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!(path = %path.display(), "Config passed on the command line does not exist");
    }

    if let Ok(path) = std::env::var("KIOSK_CONFIG") {
        let p = PathBuf::from(path);
        if p.is_file() {
            return Some(p);
        }
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let p = dir.join(CONFIG_FILE);
        if p.is_file() {
            return Some(p);
        }
    }

    if let Some(dir) = platform_config_dir() {
        let p = dir.join(CONFIG_FILE);
        if p.is_file() {
            return Some(p);
        }
    }

    let p = PathBuf::from(CONFIG_FILE);
    if p.is_file() {
        return Some(p);
    }

    None
}

fn save_path() -> PathBuf {
    platform_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE)
}

/// Returns the platform config directory without adding a dependency.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|appdata| PathBuf::from(appdata).join("KioskHost"))
    }
    #[cfg(not(windows))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .or_else(|| std::env::var("HOME").ok().map(|h| format!("{h}/.config")))
            .map(|dir| PathBuf::from(dir).join("kiosk-host"))
    }
}
