//! Configuration for xmirror
//!
//! Loads configuration from TOML file at `~/.config/xmirror/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub scene: SceneConfig,
    pub render: RenderConfig,
    pub input: InputConfig,
    pub vr: VrConfig,
    pub overlay: OverlayConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load an explicit configuration file; a missing file is an error
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config = Self::parse(&content)?;
        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("xmirror");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Displays to connect to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// X display whose windows are mirrored
    pub name: String,
    /// Display hosting the preview window (None = $DISPLAY)
    pub surface_name: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            name: ":0".into(),
            surface_name: None,
        }
    }
}

/// Scene layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Pixel density of the mirrored desktop; scene units are 2.56 cm
    pub pixels_per_inch: f32,
    /// Camera distance from the desktop plane, in scene units
    pub camera_distance: f32,
    /// Clear color (RGB, 0.0-1.0)
    pub background: [f32; 3],
    /// Forward offset of a window stacked on another one, in pixels
    pub stack_spacing: f32,
}

impl SceneConfig {
    /// Desktop pixels per scene unit
    pub fn scale(&self) -> f32 {
        self.pixels_per_inch / 2.56
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            pixels_per_inch: 117.0,
            camera_distance: 30.0,
            background: [96.0 / 255.0, 118.0 / 255.0, 98.0 / 255.0],
            stack_spacing: 0.1,
        }
    }
}

/// Preview window and frame pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Frame interval (16ms = ~60 FPS)
    pub frame_interval_ms: u64,
    /// Log frame rate at debug level
    pub log_fps: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            frame_interval_ms: 16,
            log_fps: false,
        }
    }
}

/// Desktop input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Keycode on the preview window that quits (9 = Escape)
    pub quit_keycode: u8,
    /// Forward preview-window key events to the keyboard focus window
    pub forward_keyboard: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            quit_keycode: 9,
            forward_keyboard: true,
        }
    }
}

/// VR backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VrBackendKind {
    /// No headset; the mouse drives the pointer
    Desktop,
    /// Replay a recorded pose/controls trace
    Scripted,
}

/// VR input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VrConfig {
    pub backend: VrBackendKind,
    /// JSON-lines trace for the scripted backend
    pub script: Option<PathBuf>,
    /// Restart the trace when it ends
    pub loop_script: bool,
    /// Analog value above which a control counts as pressed
    pub press_threshold: f32,
    /// Analog value below which a control counts as released
    pub release_threshold: f32,
    /// How far from a window plane a hand still points at it, in pixels
    pub grab_radius: f32,
    /// Size of the hand cursor
    pub cursor_scale: f32,
}

impl Default for VrConfig {
    fn default() -> Self {
        Self {
            backend: VrBackendKind::Desktop,
            script: None,
            loop_script: false,
            press_threshold: 0.75,
            release_threshold: 0.25,
            grab_radius: 64.0,
            cursor_scale: 0.3,
        }
    }
}

/// External VR overlay bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    /// Socket file name inside $XDG_RUNTIME_DIR
    pub socket_name: String,
    /// Texture density reported for mirrored windows
    pub pixels_per_meter: f32,
    /// Desktop pixels per meter when placing windows
    pub placement_pixels_per_meter: f32,
    /// Distance of the window layer from the viewer, meters (negative = ahead)
    pub depth: f32,
    /// Windows this small (or smaller) in either dimension are not mirrored
    pub min_window_size: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socket_name: "xmirror-overlay.sock".into(),
            pixels_per_meter: 300.0,
            placement_pixels_per_meter: 450.0,
            depth: -8.0 + 1.0 / 3.0,
            min_window_size: 5,
        }
    }
}
