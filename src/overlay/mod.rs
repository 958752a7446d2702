//! Bridge to an external VR overlay
//!
//! Mirrored top-levels are announced to an overlay process over a Unix
//! socket, which shows them as floating panels and reports clicks, pointer
//! moves and typed text back. Those arrive in panel-local pixels and are
//! injected into the desktop through an [`InputSynth`].

pub mod ipc;

use std::collections::HashMap;

use glam::Mat4;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::OverlayConfig;
use crate::mirror::placement::overlay_position;
use crate::mirror::{UpdateOutcome, WindowRegistry};
use crate::render::TextureHandle;
use crate::synth::InputSynth;
use crate::transport::{TransportError, WindowId};

pub use ipc::{IpcHandle, IpcServer};

/// Upper bound for one frame on the socket
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests to the overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OverlayCommand {
    CreateWindow {
        window: WindowId,
        title: String,
        width: u32,
        height: u32,
        pixels_per_meter: f32,
    },
    SetTransform {
        window: WindowId,
        /// Column-major
        matrix: Mat4,
    },
    SubmitTexture {
        window: WindowId,
        texture: TextureHandle,
        width: u32,
        height: u32,
    },
    CloseWindow {
        window: WindowId,
    },
}

/// Why the overlay asked us to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuitReason {
    Shutdown,
    Restart,
    Other,
}

/// Input and lifecycle notifications from the overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OverlayEvent {
    Click {
        window: WindowId,
        x: i32,
        y: i32,
        button: u8,
        pressed: bool,
    },
    MoveCursor {
        window: WindowId,
        x: i32,
        y: i32,
    },
    Keyboard {
        #[serde(default)]
        window: Option<WindowId>,
        text: String,
    },
    Quit {
        reason: QuitReason,
    },
}

/// A framed message with length prefix for reliable socket reads
#[derive(Debug)]
pub struct FramedMessage {
    pub data: Vec<u8>,
}

impl FramedMessage {
    pub fn new<T: Serialize>(msg: &T) -> anyhow::Result<Self> {
        let data = serde_json::to_vec(msg)?;
        Ok(Self { data })
    }

    /// Encode message with length prefix (4 bytes, big-endian)
    pub fn encode(&self) -> Vec<u8> {
        let len = self.data.len() as u32;
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    #[cfg(test)]
    pub fn decode_command(data: &[u8]) -> anyhow::Result<OverlayCommand> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn decode_event(data: &[u8]) -> anyhow::Result<OverlayEvent> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Whether the app keeps running after an overlay event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Tracks which windows the overlay knows and translates between the two sides
pub struct OverlayBridge {
    config: OverlayConfig,
    /// Windows announced to the overlay, with the size they were announced at
    windows: HashMap<WindowId, (u32, u32)>,
}

impl OverlayBridge {
    pub fn new(config: &OverlayConfig) -> Self {
        Self {
            config: config.clone(),
            windows: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn is_mirrored(&self, window: WindowId) -> bool {
        self.windows.contains_key(&window)
    }

    /// Commands that follow a texture update of `window`
    pub fn on_update(
        &mut self,
        registry: &WindowRegistry,
        window: WindowId,
        outcome: &UpdateOutcome,
    ) -> Vec<OverlayCommand> {
        if matches!(outcome, UpdateOutcome::Released) {
            return self.on_closed(window).into_iter().collect();
        }
        if !outcome.changed_pixels() {
            return Vec::new();
        }
        let Some(node) = registry.get(window).filter(|n| n.is_top_level()) else {
            return Vec::new();
        };
        let Some(texture) = node.texture else {
            return Vec::new();
        };
        let min = self.config.min_window_size;
        if texture.width <= min || texture.height <= min {
            return Vec::new();
        }

        let mut commands = Vec::new();
        let size = (texture.width, texture.height);
        match self.windows.get(&window).copied() {
            Some(announced) if announced == size => {}
            announced => {
                if announced.is_some() {
                    commands.push(OverlayCommand::CloseWindow { window });
                }
                let position = overlay_position(
                    node,
                    registry.root_offset(window),
                    self.config.placement_pixels_per_meter,
                    self.config.depth,
                );
                commands.push(OverlayCommand::CreateWindow {
                    window,
                    title: node.name.clone().unwrap_or_default(),
                    width: texture.width,
                    height: texture.height,
                    pixels_per_meter: self.config.pixels_per_meter,
                });
                commands.push(OverlayCommand::SetTransform {
                    window,
                    matrix: Mat4::from_translation(position),
                });
                self.windows.insert(window, size);
                debug!("Overlay window for 0x{:x} ({}x{})", window, size.0, size.1);
            }
        }

        commands.push(OverlayCommand::SubmitTexture {
            window,
            texture: texture.handle,
            width: texture.width,
            height: texture.height,
        });
        commands
    }

    /// The window was unmapped or destroyed
    pub fn on_closed(&mut self, window: WindowId) -> Option<OverlayCommand> {
        self.windows
            .remove(&window)
            .map(|_| OverlayCommand::CloseWindow { window })
    }

    /// Apply one overlay event to the desktop
    pub fn on_event(
        &mut self,
        registry: &WindowRegistry,
        event: OverlayEvent,
        synth: &mut dyn InputSynth,
    ) -> Result<Flow, TransportError> {
        match event {
            OverlayEvent::Click { window, x, y, button, pressed } => {
                if let Some((x, y)) = self.to_desktop(registry, window, x, y) {
                    synth.click(x, y, button, pressed)?;
                }
            }
            OverlayEvent::MoveCursor { window, x, y } => {
                if let Some((x, y)) = self.to_desktop(registry, window, x, y) {
                    synth.move_cursor(x, y)?;
                }
            }
            OverlayEvent::Keyboard { window, text } => {
                debug!("Overlay text for {:?}: {} chars", window, text.chars().count());
                for c in text.chars() {
                    synth.character(c)?;
                }
            }
            OverlayEvent::Quit { reason: QuitReason::Shutdown } => {
                info!("Overlay requested shutdown");
                return Ok(Flow::Quit);
            }
            OverlayEvent::Quit { reason } => {
                warn!("Overlay quit with {:?}, continuing", reason);
            }
        }
        Ok(Flow::Continue)
    }

    /// Overlay panel pixels to desktop pixels
    fn to_desktop(&self, registry: &WindowRegistry, window: WindowId, x: i32, y: i32) -> Option<(i32, i32)> {
        if !registry.contains(window) {
            debug!("Overlay event for unknown window 0x{:x}", window);
            return None;
        }
        let (origin_x, origin_y) = registry.root_offset(window);
        Some((origin_x + x, origin_y + y))
    }

    /// Close every announced window
    pub fn close_all(&mut self) -> Vec<OverlayCommand> {
        self.windows
            .drain()
            .map(|(window, _)| OverlayCommand::CloseWindow { window })
            .collect()
    }
}
