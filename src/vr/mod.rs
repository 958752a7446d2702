//! VR input
//!
//! A [`VrBackend`] reports tracked poses and the analog controls once per
//! frame; [`VrInteraction`] turns them into pointer, button and grab actions
//! against the mirrored windows.

pub mod desktop;
pub mod interaction;
pub mod scripted;

use glam::Mat4;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use crate::config::{VrBackendKind, VrConfig};

pub use desktop::DesktopBackend;
pub use interaction::{ControlHistory, VrAction, VrInteraction};
pub use scripted::ScriptedBackend;

/// Analog channels per frame, ten per hand
pub const CONTROL_COUNT: usize = 20;

/// Channel indices into [`Controls`]
pub mod channel {
    pub const LEFT_X: usize = 0;
    pub const LEFT_Y: usize = 1;
    pub const LEFT_TRIGGER: usize = 2;
    pub const LEFT_BUMPER: usize = 3;
    pub const LEFT_MENU: usize = 4;
    pub const LEFT_STICK: usize = 5;
    pub const LEFT_1: usize = 6;
    pub const LEFT_2: usize = 7;
    pub const LEFT_3: usize = 8;
    pub const LEFT_4: usize = 9;
    pub const RIGHT_X: usize = 10;
    pub const RIGHT_Y: usize = 11;
    pub const RIGHT_TRIGGER: usize = 12;
    pub const RIGHT_BUMPER: usize = 13;
    /// Grip on runtimes that expose one
    pub const RIGHT_MENU: usize = 14;
    pub const RIGHT_STICK: usize = 15;
    /// "A" button
    pub const RIGHT_1: usize = 16;
    pub const RIGHT_2: usize = 17;
    /// Trigger as a digital button
    pub const RIGHT_3: usize = 18;
    pub const RIGHT_4: usize = 19;
}

/// One frame of analog control values, 0.0 (released) to 1.0 (pressed)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Controls(pub [f32; CONTROL_COUNT]);

impl Controls {
    pub fn get(&self, channel: usize) -> f32 {
        self.0.get(channel).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, channel: usize, value: f32) {
        if let Some(slot) = self.0.get_mut(channel) {
            *slot = value;
        }
    }
}

/// Tracked device poses in the runtime's standing space, meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HandPoses {
    #[serde(default)]
    pub hmd: Option<Mat4>,
    #[serde(default)]
    pub left: Option<Mat4>,
    #[serde(default)]
    pub right: Option<Mat4>,
}

impl HandPoses {
    pub fn any_hand(&self) -> bool {
        self.left.is_some() || self.right.is_some()
    }
}

#[derive(Debug, Error)]
pub enum VrError {
    #[error("VR backend unavailable: {0}")]
    Unavailable(String),

    #[error("{path}:{line}: invalid trace frame")]
    Script {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("trace {0} has no frames")]
    EmptyScript(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Source of tracked poses and controller state
pub trait VrBackend {
    fn name(&self) -> &'static str;

    /// False when no headset drives the pointer; the mouse does instead
    fn is_active(&self) -> bool;

    /// Latest poses. Untracked devices are `None`.
    fn poll_poses(&mut self) -> Result<HandPoses, VrError>;

    /// Controls sampled with the last poses
    fn read_controls(&mut self) -> Controls;
}

/// Build the backend named in the configuration
pub fn select_backend(config: &VrConfig) -> Result<Box<dyn VrBackend>, VrError> {
    let backend: Box<dyn VrBackend> = match config.backend {
        VrBackendKind::Desktop => Box::new(DesktopBackend),
        VrBackendKind::Scripted => {
            let path = config.script.as_ref().ok_or_else(|| {
                VrError::Unavailable("scripted backend needs vr.script".into())
            })?;
            Box::new(ScriptedBackend::load(path, config.loop_script)?)
        }
    };
    info!("VR backend: {}", backend.name());
    Ok(backend)
}
