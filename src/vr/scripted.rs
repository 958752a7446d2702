//! Trace-driven VR backend
//!
//! Replays a JSON-lines file, one frame per line:
//!
//! ```text
//! {"right": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0.1,1.2,-0.3,1], "controls": {"18": 1.0}}
//! ```
//!
//! Matrices are column-major. Blank lines and lines starting with `#` are skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use glam::Mat4;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Controls, HandPoses, VrBackend, VrError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceFrame {
    #[serde(default)]
    pub hmd: Option<Mat4>,
    #[serde(default)]
    pub left: Option<Mat4>,
    #[serde(default)]
    pub right: Option<Mat4>,
    /// Channel index to value; missing channels read 0.0
    #[serde(default)]
    pub controls: BTreeMap<usize, f32>,
}

impl TraceFrame {
    fn poses(&self) -> HandPoses {
        HandPoses {
            hmd: self.hmd,
            left: self.left,
            right: self.right,
        }
    }

    fn controls(&self) -> Controls {
        let mut controls = Controls::default();
        for (&channel, &value) in &self.controls {
            controls.set(channel, value);
        }
        controls
    }
}

pub struct ScriptedBackend {
    frames: Vec<TraceFrame>,
    looping: bool,
    next: usize,
    current: Option<usize>,
}

impl ScriptedBackend {
    pub fn load(path: &Path, looping: bool) -> Result<Self, VrError> {
        let text = fs::read_to_string(path)?;
        let mut frames = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let frame = serde_json::from_str(line).map_err(|source| VrError::Script {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })?;
            frames.push(frame);
        }

        if frames.is_empty() {
            return Err(VrError::EmptyScript(path.to_path_buf()));
        }
        info!("Loaded {} trace frames from {:?}", frames.len(), path);
        Ok(Self::from_frames(frames, looping))
    }

    pub fn from_frames(frames: Vec<TraceFrame>, looping: bool) -> Self {
        Self {
            frames,
            looping,
            next: 0,
            current: None,
        }
    }

    fn finished(&self) -> bool {
        !self.looping && self.next >= self.frames.len()
    }
}

impl VrBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_active(&self) -> bool {
        !self.finished()
    }

    fn poll_poses(&mut self) -> Result<HandPoses, VrError> {
        if self.next >= self.frames.len() {
            if !self.looping {
                self.current = None;
                return Ok(HandPoses::default());
            }
            debug!("Trace finished, restarting");
            self.next = 0;
        }
        let index = self.next;
        self.next += 1;
        self.current = Some(index);
        Ok(self.frames[index].poses())
    }

    fn read_controls(&mut self) -> Controls {
        self.current
            .and_then(|index| self.frames.get(index))
            .map(TraceFrame::controls)
            .unwrap_or_default()
    }
}
