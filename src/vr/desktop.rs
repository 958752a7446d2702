use super::{Controls, HandPoses, VrBackend, VrError};

/// No headset: nothing is tracked and the mouse drives the pointer
pub struct DesktopBackend;

impl VrBackend for DesktopBackend {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn is_active(&self) -> bool {
        false
    }

    fn poll_poses(&mut self) -> Result<HandPoses, VrError> {
        Ok(HandPoses::default())
    }

    fn read_controls(&mut self) -> Controls {
        Controls::default()
    }
}
