//! Hand interaction
//!
//! The left hand can carry the camera (menu toggles), the right hand points
//! at windows by proximity and clicks, right-clicks or grabs them.

use glam::{Mat4, Quat, Vec3};
use tracing::{debug, info, trace};

use super::{Controls, HandPoses, channel};
use crate::config::VrConfig;
use crate::mirror::{WindowRegistry, hit};
use crate::render::CursorShadow;
use crate::transport::{EventMask, WindowId};

/// Runtime poses are meters above the floor; the scene is centimeters around eye height
const FLOOR_OFFSET: Vec3 = Vec3::Y;
const METERS_TO_SCENE: f32 = 100.0;

/// The current and previous frame of controls
#[derive(Debug, Clone)]
pub struct ControlHistory {
    frames: [Controls; 2],
    newest: usize,
    press_threshold: f32,
    release_threshold: f32,
}

impl ControlHistory {
    pub fn new(press_threshold: f32, release_threshold: f32) -> Self {
        Self {
            frames: [Controls::default(); 2],
            newest: 0,
            press_threshold,
            release_threshold,
        }
    }

    pub fn push(&mut self, controls: Controls) {
        self.newest = 1 - self.newest;
        self.frames[self.newest] = controls;
    }

    pub fn value(&self, channel: usize) -> f32 {
        self.frames[self.newest].get(channel)
    }

    fn previous(&self, channel: usize) -> f32 {
        self.frames[1 - self.newest].get(channel)
    }

    /// Crossed from released to pressed between the last two frames
    pub fn pressed(&self, channel: usize) -> bool {
        self.value(channel) > self.press_threshold && self.previous(channel) < self.release_threshold
    }

    pub fn released(&self, channel: usize) -> bool {
        self.previous(channel) > self.press_threshold && self.value(channel) < self.release_threshold
    }

    pub fn is_released(&self, channel: usize) -> bool {
        self.value(channel) < self.release_threshold
    }
}

/// What the hands asked for this frame, applied by the caller in order
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VrAction {
    /// Pointer now over `target` at window-local `(x, y)`, or over nothing
    MouseFocus { target: Option<WindowId>, x: i32, y: i32 },
    KeyboardFocus(WindowId),
    Button { window: WindowId, x: i32, y: i32, button: u8, pressed: bool },
    Motion { window: WindowId, x: i32, y: i32 },
    /// New scene transform for a grabbed top-level
    MoveFrame { frame: WindowId, transform: Mat4 },
}

#[derive(Debug, Clone, Copy)]
struct Grab {
    frame: WindowId,
    /// Frame transform relative to the scaled hand
    offset: Mat4,
}

/// Runtime pose to scene units, keeping orientation
pub fn scene_pose(pose: Mat4) -> Mat4 {
    let (_, rotation, translation) = pose.to_scale_rotation_translation();
    Mat4::from_rotation_translation(rotation, (translation - FLOOR_OFFSET) * METERS_TO_SCENE)
}

/// Right-hand pose with the pointing axis tipped forward
pub fn right_hand_pose(pose: Mat4) -> Mat4 {
    scene_pose(pose) * Mat4::from_quat(Quat::from_rotation_x(-90f32.to_radians()))
}

pub struct VrInteraction {
    history: ControlHistory,
    /// Desktop pixels per scene unit
    scale: f32,
    grab_radius: f32,
    cursor_scale: f32,
    active: bool,
    tracking: bool,
    /// Camera relative to the left hand while tracking
    relative: Mat4,
    grab: Option<Grab>,
    cursor: Option<Mat4>,
    shadow: Option<CursorShadow>,
}

impl VrInteraction {
    pub fn new(config: &VrConfig, scale: f32) -> Self {
        Self {
            history: ControlHistory::new(config.press_threshold, config.release_threshold),
            scale,
            grab_radius: config.grab_radius,
            cursor_scale: config.cursor_scale,
            active: false,
            tracking: false,
            relative: Mat4::IDENTITY,
            grab: None,
            cursor: None,
            shadow: None,
        }
    }

    /// At least one hand was tracked last frame
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[cfg(test)]
    pub fn is_grabbing(&self) -> bool {
        self.grab.is_some()
    }

    /// Hand cursor transform in scene units
    pub fn cursor(&self) -> Option<Mat4> {
        self.cursor
    }

    pub fn shadow(&self) -> Option<&CursorShadow> {
        self.shadow.as_ref()
    }

    /// Drop a grab or shadow that refers to a window that went away
    pub fn forget_frame(&mut self, frame: WindowId) {
        if self.grab.is_some_and(|g| g.frame == frame) {
            self.grab = None;
        }
        self.shadow = None;
    }

    /// Consume one frame of poses and controls
    pub fn update(
        &mut self,
        registry: &WindowRegistry,
        poses: &HandPoses,
        controls: Controls,
        camera: &mut Mat4,
    ) -> Vec<VrAction> {
        self.history.push(controls);

        let hands = poses.any_hand();
        if hands != self.active {
            info!("-= hands {} =-", if hands { "activated" } else { "deactivated" });
            self.active = hands;
        }

        if let Some(left) = poses.left {
            self.update_camera(scene_pose(left), camera);
        }

        let mut actions = Vec::new();
        match poses.right {
            Some(right) => self.update_pointer(registry, right_hand_pose(right), &mut actions),
            None => {
                self.cursor = None;
                self.shadow = None;
            }
        }
        actions
    }

    fn update_camera(&mut self, left: Mat4, camera: &mut Mat4) {
        let toggled = self.history.pressed(channel::LEFT_MENU);
        if !self.tracking {
            if toggled {
                self.relative = left.inverse() * *camera;
                self.tracking = true;
                debug!("Camera follows left hand");
            }
        } else if toggled {
            self.tracking = false;
            debug!("Camera released");
        } else {
            *camera = left * self.relative;
        }
    }

    fn update_pointer(&mut self, registry: &WindowRegistry, right: Mat4, actions: &mut Vec<VrAction>) {
        let pixel_hand = right * Mat4::from_scale(Vec3::splat(self.scale));
        self.cursor = Some(right * Mat4::from_scale(Vec3::splat(self.cursor_scale)));

        if let Some(grab) = self.grab {
            if self.history.is_released(channel::RIGHT_MENU) || !registry.contains(grab.frame) {
                trace!("Released frame 0x{:x}", grab.frame);
                self.grab = None;
            } else {
                let transform = pixel_hand * grab.offset;
                if let Some(shadow) = self.shadow.as_mut() {
                    shadow.frame = transform;
                }
                actions.push(VrAction::MoveFrame {
                    frame: grab.frame,
                    transform,
                });
            }
            return;
        }

        let position = right.w_axis.truncate() * self.scale;
        let Some(hit) = hit::nearest(registry, position, self.grab_radius, EventMask::empty()) else {
            self.shadow = None;
            actions.push(VrAction::MouseFocus { target: None, x: 0, y: 0 });
            return;
        };

        self.shadow = Some(CursorShadow {
            frame: hit.transform,
            x: hit.frame_x,
            y: hit.frame_y,
        });
        actions.push(VrAction::MouseFocus {
            target: Some(hit.window),
            x: hit.x,
            y: hit.y,
        });

        let button = |button, pressed| VrAction::Button {
            window: hit.window,
            x: hit.x,
            y: hit.y,
            button,
            pressed,
        };

        if self.history.pressed(channel::RIGHT_3) {
            actions.push(VrAction::KeyboardFocus(hit.window));
            actions.push(button(1, true));
        } else if self.history.released(channel::RIGHT_3) {
            actions.push(button(1, false));
        } else if self.history.pressed(channel::RIGHT_1) {
            actions.push(VrAction::KeyboardFocus(hit.window));
            actions.push(button(3, true));
        } else if self.history.released(channel::RIGHT_1) {
            actions.push(button(3, false));
        } else if self.history.pressed(channel::RIGHT_MENU) {
            debug!("Grabbed frame 0x{:x}", hit.frame);
            self.grab = Some(Grab {
                frame: hit.frame,
                offset: pixel_hand.inverse() * hit.transform,
            });
        } else {
            actions.push(VrAction::Motion {
                window: hit.window,
                x: hit.x,
                y: hit.y,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Rect;

    const ROOT: WindowId = 1;
    const FRAME: WindowId = 2;

    fn registry() -> WindowRegistry {
        let mut registry = WindowRegistry::new(ROOT);
        registry.add(ROOT, FRAME);
        let node = registry.get_or_create(FRAME);
        node.geometry = Rect::new(0, 0, 200, 100);
        node.mapped = true;
        registry
    }

    fn interaction() -> VrInteraction {
        VrInteraction::new(&VrConfig::default(), 1.0)
    }

    /// Right hand over frame pixel (50, 25), 6.25 units in front of it
    fn right_at(x_offset: f32) -> HandPoses {
        HandPoses {
            right: Some(Mat4::from_translation(Vec3::new(0.5 + x_offset, 0.75, 0.0625))),
            ..HandPoses::default()
        }
    }

    fn controls(channel: usize, value: f32) -> Controls {
        let mut controls = Controls::default();
        controls.set(channel, value);
        controls
    }

    #[test]
    fn test_history_edges() {
        let mut history = ControlHistory::new(0.75, 0.25);
        history.push(controls(channel::RIGHT_3, 0.5));
        assert!(!history.pressed(channel::RIGHT_3));

        history.push(controls(channel::RIGHT_3, 0.9));
        // 0.5 is not below the release threshold
        assert!(!history.pressed(channel::RIGHT_3));

        history.push(controls(channel::RIGHT_3, 0.1));
        history.push(controls(channel::RIGHT_3, 0.9));
        assert!(history.pressed(channel::RIGHT_3));
        assert!(!history.released(channel::RIGHT_3));

        history.push(controls(channel::RIGHT_3, 0.0));
        assert!(history.released(channel::RIGHT_3));
    }

    #[test]
    fn test_scene_pose_lowers_and_scales() {
        let pose = Mat4::from_translation(Vec3::new(0.25, 1.5, -0.5));
        let scene = scene_pose(pose);
        assert_eq!(scene.w_axis.truncate(), Vec3::new(25.0, 50.0, -50.0));
    }

    #[test]
    fn test_right_hand_points_forward() {
        let right = right_hand_pose(Mat4::IDENTITY);
        let up = right.transform_vector3(Vec3::Y);
        assert!(up.abs_diff_eq(Vec3::NEG_Z, 1e-6));
    }

    #[test]
    fn test_trigger_clicks_nearest_window() {
        let registry = registry();
        let mut vr = interaction();
        let mut camera = Mat4::IDENTITY;

        let actions = vr.update(&registry, &right_at(0.0), Controls::default(), &mut camera);
        assert_eq!(
            actions,
            vec![
                VrAction::MouseFocus { target: Some(FRAME), x: 50, y: 25 },
                VrAction::Motion { window: FRAME, x: 50, y: 25 },
            ]
        );
        assert!(vr.is_active());
        assert!(vr.cursor().is_some());
        assert_eq!(vr.shadow().map(|s| (s.x, s.y)), Some((50.0, 25.0)));

        let actions = vr.update(&registry, &right_at(0.0), controls(channel::RIGHT_3, 1.0), &mut camera);
        assert_eq!(
            actions,
            vec![
                VrAction::MouseFocus { target: Some(FRAME), x: 50, y: 25 },
                VrAction::KeyboardFocus(FRAME),
                VrAction::Button { window: FRAME, x: 50, y: 25, button: 1, pressed: true },
            ]
        );

        let actions = vr.update(&registry, &right_at(0.0), Controls::default(), &mut camera);
        assert_eq!(
            actions[1],
            VrAction::Button { window: FRAME, x: 50, y: 25, button: 1, pressed: false }
        );
    }

    #[test]
    fn test_a_button_is_right_click() {
        let registry = registry();
        let mut vr = interaction();
        let mut camera = Mat4::IDENTITY;

        let actions = vr.update(&registry, &right_at(0.0), controls(channel::RIGHT_1, 1.0), &mut camera);
        assert_eq!(
            actions[2],
            VrAction::Button { window: FRAME, x: 50, y: 25, button: 3, pressed: true }
        );
    }

    #[test]
    fn test_hand_away_from_windows_clears_focus() {
        let registry = registry();
        let mut vr = interaction();
        let mut camera = Mat4::IDENTITY;

        // 400 pixels right of the frame
        let actions = vr.update(&registry, &right_at(4.0), Controls::default(), &mut camera);
        assert_eq!(actions, vec![VrAction::MouseFocus { target: None, x: 0, y: 0 }]);
        assert!(vr.shadow().is_none());
    }

    #[test]
    fn test_grip_drags_frame() {
        let registry = registry();
        let mut vr = interaction();
        let mut camera = Mat4::IDENTITY;
        let grip = controls(channel::RIGHT_MENU, 1.0);

        let actions = vr.update(&registry, &right_at(0.0), grip, &mut camera);
        assert_eq!(actions.len(), 1);
        assert!(vr.is_grabbing());

        let actions = vr.update(&registry, &right_at(0.125), grip, &mut camera);
        let [VrAction::MoveFrame { frame, transform }] = actions[..] else {
            panic!("expected a single move, got {:?}", actions);
        };
        assert_eq!(frame, FRAME);
        let expected = Mat4::from_translation(Vec3::new(12.5, 0.0, 0.0));
        assert!(transform.abs_diff_eq(expected, 1e-3));

        let actions = vr.update(&registry, &right_at(0.125), Controls::default(), &mut camera);
        assert!(actions.is_empty());
        assert!(!vr.is_grabbing());
    }

    #[test]
    fn test_left_menu_toggles_camera_tracking() {
        let registry = registry();
        let mut vr = interaction();
        let mut camera = Mat4::from_translation(Vec3::new(0.0, 0.0, 30.0));
        let menu = controls(channel::LEFT_MENU, 1.0);
        let left = |x: f32| HandPoses {
            left: Some(Mat4::from_translation(Vec3::new(x, 1.0, 0.0))),
            ..HandPoses::default()
        };

        vr.update(&registry, &left(0.0), menu, &mut camera);
        vr.update(&registry, &left(0.125), menu, &mut camera);
        assert!(camera.w_axis.truncate().abs_diff_eq(Vec3::new(12.5, 0.0, 30.0), 1e-4));

        vr.update(&registry, &left(0.25), Controls::default(), &mut camera);
        vr.update(&registry, &left(0.5), menu, &mut camera);
        assert!(camera.w_axis.truncate().abs_diff_eq(Vec3::new(25.0, 0.0, 30.0), 1e-4));

        // Tracking is off now
        vr.update(&registry, &left(1.0), Controls::default(), &mut camera);
        assert!(camera.w_axis.truncate().abs_diff_eq(Vec3::new(25.0, 0.0, 30.0), 1e-4));
    }

    #[test]
    fn test_losing_hands_hides_cursor() {
        let registry = registry();
        let mut vr = interaction();
        let mut camera = Mat4::IDENTITY;

        vr.update(&registry, &right_at(0.0), Controls::default(), &mut camera);
        vr.update(&registry, &HandPoses::default(), Controls::default(), &mut camera);

        assert!(!vr.is_active());
        assert!(vr.cursor().is_none());
    }
}
