//! Enter/Leave crossing state machine
//!
//! Computes the EnterNotify/LeaveNotify chain the X server would generate
//! when the pointer moves from one window to another. Leave events are
//! listed from the old window outwards, enter events from the outermost
//! window inwards. `child` names the event window's child containing the
//! initial (leave) or final (enter) pointer position.
//!
//! "No focus" means the pointer is over the desktop background, so entering
//! a window from nowhere looks like entering it from the root.

use tracing::trace;

use super::registry::WindowRegistry;
use crate::transport::{CrossingDetail, CrossingKind, WindowId};

/// Which window currently holds the pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseFocus {
    #[default]
    NoFocus,
    FocusOn(WindowId),
}

/// One crossing event to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossingNotice {
    pub window: WindowId,
    pub kind: CrossingKind,
    pub detail: CrossingDetail,
    pub child: Option<WindowId>,
}

impl CrossingNotice {
    fn leave(window: WindowId, detail: CrossingDetail, child: Option<WindowId>) -> Self {
        Self { window, kind: CrossingKind::Leave, detail, child }
    }

    fn enter(window: WindowId, detail: CrossingDetail, child: Option<WindowId>) -> Self {
        Self { window, kind: CrossingKind::Enter, detail, child }
    }
}

/// Pointer focus tracker
#[derive(Debug, Default)]
pub struct PointerFocus {
    state: MouseFocus,
}

impl PointerFocus {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn current(&self) -> MouseFocus {
        self.state
    }

    pub fn window(&self) -> Option<WindowId> {
        match self.state {
            MouseFocus::NoFocus => None,
            MouseFocus::FocusOn(window) => Some(window),
        }
    }

    /// Forget the focus without emitting anything (window unmapped or gone)
    pub fn reset(&mut self) {
        self.state = MouseFocus::NoFocus;
    }

    /// Move focus to `target` and return the crossing events to deliver
    pub fn transition(
        &mut self,
        registry: &WindowRegistry,
        target: Option<WindowId>,
    ) -> Vec<CrossingNotice> {
        let target = target.filter(|&t| registry.path_from_root(t).is_some());
        let notices = crossing_sequence(registry, self.window(), target);
        if !notices.is_empty() {
            trace!("Pointer focus {:?} -> {:?}: {} crossings", self.state, target, notices.len());
        }
        self.state = match target {
            Some(window) => MouseFocus::FocusOn(window),
            None => MouseFocus::NoFocus,
        };
        notices
    }
}

/// Crossing events for a pointer move from `from` to `to`.
///
/// Windows that are unknown or detached count as "no window".
pub fn crossing_sequence(
    registry: &WindowRegistry,
    from: Option<WindowId>,
    to: Option<WindowId>,
) -> Vec<CrossingNotice> {
    let from_path = from.and_then(|w| registry.path_from_root(w));
    let to_path = to.and_then(|w| registry.path_from_root(w));

    match (from_path, to_path) {
        (None, None) => Vec::new(),
        (None, Some(to)) => enter_from_outside(&to),
        (Some(from), None) => leave_to_outside(&from),
        (Some(from), Some(to)) if from.last() == to.last() => Vec::new(),
        (Some(from), Some(to)) => between(&from, &to),
    }
}

/// `path` is `[root, .., target]`
fn enter_from_outside(path: &[WindowId]) -> Vec<CrossingNotice> {
    let Some((&target, _)) = path.split_last() else {
        return Vec::new();
    };
    let mut notices: Vec<CrossingNotice> = path
        .windows(2)
        .skip(1)
        .map(|pair| CrossingNotice::enter(pair[0], CrossingDetail::Virtual, Some(pair[1])))
        .collect();
    notices.push(CrossingNotice::enter(target, CrossingDetail::Ancestor, None));
    notices
}

fn leave_to_outside(path: &[WindowId]) -> Vec<CrossingNotice> {
    let Some((&origin, _)) = path.split_last() else {
        return Vec::new();
    };
    let mut notices = vec![CrossingNotice::leave(origin, CrossingDetail::Ancestor, None)];
    notices.extend(
        path.windows(2)
            .skip(1)
            .rev()
            .map(|pair| CrossingNotice::leave(pair[0], CrossingDetail::Virtual, Some(pair[1]))),
    );
    notices
}

fn between(from: &[WindowId], to: &[WindowId]) -> Vec<CrossingNotice> {
    let shared = from.iter().zip(to).take_while(|(a, b)| a == b).count();
    let (&origin, &target) = match (from.last(), to.last()) {
        (Some(origin), Some(target)) => (origin, target),
        _ => return Vec::new(),
    };

    // Windows strictly between the common ancestor and each end, with the
    // child towards that end
    let up: Vec<(WindowId, WindowId)> = from[shared.saturating_sub(1)..]
        .windows(2)
        .skip(1)
        .map(|pair| (pair[0], pair[1]))
        .rev()
        .collect();
    let down: Vec<(WindowId, WindowId)> = to[shared.saturating_sub(1)..]
        .windows(2)
        .skip(1)
        .map(|pair| (pair[0], pair[1]))
        .collect();

    let mut notices = Vec::with_capacity(up.len() + down.len() + 2);
    if shared == to.len() {
        // Target is an ancestor of the origin
        notices.push(CrossingNotice::leave(origin, CrossingDetail::Ancestor, None));
        notices.extend(up.iter().map(|&(w, c)| CrossingNotice::leave(w, CrossingDetail::Virtual, Some(c))));
        notices.push(CrossingNotice::enter(target, CrossingDetail::Inferior, None));
    } else if shared == from.len() {
        // Origin is an ancestor of the target
        notices.push(CrossingNotice::leave(origin, CrossingDetail::Inferior, None));
        notices.extend(down.iter().map(|&(w, c)| CrossingNotice::enter(w, CrossingDetail::Virtual, Some(c))));
        notices.push(CrossingNotice::enter(target, CrossingDetail::Ancestor, None));
    } else {
        notices.push(CrossingNotice::leave(origin, CrossingDetail::Nonlinear, None));
        notices.extend(
            up.iter()
                .map(|&(w, c)| CrossingNotice::leave(w, CrossingDetail::NonlinearVirtual, Some(c))),
        );
        notices.extend(
            down.iter()
                .map(|&(w, c)| CrossingNotice::enter(w, CrossingDetail::NonlinearVirtual, Some(c))),
        );
        notices.push(CrossingNotice::enter(target, CrossingDetail::Nonlinear, None));
    }
    notices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CrossingDetail::*;

    const ROOT: WindowId = 1;

    /// root -> P(10) -> (B(11) -> (C(12) -> D(13)), E(14) -> F(15)); Q(20)
    fn tree() -> WindowRegistry {
        let mut registry = WindowRegistry::new(ROOT);
        registry.add(ROOT, 10);
        registry.add(10, 11);
        registry.add(11, 12);
        registry.add(12, 13);
        registry.add(10, 14);
        registry.add(14, 15);
        registry.add(ROOT, 20);
        registry
    }

    fn enter(window: WindowId, detail: CrossingDetail, child: Option<WindowId>) -> CrossingNotice {
        CrossingNotice::enter(window, detail, child)
    }

    fn leave(window: WindowId, detail: CrossingDetail, child: Option<WindowId>) -> CrossingNotice {
        CrossingNotice::leave(window, detail, child)
    }

    fn mirrored(notices: &[CrossingNotice]) -> Vec<CrossingNotice> {
        notices
            .iter()
            .rev()
            .map(|n| CrossingNotice { kind: n.kind.flipped(), ..*n })
            .collect()
    }

    #[test]
    fn test_enter_from_no_focus() {
        let registry = tree();
        let mut focus = PointerFocus::new();

        let notices = focus.transition(&registry, Some(11));

        assert_eq!(notices, vec![enter(10, Virtual, Some(11)), enter(11, Ancestor, None)]);
        assert_eq!(focus.current(), MouseFocus::FocusOn(11));
    }

    #[test]
    fn test_leave_to_no_focus() {
        let registry = tree();
        let mut focus = PointerFocus::new();
        focus.transition(&registry, Some(13));

        let notices = focus.transition(&registry, None);

        assert_eq!(
            notices,
            vec![
                leave(13, Ancestor, None),
                leave(12, Virtual, Some(13)),
                leave(11, Virtual, Some(12)),
                leave(10, Virtual, Some(11)),
            ]
        );
        assert_eq!(focus.current(), MouseFocus::NoFocus);
    }

    #[test]
    fn test_same_target_and_no_focus_are_no_ops() {
        let registry = tree();
        let mut focus = PointerFocus::new();
        assert!(focus.transition(&registry, None).is_empty());
        focus.transition(&registry, Some(12));
        assert!(focus.transition(&registry, Some(12)).is_empty());
    }

    #[test]
    fn test_down_into_descendant() {
        let registry = tree();
        assert_eq!(
            crossing_sequence(&registry, Some(10), Some(13)),
            vec![
                leave(10, Inferior, None),
                enter(11, Virtual, Some(12)),
                enter(12, Virtual, Some(13)),
                enter(13, Ancestor, None),
            ]
        );
    }

    #[test]
    fn test_up_to_ancestor() {
        let registry = tree();
        assert_eq!(
            crossing_sequence(&registry, Some(13), Some(11)),
            vec![leave(13, Ancestor, None), leave(12, Virtual, Some(13)), enter(11, Inferior, None)]
        );
    }

    #[test]
    fn test_nonlinear_deep_chains() {
        let registry = tree();
        assert_eq!(
            crossing_sequence(&registry, Some(13), Some(15)),
            vec![
                leave(13, Nonlinear, None),
                leave(12, NonlinearVirtual, Some(13)),
                leave(11, NonlinearVirtual, Some(12)),
                enter(14, NonlinearVirtual, Some(15)),
                enter(15, Nonlinear, None),
            ]
        );
    }

    #[test]
    fn test_nonlinear_between_top_levels() {
        let registry = tree();
        assert_eq!(
            crossing_sequence(&registry, Some(12), Some(20)),
            vec![
                leave(12, Nonlinear, None),
                leave(11, NonlinearVirtual, Some(12)),
                leave(10, NonlinearVirtual, Some(11)),
                enter(20, Nonlinear, None),
            ]
        );
    }

    #[test]
    fn test_round_trip_reverses_every_transition() {
        let registry = tree();
        let windows = [None, Some(10), Some(11), Some(12), Some(13), Some(14), Some(15), Some(20)];

        for &a in &windows {
            for &b in &windows {
                let there = crossing_sequence(&registry, a, b);
                let back = crossing_sequence(&registry, b, a);
                assert_eq!(back, mirrored(&there), "{:?} -> {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_stale_focus_counts_as_no_focus() {
        let mut registry = tree();
        let mut focus = PointerFocus::new();
        focus.transition(&registry, Some(15));
        registry.forget(14);

        let notices = focus.transition(&registry, Some(20));

        assert_eq!(notices, vec![enter(20, Ancestor, None)]);
    }

    #[test]
    fn test_detached_target_is_not_entered() {
        let mut registry = tree();
        registry.remove(ROOT, 20);
        let mut focus = PointerFocus::new();

        assert!(focus.transition(&registry, Some(20)).is_empty());
        assert_eq!(focus.current(), MouseFocus::NoFocus);
    }
}
