//! Hierarchy synchronizer
//!
//! There is no incremental diff: after any structural notification the
//! affected subtree is re-queried in full and the registry reconciled
//! against it. Structural events are rare next to damage, so the
//! O(windows) walk is fine.

use glam::Mat4;
use tracing::{debug, trace};

use super::node::WindowNode;
use super::placement::desktop_transform;
use super::registry::WindowRegistry;
use crate::transport::{DisplayTransport, EventMask, TransportError, WindowClass, WindowId};

/// Selection made on every mirrored window
pub const WINDOW_EVENT_MASK: EventMask = EventMask::SUBSTRUCTURE_NOTIFY
    .union(EventMask::FOCUS_CHANGE)
    .union(EventMask::EXPOSURE);

/// First sight of a window: record its state and start listening to it
pub fn discover<T: DisplayTransport + ?Sized>(
    registry: &mut WindowRegistry,
    transport: &T,
    window: WindowId,
) -> Result<(), TransportError> {
    let attrs = transport.window_attributes(window)?;
    let name = transport.fetch_name(window).unwrap_or_else(|e| {
        debug!("No name for {:#x}: {}", window, e);
        None
    });

    let origin = Mat4::from_translation(registry.desktop_origin());
    let node = registry.get_or_create(window);
    node.geometry = attrs.geometry;
    node.mapped = attrs.viewable;
    node.class = attrs.class;
    node.event_mask = attrs.event_mask;
    node.name = name;
    node.transform = origin * desktop_transform(attrs.geometry.x, attrs.geometry.y);

    if window != transport.root() {
        transport.select_input(window, WINDOW_EVENT_MASK)?;
        if attrs.class == WindowClass::InputOutput {
            transport.watch_damage(window)?;
        }
    }
    trace!("Discovered {:#x} {:?} at {:?}", window, attrs.class, attrs.geometry);
    Ok(())
}

/// Re-query `window`'s children and recurse, reconciling the registry.
///
/// Children that vanish mid-walk are skipped. Returns how many windows were
/// visited below `window`.
pub fn refresh_subtree<T: DisplayTransport + ?Sized>(
    registry: &mut WindowRegistry,
    transport: &T,
    window: WindowId,
) -> Result<usize, TransportError> {
    let children = transport.query_children(window)?;

    let mut present = Vec::with_capacity(children.len());
    for child in children {
        if !registry.contains(child) {
            if let Err(e) = discover(registry, transport, child) {
                debug!("Skipping child {:#x} of {:#x}: {}", child, window, e);
                continue;
            }
        }
        present.push(child);
    }
    registry.set_children(window, &present);

    let mut visited = present.len();
    for child in present {
        match refresh_subtree(registry, transport, child) {
            Ok(count) => visited += count,
            Err(e) => debug!("Failed to refresh {:#x}: {}", child, e),
        }
    }
    Ok(visited)
}

/// Full walk from the root; returns the nodes that fell out of the tree
pub fn refresh_from_root<T: DisplayTransport + ?Sized>(
    registry: &mut WindowRegistry,
    transport: &T,
) -> Result<Vec<WindowNode>, TransportError> {
    let visited = refresh_subtree(registry, transport, registry.root())?;
    let pruned = registry.prune_detached();
    trace!("Hierarchy refreshed: {} windows, {} pruned", visited, pruned.len());
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Rect;
    use crate::transport::fake::FakeDisplay;
    use glam::Vec3;

    const ROOT: WindowId = 0x100;

    /// root -> (A -> (A1, A2), B)
    fn display() -> FakeDisplay {
        let display = FakeDisplay::new(ROOT, 1920, 1080);
        display.add_window(ROOT, 0xa, Rect::new(100, 50, 400, 300));
        display.add_window(0xa, 0xa1, Rect::new(0, 0, 400, 20));
        display.add_window(0xa, 0xa2, Rect::new(0, 20, 400, 280));
        display.add_window(ROOT, 0xb, Rect::new(700, 0, 200, 100));
        display
    }

    fn assert_depths(registry: &WindowRegistry, window: WindowId) {
        let depth = registry.get(window).unwrap().depth().unwrap();
        for &child in registry.children(window) {
            assert_eq!(registry.get(child).unwrap().depth(), Some(depth + 1));
            assert_depths(registry, child);
        }
    }

    #[test]
    fn test_refresh_builds_tree_in_stacking_order() {
        let display = display();
        let mut registry = WindowRegistry::new(ROOT);

        refresh_from_root(&mut registry, &display).unwrap();

        assert_eq!(registry.children(ROOT), &[0xa, 0xb]);
        assert_eq!(registry.children(0xa), &[0xa1, 0xa2]);
        assert_eq!(registry.get(ROOT).unwrap().depth(), Some(0));
        assert_depths(&registry, ROOT);

        let a = registry.get(0xa).unwrap();
        assert!(a.is_top_level());
        assert!(a.mapped);
        assert_eq!(a.transform.w_axis.truncate(), Vec3::new(100.0, -50.0, 0.0));
    }

    #[test]
    fn test_discovery_places_relative_to_desktop_origin() {
        let display = display();
        let mut registry = WindowRegistry::new(ROOT);
        registry.set_desktop_origin(Vec3::new(-960.0, 540.0, 0.0));

        refresh_from_root(&mut registry, &display).unwrap();

        let b = registry.get(0xb).unwrap();
        assert_eq!(b.transform.w_axis.truncate(), Vec3::new(-260.0, 540.0, 0.0));
    }

    #[test]
    fn test_discovery_selects_input_and_watches_damage() {
        let display = display();
        display.set_class(0xb, WindowClass::InputOnly);
        let mut registry = WindowRegistry::new(ROOT);

        refresh_from_root(&mut registry, &display).unwrap();

        assert_eq!(display.selections.borrow().get(&0xa), Some(&WINDOW_EVENT_MASK));
        assert!(!display.selections.borrow().contains_key(&ROOT));
        let watches = display.damage_watches.borrow();
        assert!(watches.contains(&0xa));
        assert!(watches.contains(&0xa2));
        assert!(!watches.contains(&0xb));
    }

    #[test]
    fn test_refresh_follows_reparent_and_prunes_destroyed() {
        let display = display();
        let mut registry = WindowRegistry::new(ROOT);
        refresh_from_root(&mut registry, &display).unwrap();

        display.reparent(0xa2, 0xb);
        display.destroy(0xa1);
        let mut pruned: Vec<WindowId> = refresh_from_root(&mut registry, &display)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        pruned.sort();

        assert_eq!(pruned, vec![0xa1]);
        assert!(registry.children(0xa).is_empty());
        assert_eq!(registry.children(0xb), &[0xa2]);
        assert_eq!(registry.get(0xa2).unwrap().depth(), Some(2));
        assert_depths(&registry, ROOT);
    }

    #[test]
    fn test_vanishing_child_is_skipped() {
        let display = display();
        display.fail(0xb);
        let mut registry = WindowRegistry::new(ROOT);

        refresh_from_root(&mut registry, &display).unwrap();

        assert_eq!(registry.children(ROOT), &[0xa]);
        assert!(!registry.contains(0xb));
    }

    #[test]
    fn test_repeated_refresh_is_stable() {
        let display = display();
        let mut registry = WindowRegistry::new(ROOT);
        refresh_from_root(&mut registry, &display).unwrap();
        let pruned = refresh_from_root(&mut registry, &display).unwrap();

        assert!(pruned.is_empty());
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.children(ROOT), &[0xa, 0xb]);
    }
}
