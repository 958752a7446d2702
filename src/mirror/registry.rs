//! Window registry: the arena owning every [`WindowNode`]
//!
//! Nodes are keyed by window handle. Relations are stored as handles
//! (`parent`, ordered `children`), never as references, and every mutation of
//! the hierarchy goes through this type so the link and depth invariants
//! hold after each call:
//!
//! - a node has at most one parent and appears exactly once in its list;
//! - a node reachable from the root has `depth == parent.depth + 1`;
//! - a detached subtree has `depth == None`.

use std::collections::HashMap;

use glam::Vec3;
use tracing::{trace, warn};

use super::node::{WindowNode, WindowTexture};
use crate::transport::WindowId;

pub struct WindowRegistry {
    root: WindowId,
    nodes: HashMap<WindowId, WindowNode>,
    /// Scene position of the desktop's top-left corner
    desktop_origin: Vec3,
}

impl WindowRegistry {
    /// Registry holding only the root node
    pub fn new(root: WindowId) -> Self {
        let mut node = WindowNode::new(root);
        node.depth = Some(0);
        node.mapped = true;

        let mut nodes = HashMap::new();
        nodes.insert(root, node);
        Self {
            root,
            nodes,
            desktop_origin: Vec3::ZERO,
        }
    }

    pub fn root(&self) -> WindowId {
        self.root
    }

    pub fn desktop_origin(&self) -> Vec3 {
        self.desktop_origin
    }

    /// Where newly discovered windows are laid out from
    pub fn set_desktop_origin(&mut self, origin: Vec3) {
        self.desktop_origin = origin;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: WindowId) -> Option<&WindowNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut WindowNode> {
        self.nodes.get_mut(&id)
    }

    /// Existing node, or a new detached one
    pub fn get_or_create(&mut self, id: WindowId) -> &mut WindowNode {
        self.nodes.entry(id).or_insert_with(|| WindowNode::new(id))
    }

    pub fn parent(&self, id: WindowId) -> Option<WindowId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: WindowId) -> &[WindowId] {
        self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Insert `child` into `parent`'s list (on top).
    ///
    /// A no-op returning `false` when the link already exists. A child linked
    /// elsewhere is moved. Links that would create a cycle are refused.
    pub fn add(&mut self, parent: WindowId, child: WindowId) -> bool {
        if !self.nodes.contains_key(&parent) || child == self.root {
            return false;
        }
        if child == parent || self.is_ancestor(child, parent) {
            warn!("Refusing to link {:#x} under its own descendant {:#x}", child, parent);
            return false;
        }

        let previous = self.get_or_create(child).parent;
        if previous == Some(parent) {
            return false;
        }
        if let Some(previous) = previous {
            self.unlink(previous, child);
        }

        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        self.update_depths(child);
        true
    }

    /// Unlink `child` from `parent`, keeping the child's own subtree intact
    pub fn remove(&mut self, parent: WindowId, child: WindowId) -> bool {
        if self.parent(child) != Some(parent) {
            return false;
        }
        self.unlink(parent, child);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = None;
        }
        self.update_depths(child);
        true
    }

    /// Make `parent`'s children exactly `ordered`, in that stacking order
    pub fn set_children(&mut self, parent: WindowId, ordered: &[WindowId]) {
        let stale: Vec<WindowId> = self
            .children(parent)
            .iter()
            .copied()
            .filter(|c| !ordered.contains(c))
            .collect();
        for child in stale {
            self.remove(parent, child);
        }

        let mut linked = Vec::with_capacity(ordered.len());
        for &child in ordered {
            self.add(parent, child);
            if self.parent(child) == Some(parent) && !linked.contains(&child) {
                linked.push(child);
            }
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children = linked;
        }
    }

    /// Drop a window and its whole subtree, returning the removed nodes
    pub fn forget(&mut self, id: WindowId) -> Vec<WindowNode> {
        if id == self.root || !self.nodes.contains_key(&id) {
            return Vec::new();
        }
        if let Some(parent) = self.parent(id) {
            self.unlink(parent, id);
        }

        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                pending.extend(node.children.iter().copied());
                removed.push(node);
            }
        }
        trace!("Forgot {:#x} ({} nodes)", id, removed.len());
        removed
    }

    /// Remove every node no longer reachable from the root
    pub fn prune_detached(&mut self) -> Vec<WindowNode> {
        let detached: Vec<WindowId> = self
            .nodes
            .values()
            .filter(|n| n.depth.is_none())
            .map(|n| n.id)
            .collect();
        detached
            .into_iter()
            .filter_map(|id| self.nodes.remove(&id))
            .collect()
    }

    /// Take the textures of nodes that are no longer top-levels, e.g. after
    /// a reparent into a frame window
    pub fn take_stray_textures(&mut self) -> Vec<(WindowId, WindowTexture)> {
        let mut stray: Vec<(WindowId, WindowTexture)> = self
            .nodes
            .values_mut()
            .filter(|n| !n.is_top_level())
            .filter_map(|n| n.texture.take().map(|t| (n.id, t)))
            .collect();
        stray.sort_by_key(|(id, _)| *id);
        stray
    }

    /// Every node except the root; the root keeps no children
    pub fn clear(&mut self) -> Vec<WindowNode> {
        let root = self.root;
        let ids: Vec<WindowId> = self.nodes.keys().copied().filter(|&id| id != root).collect();
        let removed = ids.into_iter().filter_map(|id| self.nodes.remove(&id)).collect();
        if let Some(node) = self.nodes.get_mut(&root) {
            node.children.clear();
        }
        removed
    }

    /// `[root, .., id]`, or `None` if `id` is unknown or detached
    pub fn path_from_root(&self, id: WindowId) -> Option<Vec<WindowId>> {
        let mut path = vec![id];
        let mut current = self.nodes.get(&id)?;
        while let Some(parent) = current.parent {
            if path.len() > self.nodes.len() {
                return None;
            }
            path.push(parent);
            current = self.nodes.get(&parent)?;
        }
        if current.id != self.root {
            return None;
        }
        path.reverse();
        Some(path)
    }

    /// Whether `ancestor` is a strict ancestor of `id`
    pub fn is_ancestor(&self, ancestor: WindowId, id: WindowId) -> bool {
        let mut current = self.parent(id);
        let mut steps = 0;
        while let Some(window) = current {
            if window == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.parent(window);
        }
        false
    }

    /// Root-relative position of `id`'s origin: its own offset plus every ancestor's
    pub fn root_offset(&self, id: WindowId) -> (i32, i32) {
        let mut offset = (0, 0);
        let mut current = self.nodes.get(&id);
        let mut steps = 0;
        while let Some(node) = current {
            offset.0 += node.geometry.x;
            offset.1 += node.geometry.y;
            steps += 1;
            if steps > self.nodes.len() {
                break;
            }
            current = node.parent.and_then(|p| self.nodes.get(&p));
        }
        offset
    }

    #[cfg(test)]
    /// The depth-1 ancestor (or self) whose plane carries `id`
    pub fn top_level_of(&self, id: WindowId) -> Option<WindowId> {
        let path = self.path_from_root(id)?;
        path.get(1).copied()
    }

    /// Top-level windows in stacking order
    pub fn top_levels(&self) -> impl Iterator<Item = &WindowNode> + '_ {
        self.children(self.root)
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| n.is_top_level())
    }

    fn unlink(&mut self, parent: WindowId, child: WindowId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|&c| c != child);
        }
    }

    /// Recompute depth for `id` and its subtree from `id`'s parent
    fn update_depths(&mut self, id: WindowId) {
        let depth = if id == self.root {
            Some(0)
        } else {
            self.parent(id)
                .and_then(|p| self.nodes.get(&p))
                .and_then(|p| p.depth)
                .map(|d| d + 1)
        };

        let mut pending = vec![(id, depth)];
        while let Some((next, depth)) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(&next) {
                node.depth = depth;
                let child_depth = depth.map(|d| d + 1);
                pending.extend(node.children.iter().map(|&c| (c, child_depth)));
            }
        }
    }
}
