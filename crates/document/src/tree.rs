use std::sync::PoisonError;

use crossbeam_channel::{Receiver, Sender, unbounded};
use model::{Rect, Transform};
use render_protocol::{NodeKey, Paint, SceneEvent};
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::SceneError;
use crate::node::{
    Content, LayerNode, LayerStyle, NodeKind, NodeSpec, PendingInvalidation, SceneNode, SpecKind,
    object_area,
};

/// Arena of scene nodes rooted at a single layer.
///
/// Parent links are plain keys; a layer owns its children through its child list.
#[derive(Debug)]
pub struct SceneTree {
    nodes: SlotMap<NodeKey, SceneNode>,
    root: NodeKey,
    bounds: Rect,
    change_clock: u64,
    suspend_depth: u32,
}

impl SceneTree {
    pub(crate) fn new(bounds: Rect) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(SceneNode {
            parent: None,
            area: Rect::EMPTY,
            transform: Transform::IDENTITY,
            paint: Paint::default(),
            change_counter: 0,
            kind: NodeKind::Layer(LayerNode::default()),
        });
        Self {
            nodes,
            root,
            bounds,
            change_clock: 0,
            suspend_depth: 0,
        }
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn node(&self, key: NodeKey) -> Option<&SceneNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn children(&self, layer: NodeKey) -> Result<&[NodeKey], SceneError> {
        Ok(&self.layer(layer)?.children)
    }

    pub fn index_in_parent(&self, key: NodeKey) -> Option<usize> {
        let parent = self.nodes.get(key)?.parent?;
        self.layer(parent)
            .ok()?
            .children
            .iter()
            .position(|child| *child == key)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_depth > 0
    }

    /// Registers `listener` for events raised by `layer`.
    ///
    /// Takes `&self` so a reader holding the document read lock can subscribe.
    pub fn add_listener(
        &self,
        layer: NodeKey,
        listener: Sender<SceneEvent>,
    ) -> Result<(), SceneError> {
        self.layer(layer)?
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
        Ok(())
    }

    pub fn subscribe(&self, layer: NodeKey) -> Result<Receiver<SceneEvent>, SceneError> {
        let (sender, receiver) = unbounded();
        self.add_listener(layer, sender)?;
        Ok(receiver)
    }

    pub fn push_object(&mut self, layer: NodeKey, spec: NodeSpec) -> Result<NodeKey, SceneError> {
        let index = self.layer(layer)?.children.len();
        self.add_object(layer, index, spec)
    }

    /// Inserts a new node at `index` of `layer`; later indices paint on top.
    pub fn add_object(
        &mut self,
        layer: NodeKey,
        index: usize,
        spec: NodeSpec,
    ) -> Result<NodeKey, SceneError> {
        let len = self.layer(layer)?.children.len();
        if index > len {
            return Err(SceneError::IndexOutOfBounds { index, len });
        }
        if !spec.transform.is_finite() {
            return Err(SceneError::NonFiniteTransform);
        }
        let (kind, transform, area) = match spec.kind {
            SpecKind::Layer(style) => (
                NodeKind::Layer(LayerNode {
                    style: sanitize_style(style),
                    ..LayerNode::default()
                }),
                Transform::IDENTITY,
                Rect::EMPTY,
            ),
            SpecKind::Object(content) => {
                let area = object_area(&content, &spec.transform, self.bounds);
                (NodeKind::Object(content), spec.transform, area)
            }
        };
        let node = self.nodes.insert(SceneNode {
            parent: Some(layer),
            area,
            transform,
            paint: spec.paint,
            change_counter: 0,
            kind,
        });
        self.layer_mut(layer)?.children.insert(index, node);
        self.touch(node);
        self.refresh_layer_areas(layer);
        self.broadcast(layer, SceneEvent::ObjectAdded { layer, node, index });
        self.invalidate(layer, area, Some(index))?;
        Ok(node)
    }

    /// Removes the child at `index` of `layer` together with its subtree.
    ///
    /// Returns the key the removed node had; it no longer resolves afterwards.
    pub fn remove_object(&mut self, layer: NodeKey, index: usize) -> Result<NodeKey, SceneError> {
        let children = &self.layer(layer)?.children;
        let Some(node) = children.get(index).copied() else {
            return Err(SceneError::IndexOutOfBounds {
                index,
                len: children.len(),
            });
        };
        let area = self.nodes.get(node).map_or(Rect::EMPTY, SceneNode::area);
        self.layer_mut(layer)?.children.remove(index);
        self.remove_subtree(node);
        self.touch(layer);
        self.refresh_layer_areas(layer);
        self.broadcast(layer, SceneEvent::ObjectRemoved { layer, node, index });
        self.invalidate(layer, area, Some(index))?;
        Ok(node)
    }

    /// Reports `area` of `layer` as changed, originating from child `child_index`.
    ///
    /// Each layer on the way to the root notifies its own listeners with the index of
    /// the child the change came through. While updates are suspended the notices are
    /// merged per layer instead and sent once the outermost suspension ends.
    pub fn invalidate(
        &mut self,
        layer: NodeKey,
        area: Rect,
        child_index: Option<usize>,
    ) -> Result<(), SceneError> {
        self.layer(layer)?;
        if area.is_empty() {
            return Ok(());
        }
        let suspended = self.is_suspended();
        let mut current = layer;
        let mut index = child_index;
        loop {
            log::trace!("[document] invalidate {current:?} area {area:?} child {index:?}");
            let node = self
                .nodes
                .get_mut(current)
                .ok_or(SceneError::NodeNotFound)?;
            let parent = node.parent;
            let layer_node = node.as_layer_mut().ok_or(SceneError::NotALayer)?;
            if suspended {
                match &mut layer_node.pending {
                    Some(pending) => pending.merge(area, index),
                    None => {
                        layer_node.pending = Some(PendingInvalidation {
                            area,
                            child_index: index,
                        })
                    }
                }
            } else {
                send_to_listeners(
                    layer_node,
                    SceneEvent::AreaInvalidated {
                        layer: current,
                        area,
                        child_index: index,
                    },
                );
            }
            let Some(parent) = parent else {
                break;
            };
            index = self.index_in_parent(current);
            current = parent;
        }
        Ok(())
    }

    /// Counting gate: invalidations raised while suspended are batched per layer.
    pub fn suspend_updates(&mut self, suspend: bool) {
        if suspend {
            self.suspend_depth += 1;
            return;
        }
        if self.suspend_depth == 0 {
            log::warn!("[document] suspend_updates(false) without a matching suspension");
            return;
        }
        self.suspend_depth -= 1;
        if self.suspend_depth == 0 {
            self.flush_pending();
        }
    }

    pub fn set_transform(&mut self, key: NodeKey, transform: Transform) -> Result<(), SceneError> {
        if !transform.is_finite() {
            return Err(SceneError::NonFiniteTransform);
        }
        self.update_object(key, |node| {
            node.transform = transform;
            Ok(())
        })
    }

    pub fn set_paint(&mut self, key: NodeKey, paint: Paint) -> Result<(), SceneError> {
        self.update_object(key, |node| {
            node.paint = paint;
            Ok(())
        })
    }

    pub fn set_content(&mut self, key: NodeKey, content: Content) -> Result<(), SceneError> {
        self.update_object(key, |node| match &mut node.kind {
            NodeKind::Object(current) => {
                *current = content;
                Ok(())
            }
            NodeKind::Layer(_) => Err(SceneError::KindMismatch),
        })
    }

    pub fn set_layer_style(&mut self, key: NodeKey, style: LayerStyle) -> Result<(), SceneError> {
        let node = self.nodes.get_mut(key).ok_or(SceneError::NodeNotFound)?;
        let area = node.area;
        let parent = node.parent;
        node.as_layer_mut().ok_or(SceneError::NotALayer)?.style = sanitize_style(style);
        self.touch(key);
        match parent {
            Some(parent) => {
                let index = self.index_in_parent(key);
                self.invalidate(parent, area, index)
            }
            None => self.invalidate(key, area, None),
        }
    }

    fn update_object(
        &mut self,
        key: NodeKey,
        apply: impl FnOnce(&mut SceneNode) -> Result<(), SceneError>,
    ) -> Result<(), SceneError> {
        let bounds = self.bounds;
        let node = self.nodes.get_mut(key).ok_or(SceneError::NodeNotFound)?;
        if node.as_layer().is_some() {
            return Err(SceneError::KindMismatch);
        }
        let parent = node.parent.ok_or(SceneError::KindMismatch)?;
        let old_area = node.area;
        apply(node)?;
        if let NodeKind::Object(content) = &node.kind {
            node.area = object_area(content, &node.transform, bounds);
        }
        let changed_area = old_area.union(node.area);
        self.touch(key);
        self.refresh_layer_areas(parent);
        let index = self.index_in_parent(key);
        self.invalidate(parent, changed_area, index)
    }

    fn layer(&self, key: NodeKey) -> Result<&LayerNode, SceneError> {
        self.nodes
            .get(key)
            .ok_or(SceneError::NodeNotFound)?
            .as_layer()
            .ok_or(SceneError::NotALayer)
    }

    fn layer_mut(&mut self, key: NodeKey) -> Result<&mut LayerNode, SceneError> {
        self.nodes
            .get_mut(key)
            .ok_or(SceneError::NodeNotFound)?
            .as_layer_mut()
            .ok_or(SceneError::NotALayer)
    }

    // Stamps `key` and all its ancestors with a fresh change counter.
    fn touch(&mut self, key: NodeKey) {
        self.change_clock = self.change_clock.saturating_add(1);
        let stamp = self.change_clock;
        let mut current = Some(key);
        while let Some(node_key) = current {
            let Some(node) = self.nodes.get_mut(node_key) else {
                break;
            };
            node.change_counter = stamp;
            current = node.parent;
        }
    }

    fn refresh_layer_areas(&mut self, from: NodeKey) {
        let mut current = Some(from);
        while let Some(layer_key) = current {
            let Ok(layer) = self.layer(layer_key) else {
                break;
            };
            let area = layer
                .children
                .iter()
                .filter_map(|child| self.nodes.get(*child))
                .fold(Rect::EMPTY, |area, child| area.union(child.area));
            let Some(node) = self.nodes.get_mut(layer_key) else {
                break;
            };
            if node.area == area {
                break;
            }
            node.area = area;
            current = node.parent;
        }
    }

    fn remove_subtree(&mut self, key: NodeKey) {
        let mut stack: SmallVec<[NodeKey; 16]> = SmallVec::new();
        stack.push(key);
        while let Some(next) = stack.pop() {
            if let Some(SceneNode {
                kind: NodeKind::Layer(layer),
                ..
            }) = self.nodes.remove(next)
            {
                stack.extend(layer.children);
            }
        }
    }

    fn broadcast(&mut self, layer: NodeKey, event: SceneEvent) {
        if let Ok(layer_node) = self.layer_mut(layer) {
            send_to_listeners(layer_node, event);
        }
    }

    fn flush_pending(&mut self) {
        for (key, node) in self.nodes.iter_mut() {
            let Some(layer) = node.as_layer_mut() else {
                continue;
            };
            if let Some(pending) = layer.pending.take() {
                send_to_listeners(
                    layer,
                    SceneEvent::AreaInvalidated {
                        layer: key,
                        area: pending.area,
                        child_index: pending.child_index,
                    },
                );
            }
        }
    }
}

fn send_to_listeners(layer: &mut LayerNode, event: SceneEvent) {
    let listeners = layer
        .listeners
        .get_mut()
        .unwrap_or_else(PoisonError::into_inner);
    listeners.retain(|listener| listener.send(event).is_ok());
}

fn sanitize_style(style: LayerStyle) -> LayerStyle {
    LayerStyle {
        opacity: render_protocol::clamp_unit(style.opacity),
        blend: style.blend,
    }
}
