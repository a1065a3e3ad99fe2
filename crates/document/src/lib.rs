//! Live scene graph of a drawing document.
//!
//! The whole tree sits behind one reader/writer lock owned by [`Document`]. Every
//! mutator lives on [`SceneTree`] and takes `&mut self`, so it can only be reached
//! through [`Document::write`]. Layers notify listeners over crossbeam channels.

mod node;
mod tree;

#[cfg(test)]
mod tests;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use model::Rect;

pub use node::{Content, LayerNode, LayerStyle, NodeKind, NodeSpec, SceneNode};
pub use render_protocol::NodeKey;
pub use tree::SceneTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    #[error("node not found")]
    NodeNotFound,
    #[error("node is not a layer")]
    NotALayer,
    #[error("index {index} out of bounds for layer with {len} children")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("operation does not apply to this node kind")]
    KindMismatch,
    #[error("transform contains non-finite values")]
    NonFiniteTransform,
}

/// Owns the root layer and the lock guarding the entire tree.
pub struct Document {
    tree: RwLock<SceneTree>,
    bounds: Rect,
}

impl Document {
    pub fn new(width: u32, height: u32) -> Self {
        let bounds = Rect::new(
            0,
            0,
            i32::try_from(width).unwrap_or(i32::MAX),
            i32::try_from(height).unwrap_or(i32::MAX),
        );
        Self {
            tree: RwLock::new(SceneTree::new(bounds)),
            bounds,
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SceneTree> {
        self.tree.read().unwrap_or_else(|poisoned| {
            log::error!("[document] read lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SceneTree> {
        self.tree.write().unwrap_or_else(|poisoned| {
            log::error!("[document] write lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
