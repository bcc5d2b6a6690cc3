//! In-memory preference trees: named nodes holding string key/value pairs.
//!
//! All operations here are pure memory mutations; persistence works on a
//! whole tree at once and lives in the store module.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use thiserror::Error;

use crate::context::PrefsContext;

/// Which of the two top-level trees a node belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RootKind {
    System,
    User,
}

impl RootKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RootKind::System => "system",
            RootKind::User => "user",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "system" => Some(RootKind::System),
            "user" => Some(RootKind::User),
            _ => None,
        }
    }
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tree mutation errors. Memory operations cannot fail any other way.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
    #[error("preference node `{name}` was removed from its tree")]
    NodeRemoved { name: String },
    #[error("the root preference node cannot remove itself")]
    CannotRemoveRoot,
}

struct NodeInner {
    kind: RootKind,
    name: String,
    values: BTreeMap<String, String>,
    children: BTreeMap<String, PrefNode>,
    /// Structural back-edge only; never an ownership edge.
    parent: Option<Weak<RwLock<NodeInner>>>,
    removed: bool,
}

/// Handle to one node of a preference tree.
///
/// Cloning is cheap and clones alias the same node. A node detached via
/// [`PrefNode::remove_node`] is permanently unusable: every further
/// operation on it (or on anything below it) fails with
/// [`TreeError::NodeRemoved`].
#[derive(Clone)]
pub struct PrefNode(Arc<RwLock<NodeInner>>);

impl PrefNode {
    fn new_root(kind: RootKind) -> Self {
        PrefNode(Arc::new(RwLock::new(NodeInner {
            kind,
            name: String::new(),
            values: BTreeMap::new(),
            children: BTreeMap::new(),
            parent: None,
            removed: false,
        })))
    }

    fn read(&self) -> RwLockReadGuard<'_, NodeInner> {
        self.0.read().expect("pref node lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, NodeInner> {
        self.0.write().expect("pref node lock poisoned")
    }

    fn removed_err(inner: &NodeInner) -> TreeError {
        TreeError::NodeRemoved {
            name: inner.name.clone(),
        }
    }

    /// Node name; empty for a tree root.
    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    /// Look up a value. No side effects, no disk I/O.
    pub fn get(&self, key: &str) -> Result<Option<String>, TreeError> {
        let inner = self.read();
        if inner.removed {
            return Err(Self::removed_err(&inner));
        }
        Ok(inner.values.get(key).cloned())
    }

    /// Insert or overwrite a value. Memory only; nothing is written to
    /// disk until the owning root is flushed and persisted.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), TreeError> {
        let mut inner = self.write();
        if inner.removed {
            return Err(Self::removed_err(&inner));
        }
        inner.values.insert(key.into(), value.into());
        Ok(())
    }

    /// Delete a value if present; absent keys are not an error.
    pub fn remove(&self, key: &str) -> Result<(), TreeError> {
        let mut inner = self.write();
        if inner.removed {
            return Err(Self::removed_err(&inner));
        }
        inner.values.remove(key);
        Ok(())
    }

    /// Return the named child, creating an empty one if absent.
    pub fn child(&self, name: &str) -> Result<PrefNode, TreeError> {
        let mut inner = self.write();
        if inner.removed {
            return Err(Self::removed_err(&inner));
        }
        if let Some(existing) = inner.children.get(name) {
            return Ok(existing.clone());
        }
        let child = PrefNode(Arc::new(RwLock::new(NodeInner {
            kind: inner.kind,
            name: name.to_string(),
            values: BTreeMap::new(),
            children: BTreeMap::new(),
            parent: Some(Arc::downgrade(&self.0)),
            removed: false,
        })));
        inner.children.insert(name.to_string(), child.clone());
        Ok(child)
    }

    /// Detach this node from its parent. The node and its whole subtree
    /// become permanently unusable; re-creating the same name under the
    /// parent yields a fresh, empty node.
    pub fn remove_node(&self) -> Result<(), TreeError> {
        let (parent, name) = {
            let inner = self.read();
            if inner.removed {
                return Err(Self::removed_err(&inner));
            }
            match &inner.parent {
                None => return Err(TreeError::CannotRemoveRoot),
                Some(weak) => (weak.upgrade(), inner.name.clone()),
            }
        };
        if let Some(parent) = parent {
            parent
                .write()
                .expect("pref node lock poisoned")
                .children
                .remove(&name);
        }
        self.mark_removed();
        Ok(())
    }

    fn mark_removed(&self) {
        let children: Vec<PrefNode> = {
            let mut inner = self.write();
            inner.removed = true;
            inner.children.values().cloned().collect()
        };
        for child in children {
            child.mark_removed();
        }
    }

    /// Snapshot of the current key set, order unspecified.
    pub fn keys(&self) -> Result<Vec<String>, TreeError> {
        let inner = self.read();
        if inner.removed {
            return Err(Self::removed_err(&inner));
        }
        Ok(inner.values.keys().cloned().collect())
    }

    /// Snapshot of the current key/value pairs.
    pub fn entries(&self) -> Result<Vec<(String, String)>, TreeError> {
        let inner = self.read();
        if inner.removed {
            return Err(Self::removed_err(&inner));
        }
        Ok(inner
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Snapshot of the current child names, order unspecified.
    pub fn child_names(&self) -> Result<Vec<String>, TreeError> {
        let inner = self.read();
        if inner.removed {
            return Err(Self::removed_err(&inner));
        }
        Ok(inner.children.keys().cloned().collect())
    }

    pub fn has_child(&self, name: &str) -> Result<bool, TreeError> {
        let inner = self.read();
        if inner.removed {
            return Err(Self::removed_err(&inner));
        }
        Ok(inner.children.contains_key(name))
    }

    /// Root kind of the tree this node belongs to.
    pub fn root_kind(&self) -> Result<RootKind, TreeError> {
        let inner = self.read();
        if inner.removed {
            return Err(Self::removed_err(&inner));
        }
        Ok(inner.kind)
    }

    /// Request that the owning root's accumulated changes be written out:
    /// marks the root kind dirty in the context. The actual write happens
    /// when the context persists its pending roots.
    pub fn flush(&self, ctx: &PrefsContext) -> Result<(), TreeError> {
        let kind = self.root_kind()?;
        ctx.mark_dirty(kind);
        Ok(())
    }
}

impl fmt::Debug for PrefNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("PrefNode")
            .field("kind", &inner.kind)
            .field("name", &inner.name)
            .field("values", &inner.values.len())
            .field("children", &inner.children.len())
            .field("removed", &inner.removed)
            .finish()
    }
}

/// One whole preference tree: an unnamed root node plus its kind.
///
/// Created on the first scope-cache miss for its (kind, user) pair and
/// imported from the backing file exactly once, at creation. Lives as long
/// as the scope cache references it; it is not a per-request object.
#[derive(Clone, Debug)]
pub struct PrefTree {
    kind: RootKind,
    root: PrefNode,
}

impl PrefTree {
    pub fn empty(kind: RootKind) -> Self {
        PrefTree {
            kind,
            root: PrefNode::new_root(kind),
        }
    }

    pub fn kind(&self) -> RootKind {
        self.kind
    }

    pub fn root(&self) -> PrefNode {
        self.root.clone()
    }
}
