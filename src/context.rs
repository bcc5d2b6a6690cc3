//! Request-scoped execution context: scope caches, identity, storage
//! location, fault-injection switches, and the deferred-save set.
//!
//! A collaborator builds a [`PrefsContext`] and either passes it around
//! explicitly or binds it to the current thread for the duration of one
//! execution unit. All preference operations that touch storage go through
//! context methods; nothing consults the thread binding implicitly.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::store;
use crate::tree::{PrefTree, RootKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContextError {
    #[error("no preferences context is bound to the current thread")]
    NotBound,
}

/// Scope-level tree cache, shared between every context of one scope.
///
/// The application scope holds the System tree for the process lifetime;
/// a per-session scope holds the User tree for that session's lifetime.
/// Clones alias the same map.
#[derive(Clone, Default)]
pub struct ScopeMap(Arc<Mutex<BTreeMap<String, PrefTree>>>);

impl ScopeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<PrefTree> {
        self.0
            .lock()
            .expect("scope map lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: impl Into<String>, tree: PrefTree) {
        self.0
            .lock()
            .expect("scope map lock poisoned")
            .insert(key.into(), tree);
    }

    pub fn remove(&self, key: &str) -> Option<PrefTree> {
        self.0.lock().expect("scope map lock poisoned").remove(key)
    }
}

#[derive(Debug)]
struct CtxState {
    readable: bool,
    writable: bool,
    pending: BTreeSet<RootKind>,
}

/// Context for one execution unit (request/thread).
///
/// Cloning is cheap; clones share the scope caches, the fault switches and
/// the pending-save set.
#[derive(Clone)]
pub struct PrefsContext {
    scope_app: ScopeMap,
    scope_user: ScopeMap,
    store_path: Option<PathBuf>,
    seed_path: Option<PathBuf>,
    user: Option<String>,
    state: Arc<Mutex<CtxState>>,
}

impl PrefsContext {
    pub fn new(scope_app: ScopeMap, scope_user: ScopeMap) -> Self {
        PrefsContext {
            scope_app,
            scope_user,
            store_path: None,
            seed_path: None,
            user: None,
            state: Arc::new(Mutex::new(CtxState {
                readable: true,
                writable: true,
                pending: BTreeSet::new(),
            })),
        }
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_seed_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed_path = Some(path.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    pub fn seed_path(&self) -> Option<&Path> {
        self.seed_path.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CtxState> {
        self.state.lock().expect("context state lock poisoned")
    }

    pub fn readable(&self) -> bool {
        self.state().readable
    }

    pub fn writable(&self) -> bool {
        self.state().writable
    }

    /// Fault-injection switch: pretend the backing store cannot be read.
    /// Affects only future load attempts, never already-loaded trees.
    pub fn set_readable(&self, readable: bool) {
        self.state().readable = readable;
    }

    /// Fault-injection switch: pretend the backing store cannot be written.
    pub fn set_writable(&self, writable: bool) {
        self.state().writable = writable;
    }

    /// Record that `kind` has unsaved in-memory changes. Idempotent.
    pub fn mark_dirty(&self, kind: RootKind) {
        self.state().pending.insert(kind);
    }

    pub fn is_dirty(&self, kind: RootKind) -> bool {
        self.state().pending.contains(&kind)
    }

    /// Root kinds with changes awaiting a persist call.
    pub fn pending(&self) -> Vec<RootKind> {
        self.state().pending.iter().copied().collect()
    }

    fn scope_for(&self, kind: RootKind) -> (&ScopeMap, String) {
        match kind {
            RootKind::System => (&self.scope_app, RootKind::System.as_str().to_string()),
            RootKind::User => (&self.scope_user, self.user.clone().unwrap_or_default()),
        }
    }

    /// The system-wide tree, imported from its backing file on the first
    /// cache miss.
    pub fn system_tree(&self) -> crate::Result<PrefTree> {
        self.tree(RootKind::System)
    }

    /// The current user's tree, imported from its backing file on the
    /// first cache miss.
    pub fn user_tree(&self) -> crate::Result<PrefTree> {
        self.tree(RootKind::User)
    }

    fn tree(&self, kind: RootKind) -> crate::Result<PrefTree> {
        let (scope, key) = self.scope_for(kind);
        if let Some(tree) = scope.get(&key) {
            return Ok(tree);
        }
        let tree = match store::load_root(kind, self) {
            Ok(tree) => tree,
            Err(err) if err.is_corrupt() => {
                tracing::warn!(kind = %kind, error = %err, "starting from an empty tree");
                PrefTree::empty(kind)
            }
            Err(err) => return Err(err.into()),
        };
        scope.insert(key, tree.clone());
        Ok(tree)
    }

    /// Write every dirty root's cached tree to its backing file.
    ///
    /// Flags are cleared per kind, after that kind's save succeeds; a
    /// failed save surfaces its error and leaves the kind dirty. Calling
    /// with nothing pending is a no-op and safe to repeat.
    pub fn persist_pending(&self) -> crate::Result<()> {
        let pending = self.pending();
        for kind in pending {
            let (scope, key) = self.scope_for(kind);
            match scope.get(&key) {
                Some(tree) => store::save_root(&tree, self)?,
                None => {
                    tracing::debug!(kind = %kind, "dirty root has no cached tree, nothing to persist");
                }
            }
            self.state().pending.remove(&kind);
        }
        Ok(())
    }

    /// Discard the cached tree for `kind` and reload it from disk.
    ///
    /// A no-op while `kind` has pending unsaved changes, so unflushed
    /// writes are never lost. The cache entry is replaced only after a
    /// successful load.
    pub fn force_reload(&self, kind: RootKind) -> crate::Result<()> {
        if self.is_dirty(kind) {
            return Ok(());
        }
        let tree = store::load_root(kind, self)?;
        let (scope, key) = self.scope_for(kind);
        scope.insert(key, tree);
        Ok(())
    }
}

impl std::fmt::Debug for PrefsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("PrefsContext")
            .field("store_path", &self.store_path)
            .field("seed_path", &self.seed_path)
            .field("user", &self.user)
            .field("readable", &state.readable)
            .field("writable", &state.writable)
            .field("pending", &state.pending)
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<PrefsContext>> = const { RefCell::new(None) };
}

/// Bind `ctx` to the current thread, replacing any previous binding.
pub fn bind(ctx: PrefsContext) {
    CURRENT.with(|current| *current.borrow_mut() = Some(ctx));
}

/// Drop the current thread's binding, returning it if one was set.
pub fn unbind() -> Option<PrefsContext> {
    CURRENT.with(|current| current.borrow_mut().take())
}

/// The context bound to the current thread.
pub fn current() -> Result<PrefsContext, ContextError> {
    CURRENT
        .with(|current| current.borrow().clone())
        .ok_or(ContextError::NotBound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PrefsContext {
        PrefsContext::new(ScopeMap::new(), ScopeMap::new())
    }

    #[test]
    fn current_fails_when_nothing_is_bound() {
        unbind();
        assert_eq!(current().expect_err("no binding"), ContextError::NotBound);
    }

    #[test]
    fn bind_then_current_then_unbind() {
        bind(ctx().with_user("u1"));
        assert_eq!(current().expect("bound").user(), Some("u1"));
        // Rebinding replaces the previous binding without error.
        bind(ctx().with_user("u2"));
        assert_eq!(current().expect("bound").user(), Some("u2"));
        assert!(unbind().is_some());
        assert!(current().is_err());
    }

    #[test]
    fn mark_dirty_is_idempotent() {
        let ctx = ctx();
        assert!(!ctx.is_dirty(RootKind::User));
        ctx.mark_dirty(RootKind::User);
        ctx.mark_dirty(RootKind::User);
        assert!(ctx.is_dirty(RootKind::User));
        assert_eq!(ctx.pending(), vec![RootKind::User]);
    }

    #[test]
    fn fault_switches_default_on_and_toggle() {
        let ctx = ctx();
        assert!(ctx.readable());
        assert!(ctx.writable());
        ctx.set_readable(false);
        ctx.set_writable(false);
        assert!(!ctx.readable());
        assert!(!ctx.writable());
    }

    #[test]
    fn clones_share_state() {
        let a = ctx();
        let b = a.clone();
        a.mark_dirty(RootKind::System);
        a.set_writable(false);
        assert!(b.is_dirty(RootKind::System));
        assert!(!b.writable());
    }

    #[test]
    fn scope_map_last_insert_wins() {
        let scope = ScopeMap::new();
        scope.insert("system", PrefTree::empty(RootKind::System));
        let replacement = PrefTree::empty(RootKind::System);
        replacement.root().put("k", "v").expect("put");
        scope.insert("system", replacement);
        let cached = scope.get("system").expect("cached");
        assert_eq!(
            cached.root().get("k").expect("get"),
            Some("v".to_string())
        );
    }
}
