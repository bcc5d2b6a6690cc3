//! Hierarchical, file-backed preference trees.
//!
//! One XML document per root: a system-wide tree and one tree per user,
//! cached in collaborator-owned scopes, imported lazily and written back
//! on request through a request-scoped [`PrefsContext`]. In-memory
//! operations never touch disk; persistence is whole-tree, atomic, and
//! serialized process-wide.

#![forbid(unsafe_code)]

pub mod config;
mod context;
mod error;
mod paths;
mod store;
mod tree;

pub use config::{Config, ConfigError};
pub use context::{bind, current, unbind, ContextError, PrefsContext, ScopeMap};
pub use error::{Error, Transience};
pub use store::{StoreError, StoreOp};
pub use tree::{PrefNode, PrefTree, RootKind, TreeError};

pub type Result<T> = std::result::Result<T, Error>;
