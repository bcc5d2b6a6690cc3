//! Disk persistence for preference trees.
//!
//! Persistence is whole-tree: a save replaces the backing document
//! entirely, a load materializes the full tree at once. Every save in the
//! process runs under one lock, not one lock per file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::context::PrefsContext;
use crate::paths;
use crate::tree::{PrefTree, RootKind};

mod xml;

static SAVE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Load,
    Save,
}

impl StoreOp {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreOp::Load => "load",
            StoreOp::Save => "save",
        }
    }
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("{op} access to the {kind} preference store is disabled")]
    AccessDisabled { kind: RootKind, op: StoreOp },
    #[error("{op} failed for the {kind} preference store at {path:?}: {source}")]
    Io {
        kind: RootKind,
        op: StoreOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("the {kind} preference store at {path:?} is corrupt: {reason}")]
    Corrupt {
        kind: RootKind,
        path: PathBuf,
        reason: String,
    },
    #[error("failed to render the {kind} preference tree: {reason}")]
    Render { kind: RootKind, reason: String },
}

impl StoreError {
    /// Storage could not be reached or used at all: access disabled, a
    /// disk fault, or a failed render. The counterpart of
    /// [`StoreError::is_corrupt`].
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::AccessDisabled { .. } | StoreError::Io { .. } | StoreError::Render { .. }
        )
    }

    /// Storage was reachable but its document could not be understood.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}

/// Load the tree for `kind` from its backing file.
///
/// A missing file is not an error: the configured seed document is used
/// when present, otherwise the tree starts empty.
pub(crate) fn load_root(kind: RootKind, ctx: &PrefsContext) -> Result<PrefTree, StoreError> {
    if !ctx.readable() {
        return Err(StoreError::AccessDisabled {
            kind,
            op: StoreOp::Load,
        });
    }

    let path = paths::store_file(kind, ctx.user(), ctx.store_path());
    let doc_path = if path.exists() {
        Some(path)
    } else {
        seed_document(kind, ctx)
    };
    let Some(doc_path) = doc_path else {
        return Ok(PrefTree::empty(kind));
    };

    let doc = fs::read_to_string(&doc_path).map_err(|source| StoreError::Io {
        kind,
        op: StoreOp::Load,
        path: doc_path.clone(),
        source,
    })?;
    xml::import(kind, &doc).map_err(|err| StoreError::Corrupt {
        kind,
        path: doc_path,
        reason: err.to_string(),
    })
}

fn seed_document(kind: RootKind, ctx: &PrefsContext) -> Option<PathBuf> {
    let seed = paths::seed_file(kind, ctx.user(), ctx.seed_path()?);
    if seed.exists() {
        tracing::debug!(kind = %kind, seed = %seed.display(), "populating tree from seed document");
        Some(seed)
    } else {
        None
    }
}

/// Write the whole tree to its backing file, replacing prior content.
pub(crate) fn save_root(tree: &PrefTree, ctx: &PrefsContext) -> Result<(), StoreError> {
    let kind = tree.kind();
    if !ctx.writable() {
        return Err(StoreError::AccessDisabled {
            kind,
            op: StoreOp::Save,
        });
    }

    let document = xml::export(tree).map_err(|err| StoreError::Render {
        kind,
        reason: err.to_string(),
    })?;

    let path = paths::store_file(kind, ctx.user(), ctx.store_path());
    let io_err = |source: io::Error| StoreError::Io {
        kind,
        op: StoreOp::Save,
        path: path.clone(),
        source,
    };

    // One lock for every save in the process; a poisoned lock still
    // serializes correctly.
    let _guard = SAVE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    atomic_write(&path, &document).map_err(io_err)
}

fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "store path has no parent"))?;
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    fs::write(temp.path(), data)?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
