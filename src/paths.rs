//! Store-file location helpers. Pure path math, no I/O.

use std::path::{Path, PathBuf};

use crate::tree::RootKind;

pub(crate) const FILE_PREFIX: &str = "prefstore";
pub(crate) const FILE_EXT: &str = "xml";
pub(crate) const STORE_DIR_NAME: &str = "prefs-store";

/// Directory holding the store documents: `<base>/prefs-store`, falling
/// back to the process temp directory when no base path is configured.
pub(crate) fn store_dir(base: Option<&Path>) -> PathBuf {
    base.map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir)
        .join(STORE_DIR_NAME)
}

/// File name for one (root kind, user) pair. The user suffix applies to
/// the User root only, and only when an identity is present.
pub(crate) fn store_file_name(kind: RootKind, user: Option<&str>) -> String {
    match (kind, user) {
        (RootKind::User, Some(user)) => {
            format!("{FILE_PREFIX}-{}-{user}.{FILE_EXT}", kind.as_str())
        }
        _ => format!("{FILE_PREFIX}-{}.{FILE_EXT}", kind.as_str()),
    }
}

/// Full path of the backing document for one (root kind, user) pair.
pub(crate) fn store_file(kind: RootKind, user: Option<&str>, base: Option<&Path>) -> PathBuf {
    store_dir(base).join(store_file_name(kind, user))
}

/// Seed document carrying an initial tree, looked up by the same file name
/// under the configured seed directory.
pub(crate) fn seed_file(kind: RootKind, user: Option<&str>, seed_dir: &Path) -> PathBuf {
    seed_dir.join(store_file_name(kind, user))
}
