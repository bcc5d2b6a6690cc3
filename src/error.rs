use thiserror::Error;

use crate::config::ConfigError;
use crate::context::ContextError;
use crate::store::StoreError;
use crate::tree::TreeError;

/// Whether retrying this operation may succeed. The library itself never
/// retries; this only informs the caller's policy.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient disk fault).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error: a thin wrapper over the capability
/// errors, not a replacement for them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            // Tree and context errors are pure programming/state errors.
            Error::Tree(_) | Error::Context(_) => Transience::Permanent,
            Error::Store(err) => match err {
                // A disabled switch or a bad document stays bad until
                // something else changes.
                StoreError::AccessDisabled { .. }
                | StoreError::Corrupt { .. }
                | StoreError::Render { .. } => Transience::Permanent,
                StoreError::Io { .. } => Transience::Retryable,
            },
            Error::Config(_) => Transience::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_errors_are_permanent() {
        let err = Error::from(ContextError::NotBound);
        assert_eq!(err.transience(), Transience::Permanent);
        assert!(!err.transience().is_retryable());
    }

    #[test]
    fn disk_faults_are_retryable() {
        let err = Error::from(StoreError::Io {
            kind: crate::RootKind::User,
            op: crate::StoreOp::Save,
            path: "/x".into(),
            source: std::io::Error::other("disk"),
        });
        assert!(err.transience().is_retryable());
    }
}
