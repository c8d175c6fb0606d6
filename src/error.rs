//! Error types for the dual-tree task queue.
//!
//! The queue itself reports by return value: a failed dequeue is `None`,
//! a rejected duplicate task is `false`. Errors exist for the exchange
//! surface, where transient transport failures and programmer invariant
//! violations must be distinguishable:
//!
//! - transient failures (`RouteFailed`, `PeerUnreachable`) leave queue
//!   state untouched; the caller retries on the next exchange round
//! - invariant violations (`CacheUnderflow`, `StaleLock`) abort in debug
//!   builds and are reported in release

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Exchange cache ===
    /// A cache block was released more times than it was locked.
    CacheUnderflow,
    /// A cache block id does not name a live cache entry.
    UnknownCacheBlock,

    // === Transport ===
    /// A routed message could not be delivered this round.
    RouteFailed,
    /// The peer did not respond to an exchange round.
    PeerUnreachable,
    /// The exchange layer was not ready to send or receive.
    NotReady,

    // === Queue handles ===
    /// A lock id does not name a live checked-out record.
    StaleLock,
    /// A slot index is out of range for the current slot vector.
    SlotOutOfRange,
}

/// The error type for queue and exchange operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if the error is transient and the operation may be
    /// retried on the next exchange round.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RouteFailed | ErrorKind::PeerUnreachable | ErrorKind::NotReady
        )
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(context) = &self.context {
            write!(f, ": {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Result alias for queue and exchange operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::new(ErrorKind::RouteFailed).is_transient());
        assert!(Error::new(ErrorKind::NotReady).is_transient());
        assert!(!Error::new(ErrorKind::CacheUnderflow).is_transient());
        assert!(!Error::new(ErrorKind::StaleLock).is_transient());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::UnknownCacheBlock).with_context("cache id c7");
        assert_eq!(err.to_string(), "UnknownCacheBlock: cache id c7");
    }
}
