//! Web session seam.

use std::sync::atomic::{AtomicBool, Ordering};

/// The web session that owns orphaned files.
///
/// Only the identifier and whether the session is running are needed; how
/// sessions are created and persisted is up to the host application.
pub trait WebSession: Send + Sync {
    /// Opaque session identifier.
    fn id(&self) -> String;

    /// Whether the session has been started and not yet closed.
    fn is_active(&self) -> bool;
}

/// A session with a fixed identifier, for tools and tests.
#[derive(Debug)]
pub struct StaticSession {
    id: String,
    active: AtomicBool,
}

impl StaticSession {
    /// A session that is already running.
    pub fn active(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active: AtomicBool::new(true),
        }
    }

    /// A session that has not been started.
    pub fn inactive(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl WebSession for StaticSession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_session_lifecycle() {
        let session = StaticSession::inactive("web-1");
        assert!(!session.is_active());
        session.start();
        assert!(session.is_active());
        assert_eq!(session.id(), "web-1");
        session.close();
        assert!(!session.is_active());
    }
}
