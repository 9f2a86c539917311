//! # Session Module
//!
//! The minimal surface the evaluator needs from a caller's session and from
//! the domain objects it authorises access to.

use tokio_util::sync::CancellationToken;

/// An already-resolved session: identity, role membership, and the
/// cancellation scope its checks run under.
pub trait Session: Send + Sync {
    fn identity(&self) -> u64;
    fn roles(&self) -> &[u64];

    /// The session's cancellation scope, forwarded to the one storage call a
    /// check can make (the unindexed-role fetch). Cancelling it cancels only
    /// this session's in-flight checks.
    fn context(&self) -> CancellationToken;
}

/// Anything that can name itself as an RBAC resource path.
pub trait RbacResource {
    fn rbac_resource(&self) -> String;
}

/// A plain in-memory [`Session`], useful for tests and simple callers that
/// have already resolved role membership elsewhere.
#[derive(Debug, Clone)]
pub struct BasicSession {
    identity: u64,
    roles: Vec<u64>,
    context: CancellationToken,
}

impl BasicSession {
    /// Builds a session with a fresh, never-cancelled scope. Use
    /// [`BasicSession::with_context`] to share or pre-cancel one.
    pub fn new(identity: u64, roles: Vec<u64>) -> Self {
        BasicSession {
            identity,
            roles,
            context: CancellationToken::new(),
        }
    }

    pub fn with_context(mut self, context: CancellationToken) -> Self {
        self.context = context;
        self
    }
}

impl Session for BasicSession {
    fn identity(&self) -> u64 {
        self.identity
    }

    fn roles(&self) -> &[u64] {
        &self.roles
    }

    fn context(&self) -> CancellationToken {
        self.context.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_session_exposes_identity_and_roles() {
        let ses = BasicSession::new(7, vec![1, 2]);
        assert_eq!(ses.identity(), 7);
        assert_eq!(ses.roles(), &[1, 2]);
        assert!(!ses.context().is_cancelled());
    }

    #[test]
    fn with_context_carries_a_pre_cancelled_scope() {
        let token = CancellationToken::new();
        token.cancel();
        let ses = BasicSession::new(1, vec![1]).with_context(token);
        assert!(ses.context().is_cancelled());
    }
}
