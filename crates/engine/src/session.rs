//! Per-job engine session construction and scoping.

use std::time::Duration;

use datafusion::prelude::{SessionConfig, SessionContext};

use vantage_core::WorkspaceId;

/// Tenant scope of one query session: the caller's permitted workspaces and
/// the execution deadline the attached source should honor.
#[derive(Debug, Clone)]
pub struct SessionScope {
    pub allowed_workspace_ids: Vec<WorkspaceId>,
    pub statement_timeout: Duration,
}

impl SessionScope {
    pub fn new(allowed_workspace_ids: Vec<WorkspaceId>, statement_timeout: Duration) -> Self {
        Self {
            allowed_workspace_ids,
            statement_timeout,
        }
    }

    /// Comma-joined form used as the session-level visibility parameter.
    pub fn joined_workspace_ids(&self) -> String {
        self.allowed_workspace_ids
            .iter()
            .map(WorkspaceId::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Build a fresh, single-use engine session.
///
/// The embedded engine's session is not safe for concurrent use from
/// multiple executions; callers get a new one per invocation.
pub fn build_session(batch_size: usize) -> SessionContext {
    let config = SessionConfig::new().with_batch_size(batch_size.max(1));
    SessionContext::new_with_config(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_ids_join_in_order() {
        let scope = SessionScope::new(
            vec!["w1".parse().unwrap(), "w2".parse().unwrap()],
            Duration::from_secs(60),
        );
        assert_eq!(scope.joined_workspace_ids(), "w1,w2");
    }
}
