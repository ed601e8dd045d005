//! Request/response DTOs for the query routes.

use serde::{Deserialize, Serialize};

use vantage_core::{job, DomainError, DomainResult, QueryId, WorkspaceId};

/// `allowed_workspace_ids` arrives either as an explicit list or as a single
/// comma-delimited string; both normalize to the same list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WorkspaceIds {
    List(Vec<String>),
    Delimited(String),
}

#[derive(Debug, Deserialize)]
pub struct CreateQueryRequest {
    pub allowed_workspace_ids: WorkspaceIds,
    pub query_content: String,
    pub batch_size: Option<usize>,
    pub timeout_seconds: Option<u64>,
}

impl CreateQueryRequest {
    pub fn normalized_workspace_ids(&self) -> DomainResult<Vec<WorkspaceId>> {
        match &self.allowed_workspace_ids {
            WorkspaceIds::Delimited(raw) => job::parse_workspace_list(raw),
            WorkspaceIds::List(items) => {
                let ids: Vec<WorkspaceId> = items
                    .iter()
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| s.parse())
                    .collect::<DomainResult<_>>()?;
                if ids.is_empty() {
                    return Err(DomainError::invalid_field(
                        "allowed_workspace_ids",
                        "must contain at least one workspace",
                    ));
                }
                Ok(ids)
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateQueryResponse {
    pub query_id: QueryId,
}

#[derive(Debug, Serialize)]
pub struct GetQueryResponse {
    pub query_id: QueryId,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CancelQueryResponse {
    pub query_id: QueryId,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_and_delimited_forms_normalize_identically() {
        let list = CreateQueryRequest {
            allowed_workspace_ids: WorkspaceIds::List(vec!["w1".into(), "w2".into()]),
            query_content: "SELECT 1".into(),
            batch_size: None,
            timeout_seconds: None,
        };
        let delimited = CreateQueryRequest {
            allowed_workspace_ids: WorkspaceIds::Delimited("w1, w2".into()),
            query_content: "SELECT 1".into(),
            batch_size: None,
            timeout_seconds: None,
        };

        assert_eq!(
            list.normalized_workspace_ids().unwrap(),
            delimited.normalized_workspace_ids().unwrap()
        );
    }

    #[test]
    fn empty_workspace_set_is_rejected() {
        let request = CreateQueryRequest {
            allowed_workspace_ids: WorkspaceIds::List(vec![]),
            query_content: "SELECT 1".into(),
            batch_size: None,
            timeout_seconds: None,
        };
        assert!(request.normalized_workspace_ids().is_err());
    }
}
