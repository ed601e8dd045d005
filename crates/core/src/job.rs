//! The job model: actions multiplexed through the ingress channel, and the
//! decoding/validation of raw stream entries into well-formed jobs.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{QueryId, WorkspaceId};

/// Control-plane actions multiplexed through the same ingress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Query,
    Cancel,
    Stop,
}

impl FromStr for JobAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(JobAction::Query),
            "cancel" => Ok(JobAction::Cancel),
            "stop" => Ok(JobAction::Stop),
            other => Err(DomainError::invalid_field(
                "action",
                format!("unknown action: {other}"),
            )),
        }
    }
}

/// A well-formed unit of query work.
///
/// Invariant: a `QueryJob` always carries a non-empty `query_id`, a non-empty
/// permitted workspace set, and non-empty query text — malformed requests are
/// rejected at decode time and never reach the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryJob {
    pub query_id: QueryId,
    pub allowed_workspace_ids: Vec<WorkspaceId>,
    pub query: String,
    pub batch_size: Option<usize>,
    pub timeout_seconds: Option<u64>,
}

/// A decoded ingress request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    Query(QueryJob),
    Cancel { query_id: QueryId },
    Stop,
}

impl JobRequest {
    /// Decode a raw stream entry (field → value map) into a request.
    ///
    /// `allowed_workspace_ids` arrives as a single comma-delimited string and
    /// is normalized to a list; empty segments are dropped.
    pub fn from_fields(fields: &HashMap<String, String>) -> DomainResult<Self> {
        let action: JobAction = fields
            .get("action")
            .ok_or_else(|| DomainError::validation("missing action"))?
            .parse()?;

        match action {
            JobAction::Stop => Ok(JobRequest::Stop),
            JobAction::Cancel => {
                let query_id = required(fields, "query_id")?.parse()?;
                Ok(JobRequest::Cancel { query_id })
            }
            JobAction::Query => {
                let query_id: QueryId = required(fields, "query_id")?.parse()?;
                let allowed_workspace_ids =
                    parse_workspace_list(required(fields, "allowed_workspace_ids")?)?;
                let query = required(fields, "query")?.trim().to_string();
                if query.is_empty() {
                    return Err(DomainError::invalid_field("query", "must not be empty"));
                }

                let batch_size = optional_number(fields, "batch_size")?;
                let timeout_seconds = optional_number(fields, "timeout_seconds")?;

                Ok(JobRequest::Query(QueryJob {
                    query_id,
                    allowed_workspace_ids,
                    query,
                    batch_size,
                    timeout_seconds,
                }))
            }
        }
    }
}

/// Normalize a comma-delimited workspace list, dropping empty segments.
pub fn parse_workspace_list(raw: &str) -> DomainResult<Vec<WorkspaceId>> {
    let ids: Vec<WorkspaceId> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
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

fn required<'a>(fields: &'a HashMap<String, String>, name: &'static str) -> DomainResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| DomainError::validation(format!("missing required field {name}")))
}

fn optional_number<T: FromStr>(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> DomainResult<Option<T>> {
    match fields.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| DomainError::invalid_field(name, format!("not a number: {raw}"))),
    }
}
