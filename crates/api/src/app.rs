use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use vantage_core::{JobStatus, QueryId, QueryJob};

use crate::context::AppContext;
use crate::dto::{CancelQueryResponse, CreateQueryRequest, CreateQueryResponse, GetQueryResponse};
use crate::errors;

pub fn build_app(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/query/new", post(new_query))
        .route("/query/:query_id", get(get_query).delete(cancel_query))
        .layer(Extension(ctx))
}

/// Accept a job, assign a fresh id, create its `pending` entry, and hand it
/// to the worker pool. Returns the id immediately; callers poll for status.
pub async fn new_query(
    Extension(ctx): Extension<Arc<AppContext>>,
    Json(body): Json<CreateQueryRequest>,
) -> axum::response::Response {
    let allowed_workspace_ids = match body.normalized_workspace_ids() {
        Ok(ids) => ids,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
    };
    let query = body.query_content.trim().to_string();
    if query.is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "query_content must not be empty",
        );
    }

    let query_id = QueryId::generate();
    let job = QueryJob {
        query_id: query_id.clone(),
        allowed_workspace_ids,
        query,
        batch_size: body.batch_size,
        timeout_seconds: body.timeout_seconds,
    };

    let store = ctx.store();
    let pending_id = query_id.clone();
    match tokio::task::spawn_blocking(move || store.create(&pending_id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return errors::store_error(e),
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                e.to_string(),
            )
        }
    }

    ctx.submit(job);
    tracing::info!(query_id = %query_id, "accepted query job");

    (
        StatusCode::ACCEPTED,
        Json(CreateQueryResponse { query_id }),
    )
        .into_response()
}

pub async fn get_query(
    Extension(ctx): Extension<Arc<AppContext>>,
    Path(query_id): Path<String>,
) -> axum::response::Response {
    let query_id: QueryId = match query_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid query id")
        }
    };

    let store = ctx.store();
    let lookup_id = query_id.clone();
    let status = match tokio::task::spawn_blocking(move || store.get_status(&lookup_id)).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return errors::store_error(e),
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                e.to_string(),
            )
        }
    };

    match status {
        Some(status) => Json(GetQueryResponse {
            query_id,
            status: status.to_string(),
        })
        .into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "query not found"),
    }
}

/// Cancel a job by id. Only effective before the job starts executing;
/// cancelling a started job has no effect on the in-progress execution.
pub async fn cancel_query(
    Extension(ctx): Extension<Arc<AppContext>>,
    Path(query_id): Path<String>,
) -> axum::response::Response {
    let query_id: QueryId = match query_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid query id")
        }
    };

    let cancelled = match ctx.cancel(&query_id) {
        Some(cancelled) => cancelled,
        None => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "query not found"),
    };

    if cancelled {
        // Drop any pending record; leave a bare cancelled status behind.
        let store = ctx.store();
        let cancel_id = query_id.clone();
        let recorded = tokio::task::spawn_blocking(move || {
            store
                .remove(&cancel_id)
                .and_then(|()| store.set_status(&cancel_id, JobStatus::Cancelled))
        })
        .await;
        match recorded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return errors::store_error(e),
            Err(e) => {
                return errors::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    e.to_string(),
                )
            }
        }
        tracing::info!(query_id = %query_id, "job cancelled before start");
    }

    Json(CancelQueryResponse {
        query_id,
        cancelled,
    })
    .into_response()
}
