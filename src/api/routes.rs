//! Axum route handlers: the HTTP transport over `Scheduler`.
//!
//! Grounded on this codebase's own `kodegen_server_http` route-handler shape
//! (state extractor + `IntoResponse` error mapping), rebuilt around the
//! orchestrator's eight operations instead of MCP tool calls.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::engine::EngineError;
use crate::model::{ExecutionId, WorkflowId};
use crate::scheduler::{Page, Scheduler};
use crate::store::WorkflowFilter;

use super::auth::{AllowAll, AuthContext};
use super::dto::{
    CreateWorkflowRequest, ExecuteWorkflowRequest, ExecutionIdResponse, ExecutionResponse,
    ListWorkflowsQuery, SubscribeQuery, WorkflowIdResponse,
};
use super::sse::stream_execution_events;

pub type SharedScheduler = Arc<Scheduler>;

/// Router state: the `Scheduler` every handler calls into, plus the
/// `AuthContext` the event-subscription route checks before streaming.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: SharedScheduler,
    pub auth: Arc<dyn AuthContext>,
}

#[must_use]
pub fn router(scheduler: SharedScheduler) -> Router {
    router_with_auth(scheduler, Arc::new(AllowAll))
}

#[must_use]
pub fn router_with_auth(scheduler: SharedScheduler, auth: Arc<dyn AuthContext>) -> Router {
    let state = ApiState { scheduler, auth };
    Router::new()
        .route("/workflows", post(create_workflow).get(list_workflows))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}/archive", post(archive_workflow))
        .route("/workflows/{id}/execute", post(execute_workflow))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
        .route("/executions/{id}/events", get(subscribe_execution_events))
        .with_state(state)
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId, EngineError> {
    raw.parse()
        .map_err(|_| EngineError::WorkflowNotFound(raw.to_string()))
}

fn parse_execution_id(raw: &str) -> Result<ExecutionId, EngineError> {
    raw.parse()
        .map_err(|_| EngineError::ExecutionNotFound(raw.to_string()))
}

async fn create_workflow(
    State(ApiState { scheduler, auth: _auth }): State<ApiState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let id = scheduler
        .create_workflow(
            req.name,
            req.owner,
            req.definition,
            req.timeout_seconds,
            req.max_retries_default,
        )
        .await?;
    Ok(Json(WorkflowIdResponse {
        workflow_id: id.to_string(),
    }))
}

async fn get_workflow(
    State(ApiState { scheduler, auth: _auth }): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let id = parse_workflow_id(&id)?;
    let workflow = scheduler.get_workflow(id).await?;
    Ok(Json(workflow))
}

async fn list_workflows(
    State(ApiState { scheduler, auth: _auth }): State<ApiState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let filter = WorkflowFilter {
        status: query.status,
    };
    let page = Page {
        offset: query.offset.unwrap_or(0),
        limit: query.limit.unwrap_or(50),
    };
    let workflows = scheduler.list_workflows(&query.owner, &filter, page).await?;
    Ok(Json(workflows))
}

async fn archive_workflow(
    State(ApiState { scheduler, auth: _auth }): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let id = parse_workflow_id(&id)?;
    scheduler.archive_workflow(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn execute_workflow(
    State(ApiState { scheduler, auth: _auth }): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ExecuteWorkflowRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let id = parse_workflow_id(&id)?;
    let execution_id = scheduler
        .execute_workflow(id, req.inputs, req.trigger_type)
        .await?;
    Ok(Json(ExecutionIdResponse {
        execution_id: execution_id.to_string(),
    }))
}

async fn get_execution(
    State(ApiState { scheduler, auth: _auth }): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let id = parse_execution_id(&id)?;
    let view = scheduler.get_execution(id).await?;
    let display_status = scheduler.display_status(&view.execution);
    Ok(Json(ExecutionResponse::new(
        view.execution,
        display_status,
        view.task_runs,
    )))
}

async fn cancel_execution(
    State(ApiState { scheduler, auth: _auth }): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let id = parse_execution_id(&id)?;
    scheduler.cancel_execution(id).await?;
    Ok(axum::http::StatusCode::ACCEPTED)
}

async fn subscribe_execution_events(
    State(ApiState { scheduler, auth }): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<SubscribeQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let id = parse_execution_id(&id)?;
    let view = scheduler.get_execution(id).await?;
    let workflow = scheduler.get_workflow(view.execution.workflow_id).await?;
    if !auth.authorize(&workflow.owner) {
        return Err(EngineError::Forbidden(workflow.id.to_string()));
    }
    let subscription = scheduler
        .subscribe_execution_events(id, query.from_sequence)
        .await?;
    Ok(stream_execution_events(subscription))
}
