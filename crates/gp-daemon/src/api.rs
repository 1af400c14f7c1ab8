// api.rs — HTTP routes over GatedPublish.
//
// Every pipeline call does blocking git work, so handlers hand it to
// `spawn_blocking` and only shape the request and response here.
// Failures come back as `{error, stage, retry_safe}` with a status code
// chosen from the error variant.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use gp_gateway::{ChangeRequest, Decision, DecisionOutcome, GatedPublish, GatewayError};
use gp_submit::{CheckpointError, CommitInfo, PublishError, PushRejection, RevertError};
use gp_workflow::{PublishRecord, Stage, Workflow, WorkflowError};
use gp_workspace::{WorkspaceError, WorkspaceStatus};

#[derive(Clone)]
pub struct AppState {
    pub gp: GatedPublish,
}

pub fn router(gp: GatedPublish) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workflows", get(list_workflows).post(submit_workflow))
        .route("/workflows/{id}", delete(discard_workflow))
        .route("/status/{id}", get(workflow_status))
        .route("/decision/{id}", post(decide))
        .route("/revert-last-publish", post(revert_last_publish))
        .route("/last-publish", get(last_publish))
        .route("/commits", get(recent_commits))
        .route("/workspace-status", get(workspace_status))
        .layer(CorsLayer::permissive())
        .with_state(AppState { gp })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    stage: Stage,
    retry_safe: bool,

    /// The workflow as left by the failed request, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow: Option<Workflow>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody {
                error: message.into(),
                stage: Stage::Intake,
                retry_safe: true,
                workflow: None,
            },
        }
    }

    fn with_workflow(mut self, workflow: Option<Workflow>) -> Self {
        self.body.workflow = workflow;
        self
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self {
            status: status_for(&err),
            body: ErrorBody {
                error: err.to_string(),
                stage: err.stage(),
                retry_safe: err.retry_safe(),
                workflow: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Workflow(WorkflowError::NotFound(_)) => StatusCode::NOT_FOUND,
        GatewayError::Workflow(
            WorkflowError::Duplicate(_)
            | WorkflowError::AlreadyResolved { .. }
            | WorkflowError::InvalidTransition { .. },
        ) => StatusCode::CONFLICT,
        GatewayError::DecisionInFlight { .. } => StatusCode::CONFLICT,
        GatewayError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::Workspace { stage, source } => workspace_status_code(*stage, source),
        GatewayError::Checkpoint(
            CheckpointError::NothingToCheckpoint | CheckpointError::UnrelatedDrift { .. },
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::Checkpoint(CheckpointError::Workspace(source)) => {
            workspace_status_code(Stage::Checkpoint, source)
        }
        GatewayError::Publish(PublishError::NoChangesToPublish) => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::Publish(PublishError::NoCheckpoint { .. }) => StatusCode::CONFLICT,
        GatewayError::Publish(PublishError::Push { kind, .. })
        | GatewayError::Revert(RevertError::Push { kind, .. }) => push_status_code(*kind),
        GatewayError::Publish(PublishError::Workspace(source))
        | GatewayError::Revert(RevertError::Workspace(source)) => {
            workspace_status_code(Stage::Reset, source)
        }
        GatewayError::Revert(RevertError::NoPublishRecorded) => StatusCode::NOT_FOUND,
        GatewayError::Revert(RevertError::NotRevertable { .. }) => StatusCode::CONFLICT,
        GatewayError::Revert(RevertError::NothingToRevert { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn workspace_status_code(stage: Stage, source: &WorkspaceError) -> StatusCode {
    match source {
        WorkspaceError::PathTraversal { .. }
        | WorkspaceError::InvalidPath { .. }
        | WorkspaceError::EmptyChangeSet => StatusCode::UNPROCESSABLE_ENTITY,
        WorkspaceError::RemovalFailed { .. } | WorkspaceError::CloneFailed(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ if stage == Stage::Reset => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn push_status_code(kind: PushRejection) -> StatusCode {
    match kind {
        PushRejection::NonFastForward => StatusCode::CONFLICT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Run a pipeline call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, GatewayError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("pipeline task failed: {}", e)))?
        .map_err(ApiError::from)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit_workflow(
    State(state): State<AppState>,
    Json(request): Json<ChangeRequest>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let pipeline = state.gp.pipeline.clone();
    let created = pipeline.create(
        request.id.clone(),
        &request.description,
        request.risk_assessment.clone(),
    )?;
    let id = created.id;

    let run = {
        let pipeline = pipeline.clone();
        let id = id.clone();
        blocking(move || pipeline.run(&id, &request.files)).await
    };
    match run {
        Ok(workflow) => Ok((StatusCode::CREATED, Json(workflow))),
        Err(e) => Err(e.with_workflow(pipeline.registry().get(&id).ok())),
    }
}

async fn list_workflows(State(state): State<AppState>) -> Json<Vec<Workflow>> {
    Json(state.gp.pipeline.registry().list())
}

async fn workflow_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.gp.approvals.status(&id)?))
}

async fn discard_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.gp.approvals.discard(&id)?))
}

#[derive(Debug, Deserialize)]
struct DecisionRequest {
    action: Decision,
}

async fn decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<DecisionOutcome>, ApiError> {
    let approvals = state.gp.approvals.clone();
    let outcome = {
        let id = id.clone();
        blocking(move || approvals.decide(&id, body.action)).await
    };
    match outcome {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => Err(e.with_workflow(state.gp.approvals.status(&id).ok())),
    }
}

async fn revert_last_publish(
    State(state): State<AppState>,
) -> Result<Json<PublishRecord>, ApiError> {
    let approvals = state.gp.approvals.clone();
    Ok(Json(
        blocking(move || approvals.revert_last_publish()).await?,
    ))
}

async fn last_publish(State(state): State<AppState>) -> Result<Json<PublishRecord>, ApiError> {
    state
        .gp
        .approvals
        .last_publish()
        .map(Json)
        .ok_or_else(|| ApiError::from(GatewayError::Revert(RevertError::NoPublishRecorded)))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    10
}

async fn recent_commits(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<CommitInfo>>, ApiError> {
    let approvals = state.gp.approvals.clone();
    Ok(Json(
        blocking(move || approvals.recent_commits(query.limit)).await?,
    ))
}

async fn workspace_status(
    State(state): State<AppState>,
) -> Result<Json<WorkspaceStatus>, ApiError> {
    let pipeline = state.gp.pipeline.clone();
    Ok(Json(
        blocking(move || Ok(pipeline.workspace_status())).await?,
    ))
}
