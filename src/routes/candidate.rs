use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::submission_dto::{
        AnswerRequest, CodeRequest, ListSubmissionsQuery, ProctoringRequest, RunCodeRequest,
    },
    error::Result,
    models::identity::Identity,
    AppState,
};

#[axum::debug_handler]
pub async fn list_my_submissions(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Query(query): Query<ListSubmissionsQuery>,
) -> Result<impl IntoResponse> {
    let items = state
        .attempt_service
        .list_for_candidate(&actor, query.status)
        .await?;
    Ok(Json(json!({ "items": items, "total": items.len() })))
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state.attempt_service.start(id, &actor).await?;
    Ok(Json(view))
}

#[axum::debug_handler]
pub async fn attempt_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let status = state.attempt_service.status(id, &actor).await?;
    Ok(Json(status))
}

#[axum::debug_handler]
pub async fn submit_answer(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AnswerRequest>,
) -> Result<impl IntoResponse> {
    let saved = state
        .attempt_service
        .submit_mcq_answer(id, &actor, payload)
        .await?;
    Ok(Json(saved))
}

#[axum::debug_handler]
pub async fn run_code(
    State(state): State<AppState>,
    Json(payload): Json<RunCodeRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let outcome = state
        .grading_service
        .dry_run(&payload.code, payload.language, &payload.stdin)
        .await?;
    Ok(Json(outcome))
}

#[axum::debug_handler]
pub async fn submit_code(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CodeRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let graded = state.attempt_service.submit_code(id, &actor, payload).await?;
    Ok(Json(graded))
}

#[axum::debug_handler]
pub async fn finalize_attempt(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let result = state.attempt_service.finalize(id, &actor).await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn record_proctoring_event(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProctoringRequest>,
) -> Result<impl IntoResponse> {
    let result = state
        .proctoring_service
        .record_event(id, &actor, payload.event_type)
        .await?;
    Ok(Json(result))
}
