use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    dto::{
        submission_dto::{AssignTestPayload, EvaluateRequest},
        test_dto::{CreateTestPayload, ListTestsQuery, UpdateTestPayload},
    },
    error::Result,
    models::identity::Identity,
    AppState,
};
use validator::Validate;

#[axum::debug_handler]
pub async fn create_test(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Json(payload): Json<CreateTestPayload>,
) -> Result<impl IntoResponse> {
    let test = state.test_service.create_test(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(test)))
}

#[axum::debug_handler]
pub async fn list_tests(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Query(query): Query<ListTestsQuery>,
) -> Result<impl IntoResponse> {
    let page = state.test_service.list_tests(&actor, query).await?;
    Ok(Json(page))
}

#[axum::debug_handler]
pub async fn get_test(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let test = state.test_service.get_test(&actor, id).await?;
    Ok(Json(test))
}

#[axum::debug_handler]
pub async fn update_test(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTestPayload>,
) -> Result<impl IntoResponse> {
    let test = state.test_service.update_test(&actor, id, payload).await?;
    Ok(Json(test))
}

#[axum::debug_handler]
pub async fn delete_test(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.test_service.delete_test(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn publish_test(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let test = state.test_service.publish_test(&actor, id).await?;
    Ok(Json(json!({ "id": test.id, "status": test.status })))
}

#[axum::debug_handler]
pub async fn archive_test(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let test = state.test_service.archive_test(&actor, id).await?;
    Ok(Json(json!({ "id": test.id, "status": test.status })))
}

#[axum::debug_handler]
pub async fn assign_test(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Json(payload): Json<AssignTestPayload>,
) -> Result<impl IntoResponse> {
    let result = state.scheduler_service.assign_test(&actor, payload).await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn list_test_submissions(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let items = state.attempt_service.list_for_test(&actor, id).await?;
    Ok(Json(json!({ "items": items, "total": items.len() })))
}

#[axum::debug_handler]
pub async fn submission_report(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let report = state.attempt_service.report(&actor, id).await?;
    Ok(Json(report))
}

#[axum::debug_handler]
pub async fn evaluate_submission(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(payload): Json<EvaluateRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let summary = state
        .attempt_service
        .evaluate(&actor, id, payload.notes)
        .await?;
    Ok(Json(summary))
}
