pub mod candidate;
pub mod health;
pub mod issuer;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::middleware::{
    auth::{require_candidate, require_issuer},
    rate_limit::{rps_middleware, RateLimiter},
};
use crate::AppState;

/// The complete HTTP surface. Layers (CORS, tracing, body limits) are added by the binary.
pub fn router(state: AppState) -> Router {
    let issuer_api = Router::new()
        .route("/tests", get(issuer::list_tests).post(issuer::create_test))
        .route("/tests/assign", post(issuer::assign_test))
        .route(
            "/tests/:id",
            get(issuer::get_test)
                .put(issuer::update_test)
                .delete(issuer::delete_test),
        )
        .route("/tests/:id/publish", post(issuer::publish_test))
        .route("/tests/:id/archive", post(issuer::archive_test))
        .route("/tests/:id/submissions", get(issuer::list_test_submissions))
        .route("/submissions/:id/report", get(issuer::submission_report))
        .route("/submissions/:id/evaluate", post(issuer::evaluate_submission))
        .route_layer(from_fn_with_state(state.clone(), require_issuer));

    let candidate_api = Router::new()
        .route("/submissions", get(candidate::list_my_submissions))
        .route("/submissions/:id/start", post(candidate::start_attempt))
        .route("/submissions/:id/status", get(candidate::attempt_status))
        .route("/submissions/:id/answer", post(candidate::submit_answer))
        .route("/submissions/:id/code", post(candidate::submit_code))
        .route("/submissions/:id/finalize", post(candidate::finalize_attempt))
        .route("/submissions/:id/proctoring", post(candidate::record_proctoring_event))
        .route("/run-code", post(candidate::run_code))
        .route_layer(from_fn_with_state(
            RateLimiter::new(state.config.public_rps),
            rps_middleware,
        ))
        .route_layer(from_fn_with_state(state.clone(), require_candidate));

    Router::new()
        .route("/health", get(health::health))
        .merge(issuer_api)
        .merge(candidate_api)
        .with_state(state)
}
