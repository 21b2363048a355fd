mod common;

use assessment_engine::models::identity::Role;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use common::{token, TestApp};

fn test_body(prevent_tab_switch: bool) -> JsonValue {
    json!({
        "title": "Backend screening",
        "description": "  Arithmetic and a small coding task  ",
        "duration_minutes": 30,
        "passing_percentage": 60,
        "settings": { "prevent_tab_switch": prevent_tab_switch },
        "questions": [
            {
                "type": "mcq",
                "title": "Arithmetic",
                "prompt": "2 + 2 = ?",
                "options": [{ "text": "3" }, { "text": "4", "is_correct": true }],
                "points": 5
            },
            {
                "type": "coding",
                "title": "Sum",
                "problem_statement": "Print the sum of the numbers on stdin",
                "sample_input": "1 2",
                "sample_output": "3",
                "test_cases": [
                    { "input": "1 2", "expected_output": "3", "points": 4 },
                    { "input": "10 20", "expected_output": "30", "is_hidden": true, "points": 6 }
                ],
                "points": 10
            }
        ]
    })
}

/// Creates and publishes a test, then assigns it to a fresh candidate.
async fn scheduled_attempt(app: &TestApp, prevent_tab_switch: bool) -> (Uuid, Uuid, String) {
    let issuer = app.issuer_token.as_str();
    let (status, test) = app
        .call("POST", "/tests", Some(issuer), Some(test_body(prevent_tab_switch)))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", test);
    let test_id = test["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .call("POST", &format!("/tests/{}/publish", test_id), Some(issuer), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let candidate_id = Uuid::new_v4();
    let (status, assigned) = app
        .call(
            "POST",
            "/tests/assign",
            Some(issuer),
            Some(json!({ "test_id": test_id, "candidate_ids": [candidate_id] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assigned["success_count"], 1);
    let submission_id = assigned["submission_ids"][0].as_str().unwrap().parse().unwrap();

    (
        test_id.parse().unwrap(),
        submission_id,
        token(candidate_id, Role::Candidate),
    )
}

#[tokio::test]
async fn full_attempt_flow() {
    let app = TestApp::new();
    let (test_id, submission_id, candidate) = scheduled_attempt(&app, true).await;

    let (status, test) = app
        .call("GET", &format!("/tests/{}", test_id), Some(&app.issuer_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(test["total_marks"], 15);
    assert_eq!(test["description"], "Arithmetic and a small coding task");

    let (status, started) = app
        .call("POST", &format!("/submissions/{}/start", submission_id), Some(&candidate), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", started);
    assert_eq!(started["status"], "in_progress");
    assert_eq!(started["questions"].as_array().unwrap().len(), 2);
    let coding_view = &started["questions"][1];
    assert_eq!(coding_view["type"], "coding");
    assert!(coding_view["test_cases"][1]["input"].is_null());
    assert!(started["questions"][0]["options"][1].get("is_correct").is_none());

    let (status, answer) = app
        .call(
            "POST",
            &format!("/submissions/{}/answer", submission_id),
            Some(&candidate),
            Some(json!({ "question_index": 0, "selected_option": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["selected_option"], 1);

    let (status, graded) = app
        .call(
            "POST",
            &format!("/submissions/{}/code", submission_id),
            Some(&candidate),
            Some(json!({
                "question_index": 1,
                "code": "print(sum(map(int, input().split())))",
                "language": "python"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", graded);
    assert_eq!(graded["total_passed"], 2);
    assert_eq!(graded["points_earned"], 10);
    assert_eq!(graded["test_case_results"][0]["input"], "1 2");
    assert!(graded["test_case_results"][1]["input"].is_null());
    assert!(graded["test_case_results"][1]["actual_output"].is_null());

    app.clock.advance(Duration::minutes(12));
    let (status, finalized) = app
        .call("POST", &format!("/submissions/{}/finalize", submission_id), Some(&candidate), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(finalized["status"], "submitted");
    assert_eq!(finalized["finalize_trigger"], "manual");
    assert_eq!(finalized["time_spent_seconds"], 12 * 60);
    assert!(finalized["scores"].is_null());

    let (status, again) = app
        .call("POST", &format!("/submissions/{}/finalize", submission_id), Some(&candidate), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["error"], "conflict");

    let (status, report) = app
        .call(
            "GET",
            &format!("/submissions/{}/report", submission_id),
            Some(&app.issuer_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["scores"]["total_score"], 15);
    assert_eq!(report["scores"]["percentage"], 100);
    assert_eq!(report["scores"]["passed"], true);
    assert_eq!(report["questions"][1]["test_case_results"][1]["input"], "10 20");

    let (status, listed) = app
        .call(
            "GET",
            &format!("/tests/{}/submissions", test_id),
            Some(&app.issuer_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);

    let (_, test) = app
        .call("GET", &format!("/tests/{}", test_id), Some(&app.issuer_token), None)
        .await;
    assert_eq!(test["statistics"]["total_attempts"], 1);
    assert_eq!(test["statistics"]["pass_count"], 1);

    let (status, evaluated) = app
        .call(
            "POST",
            &format!("/submissions/{}/evaluate", submission_id),
            Some(&app.issuer_token),
            Some(json!({ "notes": "Strong candidate" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(evaluated["status"], "evaluated");
}

#[tokio::test]
async fn assigning_twice_does_not_duplicate() {
    let app = TestApp::new();
    let (test_id, _, _) = scheduled_attempt(&app, true).await;
    let candidate_id = Uuid::new_v4();
    let body = json!({ "test_id": test_id, "candidate_ids": [candidate_id, candidate_id] });

    let (_, first) = app
        .call("POST", "/tests/assign", Some(&app.issuer_token), Some(body.clone()))
        .await;
    assert_eq!(first["success_count"], 1);

    let (status, second) = app
        .call("POST", "/tests/assign", Some(&app.issuer_token), Some(body))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["success_count"], 0);
    assert_eq!(second["failures"][0]["reason"], "already_scheduled");
}

#[tokio::test]
async fn draft_tests_cannot_be_assigned() {
    let app = TestApp::new();
    let (_, test) = app
        .call("POST", "/tests", Some(&app.issuer_token), Some(test_body(true)))
        .await;
    let (status, body) = app
        .call(
            "POST",
            "/tests/assign",
            Some(&app.issuer_token),
            Some(json!({ "test_id": test["id"], "candidate_ids": [Uuid::new_v4()] })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);
}

#[tokio::test]
async fn overdue_attempt_is_finalized_as_timeout() {
    let app = TestApp::new();
    let (_, submission_id, candidate) = scheduled_attempt(&app, true).await;
    app.call("POST", &format!("/submissions/{}/start", submission_id), Some(&candidate), None)
        .await;

    app.clock.advance(Duration::minutes(31));
    let (status, late) = app
        .call(
            "POST",
            &format!("/submissions/{}/answer", submission_id),
            Some(&candidate),
            Some(json!({ "question_index": 0, "selected_option": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(late["error"], "deadline_passed");

    let (status, current) = app
        .call("GET", &format!("/submissions/{}/status", submission_id), Some(&candidate), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current["status"], "submitted");
    assert_eq!(current["finalize_trigger"], "timeout");
}

#[tokio::test]
async fn expired_assignment_cannot_be_started() {
    let app = TestApp::new();
    let (status, test) = app
        .call("POST", "/tests", Some(&app.issuer_token), Some(test_body(true)))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    app.call(
        "POST",
        &format!("/tests/{}/publish", test["id"].as_str().unwrap()),
        Some(&app.issuer_token),
        None,
    )
    .await;

    let candidate_id = Uuid::new_v4();
    let (_, assigned) = app
        .call(
            "POST",
            "/tests/assign",
            Some(&app.issuer_token),
            Some(json!({
                "test_id": test["id"],
                "candidate_ids": [candidate_id],
                "expires_at": Utc::now() + Duration::hours(1)
            })),
        )
        .await;
    let submission_id = assigned["submission_ids"][0].as_str().unwrap().to_string();

    app.clock.advance(Duration::hours(2));
    let candidate = token(candidate_id, Role::Candidate);
    let (status, _) = app
        .call("POST", &format!("/submissions/{}/start", submission_id), Some(&candidate), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, mine) = app.call("GET", "/submissions", Some(&candidate), None).await;
    assert_eq!(mine["items"][0]["status"], "expired");
}

#[tokio::test]
async fn repeated_tab_switches_terminate_the_attempt() {
    let app = TestApp::new();
    let (_, submission_id, candidate) = scheduled_attempt(&app, true).await;
    app.call("POST", &format!("/submissions/{}/start", submission_id), Some(&candidate), None)
        .await;

    let uri = format!("/submissions/{}/proctoring", submission_id);
    let mut last = JsonValue::Null;
    for switch in 1..=5 {
        let (status, body) = app
            .call("POST", &uri, Some(&candidate), Some(json!({ "event_type": "tab_switch" })))
            .await;
        assert_eq!(status, StatusCode::OK, "switch {}: {}", switch, body);
        if switch == 3 {
            assert_eq!(body["flagged"], true);
            assert_eq!(body["terminated"], false);
        }
        last = body;
    }
    assert_eq!(last["tab_switch_count"], 5);
    assert_eq!(last["terminated"], true);

    let (_, current) = app
        .call("GET", &format!("/submissions/{}/status", submission_id), Some(&candidate), None)
        .await;
    assert_eq!(current["finalize_trigger"], "proctoring");

    let (status, _) = app
        .call("POST", &uri, Some(&candidate), Some(json!({ "event_type": "tab_switch" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .call(
            "POST",
            &format!("/submissions/{}/answer", submission_id),
            Some(&candidate),
            Some(json!({ "question_index": 0, "selected_option": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, body) = app
        .call(
            "POST",
            &format!("/submissions/{}/code", submission_id),
            Some(&candidate),
            Some(json!({ "question_index": 1, "code": "print(sum(...))", "language": "python" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn roles_are_enforced() {
    let app = TestApp::new();
    let (_, submission_id, candidate) = scheduled_attempt(&app, true).await;

    let (status, body) = app.call("GET", "/tests", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].is_string());

    let (status, _) = app.call("GET", "/tests", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.call("GET", "/tests", Some(&candidate), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call("GET", "/submissions", Some(&app.issuer_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let stranger = token(Uuid::new_v4(), Role::Candidate);
    let (status, _) = app
        .call("POST", &format!("/submissions/{}/start", submission_id), Some(&stranger), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let other_issuer = token(Uuid::new_v4(), Role::Issuer);
    let (status, _) = app
        .call(
            "GET",
            &format!("/submissions/{}/report", submission_id),
            Some(&other_issuer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn run_code_echoes_sandbox_output() {
    let app = TestApp::new();
    let candidate = token(Uuid::new_v4(), Role::Candidate);
    let (status, body) = app
        .call(
            "POST",
            "/run-code",
            Some(&candidate),
            Some(json!({ "code": "print(sum(...))", "language": "python", "stdin": "2 3" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stdout"], "5\n");
    assert_eq!(body["status"], "accepted");
}

#[tokio::test]
async fn health_reports_backends() {
    let app = TestApp::new();
    let (status, body) = app.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");
    assert_eq!(body["sandbox"], "local");
}

#[tokio::test]
async fn nonsense_sandbox_limits_are_rejected_when_authoring() {
    let app = TestApp::new();
    let mut body = test_body(true);
    body["questions"][1]["cpu_limit_secs"] = json!(-1.0);
    let (status, error) = app
        .call("POST", "/tests", Some(&app.issuer_token), Some(body))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", error);
    assert_eq!(error["error"], "validation_error");
}
