use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use harness_core::persona::{all_personas, Persona};
use harness_core::scenario::{
    all_scenarios, estimate_total_duration, scenarios_by_stage, scenarios_by_tag, JourneyStage,
    Scenario, PRESETS,
};
use harness_core::types::{ErrorContext, ErrorId, RemediationRequest, RemediationRequestId, RunId};
use harnessd::remediation::{NewRemediation, RemediationAction};
use harnessd::{RunResults, RunStatusView};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::WebError;
use crate::model::{
    web_event_name, BulkErrorPatchRequest, BulkErrorPatchResponse, CleanupResponse,
    CreateRemediationRequest, DeleteRemediationResponse, ErrorListResponse, ErrorPatchRequest,
    LimitQuery, PurgeRequest, PurgeResponse, RemediationActionRequest, RemediationDetailResponse,
    RemediationListQuery, RemediationListResponse, RunIdQuery, RunListResponse, ScenarioListResponse,
    ScenarioQuery, ScenarioView, StartRunRequest, StartRunResponse, StopRunResponse,
    DEFAULT_PURGE_DAYS,
};
use crate::state::WebState;

const DEFAULT_RUN_LIMIT: usize = 20;
const DEFAULT_REMEDIATION_LIMIT: usize = 50;

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/testing/run",
            post(start_run).get(list_runs).delete(stop_run),
        )
        .route("/api/testing/status", get(run_status))
        .route("/api/testing/results", get(run_results))
        .route("/api/testing/cleanup", post(purge).delete(cleanup_run))
        .route("/api/testing/runs/{run_id}/errors", get(run_errors))
        .route("/api/testing/errors/bulk", patch(bulk_patch_errors))
        .route(
            "/api/testing/errors/{error_id}",
            get(get_error).patch(patch_error),
        )
        .route(
            "/api/testing/remediation",
            post(create_remediation).get(list_remediation),
        )
        .route(
            "/api/testing/remediation/{request_id}",
            get(get_remediation)
                .post(act_on_remediation)
                .delete(delete_remediation),
        )
        .route("/api/testing/scenarios", get(list_scenarios))
        .route("/api/testing/personas", get(list_personas))
        .route("/api/testing/events", get(stream_events))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

// --- Runs ---

async fn start_run(
    State(state): State<WebState>,
    Json(body): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), WebError> {
    let service = state.service();
    let config = body.into_run_config(service.config.orchestrator.default_run_config());
    let run = service.orchestrator.start(config)?;
    Ok((
        StatusCode::CREATED,
        Json(StartRunResponse {
            run_id: run.id.0,
            config: run.config,
        }),
    ))
}

async fn list_runs(
    State(state): State<WebState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<RunListResponse>, WebError> {
    let runs = state
        .service()
        .orchestrator
        .list(query.limit.unwrap_or(DEFAULT_RUN_LIMIT))?;
    let active_run_ids = runs
        .iter()
        .filter(|summary| summary.active)
        .map(|summary| summary.run.id.0.clone())
        .collect();
    Ok(Json(RunListResponse {
        runs,
        active_run_ids,
    }))
}

async fn stop_run(
    State(state): State<WebState>,
    Query(query): Query<RunIdQuery>,
) -> Result<Json<StopRunResponse>, WebError> {
    let stopped = state
        .service()
        .orchestrator
        .stop(&RunId::new(query.run_id.clone()))?;
    Ok(Json(StopRunResponse {
        run_id: query.run_id,
        stopped,
    }))
}

async fn run_status(
    State(state): State<WebState>,
    Query(query): Query<RunIdQuery>,
) -> Result<Json<RunStatusView>, WebError> {
    Ok(Json(
        state
            .service()
            .orchestrator
            .status(&RunId::new(query.run_id))?,
    ))
}

async fn run_results(
    State(state): State<WebState>,
    Query(query): Query<RunIdQuery>,
) -> Result<Json<RunResults>, WebError> {
    Ok(Json(
        state
            .service()
            .orchestrator
            .results(&RunId::new(query.run_id))?,
    ))
}

async fn cleanup_run(
    State(state): State<WebState>,
    Query(query): Query<RunIdQuery>,
) -> Result<Json<CleanupResponse>, WebError> {
    let outcome = state
        .service()
        .orchestrator
        .cleanup(&RunId::new(query.run_id))
        .await?;
    Ok(Json(outcome.into()))
}

async fn purge(
    State(state): State<WebState>,
    body: Bytes,
) -> Result<Json<PurgeResponse>, WebError> {
    let request: PurgeRequest = if body.is_empty() {
        PurgeRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| WebError::BadRequest(format!("invalid purge body: {err}")))?
    };
    let days = request.days_old.unwrap_or(DEFAULT_PURGE_DAYS);
    let report = state.service().orchestrator.purge_older_than(days)?;
    Ok(Json(PurgeResponse::new(days, report)))
}

// --- Errors ---

async fn run_errors(
    State(state): State<WebState>,
    Path(run_id): Path<String>,
) -> Result<Json<ErrorListResponse>, WebError> {
    let errors = state.service().errors_for_run(&RunId::new(run_id))?;
    Ok(Json(ErrorListResponse { errors }))
}

async fn get_error(
    State(state): State<WebState>,
    Path(error_id): Path<String>,
) -> Result<Json<ErrorContext>, WebError> {
    state
        .service()
        .error(&ErrorId::new(error_id.clone()))?
        .map(Json)
        .ok_or_else(|| WebError::NotFound(format!("error not found: {error_id}")))
}

async fn patch_error(
    State(state): State<WebState>,
    Path(error_id): Path<String>,
    Json(body): Json<ErrorPatchRequest>,
) -> Result<Json<ErrorContext>, WebError> {
    let error = state
        .service()
        .remediation
        .set_error_status(&ErrorId::new(error_id), body.remediation_status)?;
    Ok(Json(error))
}

async fn bulk_patch_errors(
    State(state): State<WebState>,
    Json(body): Json<BulkErrorPatchRequest>,
) -> Result<Json<BulkErrorPatchResponse>, WebError> {
    let outcome = state.service().remediation.mark_errors(
        &RemediationRequestId::new(body.request_id),
        body.remediation_status,
    )?;
    Ok(Json(BulkErrorPatchResponse {
        updated: outcome.updated,
        request: outcome.request,
    }))
}

// --- Remediation ---

async fn create_remediation(
    State(state): State<WebState>,
    Json(body): Json<CreateRemediationRequest>,
) -> Result<(StatusCode, Json<RemediationRequest>), WebError> {
    let request = state
        .service()
        .remediation
        .create(NewRemediation::from(body))?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_remediation(
    State(state): State<WebState>,
    Query(query): Query<RemediationListQuery>,
) -> Result<Json<RemediationListResponse>, WebError> {
    let requests = state.service().remediation.list(
        query.limit.unwrap_or(DEFAULT_REMEDIATION_LIMIT),
        query.status,
    )?;
    Ok(Json(RemediationListResponse { requests }))
}

async fn get_remediation(
    State(state): State<WebState>,
    Path(request_id): Path<String>,
) -> Result<Json<RemediationDetailResponse>, WebError> {
    let detail = state
        .service()
        .remediation
        .get(&RemediationRequestId::new(request_id))?;
    Ok(Json(RemediationDetailResponse {
        request: detail.request,
        errors: detail.errors,
        task_prompt: detail.task_prompt,
    }))
}

async fn act_on_remediation(
    State(state): State<WebState>,
    Path(request_id): Path<String>,
    Json(body): Json<RemediationActionRequest>,
) -> Result<Json<RemediationRequest>, WebError> {
    let action: RemediationAction = body.action.parse().map_err(WebError::BadRequest)?;
    let request = state
        .service()
        .remediation
        .act(&RemediationRequestId::new(request_id), action)?;
    Ok(Json(request))
}

async fn delete_remediation(
    State(state): State<WebState>,
    Path(request_id): Path<String>,
) -> Result<Json<DeleteRemediationResponse>, WebError> {
    let released = state
        .service()
        .remediation
        .delete(&RemediationRequestId::new(request_id))?;
    Ok(Json(DeleteRemediationResponse {
        deleted: true,
        errors_released: released,
    }))
}

// --- Catalog ---

async fn list_scenarios(
    Query(query): Query<ScenarioQuery>,
) -> Result<Json<ScenarioListResponse>, WebError> {
    let scenarios: Vec<&Scenario> = match (query.tag.as_deref(), query.stage.as_deref()) {
        (Some(tag), _) => scenarios_by_tag(tag),
        (None, Some(stage)) => {
            let stage: JourneyStage = stage.parse().map_err(WebError::BadRequest)?;
            scenarios_by_stage(stage)
        }
        (None, None) => all_scenarios().iter().collect(),
    };
    Ok(Json(ScenarioListResponse {
        estimated_total_duration_ms: estimate_total_duration(&scenarios),
        scenarios: scenarios.into_iter().map(ScenarioView::from).collect(),
        presets: PRESETS.iter().map(|preset| preset.to_string()).collect(),
    }))
}

async fn list_personas() -> Json<Vec<Persona>> {
    Json(all_personas().to_vec())
}

// --- Events ---

async fn stream_events(
    State(state): State<WebState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.subscribe();
    let stream = BroadcastStream::new(rx).map(|message| {
        let event = match message {
            Ok(payload) => {
                let data = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
                SseEvent::default().event(web_event_name(&payload)).data(data)
            }
            Err(_) => SseEvent::default().event("lagged").data("{}"),
        };
        Ok::<SseEvent, Infallible>(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use harness_core::config::HarnessConfig;
    use harness_core::state::ErrorRemediationStatus;
    use harness_core::types::{ClientId, ErrorContext, ErrorId, ErrorType, RunId};
    use harnessd::HarnessService;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::router;
    use crate::state::WebState;

    fn harness(dir: &TempDir) -> WebState {
        let mut config = HarnessConfig::default();
        config.store.sqlite_path = dir.path().join("harness.sqlite");
        config.store.event_log_dir = dir.path().join("events");
        config.remediation.task_dir = dir.path().join("tasks");
        WebState::new(HarnessService::open(config).expect("open service"))
    }

    fn seed_error(state: &WebState, id: &str) {
        state
            .service()
            .store
            .insert_error(&ErrorContext {
                error_id: ErrorId::new(id),
                run_id: RunId::new("e2e_2026-10-16_seed"),
                client_id: ClientId::new("e2e_2026-10-16_seed_client_1"),
                occurred_at: Utc::now(),
                error_type: ErrorType::ChatTimeout,
                message: "chat reply took longer than 30000ms".to_string(),
                stack_trace: None,
                scenario_id: "chat_to_diagnostic".to_string(),
                persona_id: "startup_sarah".to_string(),
                step_index: 1,
                step_type: "chat".to_string(),
                step_config: None,
                request: None,
                response: None,
                expected: None,
                actual: None,
                likely_source_files: Vec::new(),
                remediation_status: ErrorRemediationStatus::Pending,
                remediation_request_id: None,
            })
            .expect("insert error");
    }

    async fn send(state: &WebState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        let response = router(state.clone())
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = TempDir::new().expect("tempdir");
        let state = harness(&dir);
        let (status, body) = send(&state, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn invalid_run_requests_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let state = harness(&dir);

        let (status, body) = send(
            &state,
            "POST",
            "/api/testing/run",
            Some(json!({ "maxConcurrentClients": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("message").contains("max_concurrent_clients"));

        let (status, _) = send(
            &state,
            "POST",
            "/api/testing/run",
            Some(json!({ "scenarioIds": ["no_such_scenario"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_runs_are_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let state = harness(&dir);

        let (status, _) = send(&state, "GET", "/api/testing/status?runId=missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&state, "DELETE", "/api/testing/cleanup?runId=missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&state, "GET", "/api/testing/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["runs"], json!([]));
        assert_eq!(body["activeRunIds"], json!([]));
    }

    #[tokio::test]
    async fn purge_defaults_to_a_week() {
        let dir = TempDir::new().expect("tempdir");
        let state = harness(&dir);
        let (status, body) = send(&state, "POST", "/api/testing/cleanup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["daysOld"], 7);
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn catalog_routes_list_scenarios_and_personas() {
        let dir = TempDir::new().expect("tempdir");
        let state = harness(&dir);

        let (status, body) = send(&state, "GET", "/api/testing/scenarios", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scenarios"].as_array().expect("scenarios").len(), 7);

        let (status, body) = send(&state, "GET", "/api/testing/scenarios?stage=lead", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["scenarios"]
            .as_array()
            .expect("scenarios")
            .iter()
            .all(|scenario| scenario["journeyStage"] == "lead"));

        let (status, _) = send(&state, "GET", "/api/testing/scenarios?stage=alumni", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&state, "GET", "/api/testing/personas", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().expect("personas").len(), 6);
    }

    #[tokio::test]
    async fn error_routes_fetch_and_patch_status() {
        let dir = TempDir::new().expect("tempdir");
        let state = harness(&dir);
        seed_error(&state, "err_web_1");

        let (status, body) = send(&state, "GET", "/api/testing/errors/err_web_1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error_type"], "chat_timeout");

        let (status, body) = send(
            &state,
            "PATCH",
            "/api/testing/errors/err_web_1",
            Some(json!({ "remediationStatus": "ignored" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["remediation_status"], "ignored");

        let (status, body) = send(
            &state,
            "GET",
            "/api/testing/runs/e2e_2026-10-16_seed/errors",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["errors"].as_array().expect("errors").len(), 1);

        let (status, _) = send(&state, "GET", "/api/testing/errors/err_missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn remediation_lifecycle_over_http() {
        let dir = TempDir::new().expect("tempdir");
        let state = harness(&dir);
        seed_error(&state, "err_web_2");

        let (status, body) = send(
            &state,
            "POST",
            "/api/testing/remediation",
            Some(json!({ "errorIds": ["err_unknown"], "output": "cursor_task" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("message").contains("err_unknown"));

        let (status, body) = send(
            &state,
            "POST",
            "/api/testing/remediation",
            Some(json!({ "errorIds": ["err_web_2"], "output": "cursor_task", "priority": "high" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let request_id = body["id"].as_str().expect("request id").to_string();

        let (status, body) = send(
            &state,
            "GET",
            &format!("/api/testing/remediation/{request_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["errors"].as_array().expect("errors").len(), 1);

        let (status, body) = send(
            &state,
            "POST",
            &format!("/api/testing/remediation/{request_id}"),
            Some(json!({ "action": "explode" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown action: explode");

        let (status, body) = send(
            &state,
            "PATCH",
            "/api/testing/errors/bulk",
            Some(json!({ "requestId": request_id, "remediationStatus": "fixed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], 1);
        assert_eq!(body["request"]["status"], "applied");

        let (status, body) = send(&state, "GET", "/api/testing/remediation?status=applied", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requests"].as_array().expect("requests").len(), 1);

        let (status, body) = send(
            &state,
            "DELETE",
            &format!("/api/testing/remediation/{request_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["errorsReleased"], 1);

        let (status, _) = send(
            &state,
            "GET",
            &format!("/api/testing/remediation/{request_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
