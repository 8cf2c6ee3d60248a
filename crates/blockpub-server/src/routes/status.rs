//! Read-only status routes for the drain-readiness monitor.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::warn;

use crate::state::AppState;
use blockpub_store::FileStatus;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(get_status))
        .route("/status/files", get(count_files))
        .route("/status/drained", get(get_drained))
        .route("/status/cycle", get(get_last_cycle))
        .route("/status/config", get(get_config))
}

#[derive(Deserialize)]
struct FilesQuery {
    status: String,
}

fn store_error(e: blockpub_core::Error) -> (StatusCode, Json<serde_json::Value>) {
    warn!("Status query failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string(), "kind": e.kind() })),
    )
}

/// GET /api/status: counters snapshot.
async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.status_snapshot() {
        Ok(snapshot) => (StatusCode::OK, Json(serde_json::json!(snapshot))),
        Err(e) => store_error(e),
    }
}

/// GET /api/status/files?status=pending|in_catalog
async fn count_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FilesQuery>,
) -> impl IntoResponse {
    let Some(status) = FileStatus::parse(&query.status) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("unknown status '{}', expected pending or in_catalog", query.status)
            })),
        );
    };
    match state.store.count_files_by_status(status) {
        Ok(count) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": status, "count": count })),
        ),
        Err(e) => store_error(e),
    }
}

/// GET /api/status/drained
async fn get_drained(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.is_fully_drained() {
        Ok(drained) => (StatusCode::OK, Json(serde_json::json!({ "drained": drained }))),
        Err(e) => store_error(e),
    }
}

/// GET /api/status/cycle: last cycle summary, `null` before the first.
async fn get_last_cycle(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!(*state.last_cycle.read()))
}

/// GET /api/status/config: effective settings, token omitted.
async fn get_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(serde_json::json!({
        "catalogEndpoint": config.catalog.endpoint,
        "requestTimeoutSecs": config.catalog.request_timeout_secs,
        "blockOpenTimeoutSecs": config.block_open_timeout_secs,
        "groupConcurrencyLimit": config.group_concurrency_limit,
        "cycleIntervalSecs": config.cycle_interval_secs,
        "dbPath": config.db_path(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::build_router;
    use axum::body::Body;
    use axum::http::Request;
    use blockpub_core::PublisherConfig;
    use blockpub_runtime::CycleReport;
    use blockpub_store::{BufferStore, NewAlgorithm, NewDataset, NewFile};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state() -> (Arc<AppState>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::open(dir.path()).unwrap();
        let state = AppState::new(PublisherConfig::default(), Arc::new(store));
        (Arc::new(state), dir)
    }

    fn add_pending(store: &BufferStore, lfn: &str) {
        let algo = store
            .register_algorithm(&NewAlgorithm {
                application_name: "cmsRun".into(),
                application_family: "RECO".into(),
                application_version: "CMSSW_14_0_0".into(),
                param_set_hash: "beef".into(),
                param_set_content: None,
            })
            .unwrap();
        let dataset = store
            .register_dataset(&NewDataset::from_path("/A/B-v1/RAW").unwrap())
            .unwrap();
        let das_id = store.register_pairing(algo, dataset).unwrap();
        store
            .add_pending_file(&NewFile {
                logical_name: lfn.into(),
                das_id,
                locations: vec!["T1_US_FNAL".into()],
                ..Default::default()
            })
            .unwrap();
    }

    async fn get_json(state: Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (state, _dir) = test_state();
        add_pending(&state.store, "/store/f1.root");

        let (code, json) = get_json(state, "/api/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(json["pendingFiles"], 1);
        assert_eq!(json["openBlocks"], 0);
        assert_eq!(json["drained"], false);
    }

    #[tokio::test]
    async fn test_file_counts_by_status() {
        let (state, _dir) = test_state();
        add_pending(&state.store, "/store/f1.root");

        let (code, json) = get_json(state.clone(), "/api/status/files?status=pending").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["count"], 1);

        let (_, json) = get_json(state.clone(), "/api/status/files?status=in_catalog").await;
        assert_eq!(json["count"], 0);

        let (code, _) = get_json(state, "/api/status/files?status=closed").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_drained() {
        let (state, _dir) = test_state();
        let (_, json) = get_json(state.clone(), "/api/status/drained").await;
        assert_eq!(json["drained"], true);

        add_pending(&state.store, "/store/f1.root");
        let (_, json) = get_json(state, "/api/status/drained").await;
        assert_eq!(json["drained"], false);
    }

    #[tokio::test]
    async fn test_config_hides_token() {
        let (state, _dir) = test_state();
        let (code, json) = get_json(state, "/api/status/config").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(json["blockOpenTimeoutSecs"], 21600);
        assert_eq!(json["groupConcurrencyLimit"], 1);
        assert!(json.get("token").is_none());
    }

    #[tokio::test]
    async fn test_last_cycle() {
        let (state, _dir) = test_state();
        let (_, json) = get_json(state.clone(), "/api/status/cycle").await;
        assert!(json.is_null());

        state.record_cycle(CycleReport {
            duration_ms: 12,
            ..Default::default()
        });
        // skipped cycles do not replace the last real one
        state.record_cycle(CycleReport {
            skipped: true,
            ..Default::default()
        });
        let (_, json) = get_json(state, "/api/status/cycle").await;
        assert_eq!(json["durationMs"], 12);
        assert_eq!(json["skipped"], false);
    }
}
