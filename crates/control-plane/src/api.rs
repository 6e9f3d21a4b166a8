use crate::error::AppError;
use crate::metrics::{metrics_middleware, record_export, record_gateway_update, render_metrics};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post, put};
use edi_common::models::{FacilityRef, GatewayConfig, GatewayKey, GatewayKind, LinkState};
use edi_common::status::{FleetStatus, GatewayStatus};
use edi_sync::{WORK_INSTRUCTION_PREFIX, WorkInstructionRecord, write_work_instructions};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

type ApiResult<T> = std::result::Result<T, AppError>;

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/gateways", get(list_gateways))
        .route("/api/v1/gateways/{facility_id}/{kind}", put(update_gateway))
        .route("/api/v1/sync/trigger", post(trigger_sync))
        .route(
            "/api/v1/exports/work-instructions",
            post(export_work_instructions),
        )
        .route("/api/v1/metrics", get(metrics))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_status(State(state): State<AppState>) -> ApiResult<Json<FleetStatus>> {
    Ok(Json(state.status.current().await))
}

async fn list_gateways(State(state): State<AppState>) -> ApiResult<Json<Vec<GatewayStatus>>> {
    let mut list = Vec::new();
    for gateway in state.registry().gateways().await {
        let pending = state.scheduler.pending_exports(&gateway.key());
        list.push(gateway.status(pending).await);
    }
    Ok(Json(list))
}

#[derive(Debug, Deserialize)]
struct UpdateGateway {
    /// 设施业务编号
    facility: String,
    #[serde(flatten)]
    config: GatewayConfig,
}

#[derive(Debug, Serialize)]
struct UpdateGatewayResponse {
    link_state: LinkState,
    gateway: GatewayStatus,
}

async fn update_gateway(
    State(state): State<AppState>,
    Path((facility_id, kind)): Path<(Uuid, String)>,
    Json(payload): Json<UpdateGateway>,
) -> ApiResult<Json<UpdateGatewayResponse>> {
    let kind = GatewayKind::parse(&kind)
        .ok_or_else(|| AppError::BadRequest(format!("unknown gateway kind {}", kind)))?;
    if payload.facility.trim().is_empty() {
        return Err(AppError::BadRequest("facility is required".to_string()));
    }

    let key = GatewayKey::new(facility_id, kind);
    let facility = FacilityRef::new(facility_id, payload.facility.trim());
    if state.registry().get(&key).await.is_none() {
        // 首次配置时补齐该设施其余类型的默认网关（未启用）
        let provisioned = state.registry().provision_defaults(facility.clone()).await;
        for gateway in provisioned.iter().filter(|g| g.kind() != kind) {
            state.validator.persist(gateway).await?;
        }
    }
    let gateway = state
        .registry()
        .upsert(facility, kind, payload.config.clone())
        .await;
    let link_state = state.validator.apply_config(&gateway, payload.config).await?;
    state.scheduler.refresh_status().await;
    info!(gateway = %key, link_state = ?link_state, "gateway configuration updated");
    record_gateway_update(kind, link_state);

    let pending = state.scheduler.pending_exports(&key);
    Ok(Json(UpdateGatewayResponse {
        link_state,
        gateway: gateway.status(pending).await,
    }))
}

async fn trigger_sync(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    state.scheduler.trigger_now()?;
    Ok((StatusCode::ACCEPTED, Json(json!({"status": "queued"}))))
}

#[derive(Debug, Deserialize)]
struct ExportWorkInstructions {
    facility_id: Uuid,
    #[serde(default)]
    kind: Option<String>,
    records: Vec<WorkInstructionRecord>,
}

async fn export_work_instructions(
    State(state): State<AppState>,
    Json(payload): Json<ExportWorkInstructions>,
) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    let kind = match payload.kind.as_deref() {
        None => GatewayKind::SftpWorkInstructions,
        Some(raw) => GatewayKind::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("unknown gateway kind {}", raw)))?,
    };
    let key = GatewayKey::new(payload.facility_id, kind);
    if state.registry().get(&key).await.is_none() {
        return Err(AppError::NotFound(format!("gateway {} not found", key)));
    }

    let content = write_work_instructions(&payload.records)?;
    state
        .scheduler
        .queue_export(key, WORK_INSTRUCTION_PREFIX, content)
        .await?;
    record_export(kind, payload.records.len());
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "records": payload.records.len(),
            "pending": state.scheduler.pending_exports(&key),
        })),
    ))
}

async fn metrics() -> Response {
    render_metrics()
}
