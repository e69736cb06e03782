use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::scheduler::ActiveLock;
use crate::views::{NodeLiveness, OnDemandRepairJobView, ScheduledRepairJobView, TableRepairMetrics};
use crate::web::AppState;

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Deserialize)]
pub struct TableQuery {
    pub keyspace: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub host_id: Uuid,
    pub scheduled_tables: usize,
    pub running_tasks: usize,
    pub shutting_down: bool,
    /// Absent when the management interface cannot be queried.
    pub nodes: Option<NodeLiveness>,
}

pub async fn health(State(state): State<AppState>) -> ApiResult<HealthSummary> {
    let scheduled_tables = state.scheduler.scheduled_views().await.len();
    let nodes = match state.scheduler.node_liveness().await {
        Ok(nodes) => Some(nodes),
        Err(e) => {
            warn!("Failed to query node liveness: {}", e);
            None
        }
    };
    Ok(Json(ApiResponse::success(HealthSummary {
        host_id: state.scheduler.settings().host_id,
        scheduled_tables,
        running_tasks: state.scheduler.running_tasks(),
        shutting_down: state.scheduler.is_shutting_down(),
        nodes,
    })))
}

pub async fn get_schedules(State(state): State<AppState>) -> ApiResult<Vec<ScheduledRepairJobView>> {
    Ok(Json(ApiResponse::success(
        state.scheduler.scheduled_views().await,
    )))
}

pub async fn get_schedule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<ScheduledRepairJobView> {
    match state.scheduler.scheduled_view(id).await {
        Some(view) => Ok(Json(ApiResponse::success(view))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Schedule {} not found", id))),
        )),
    }
}

pub async fn get_schedule_metrics(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<TableRepairMetrics> {
    match state.scheduler.table_metrics(id).await {
        Ok(Some(metrics)) => Ok(Json(ApiResponse::success(metrics))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Schedule {} not found", id))),
        )),
        Err(e) => {
            error!("Failed to read repair metrics of schedule {}: {}", id, e);
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::error(e.to_string())),
            ))
        }
    }
}

pub async fn get_repairs(State(state): State<AppState>) -> ApiResult<Vec<OnDemandRepairJobView>> {
    Ok(Json(ApiResponse::success(
        state.scheduler.on_demand_views().await,
    )))
}

pub async fn trigger_repair(
    Query(query): Query<TableQuery>,
    State(state): State<AppState>,
) -> ApiResult<OnDemandRepairJobView> {
    let table = match state
        .scheduler
        .find_table(&query.keyspace, &query.table)
        .await
    {
        Some(table) => table,
        None => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error(format!(
                    "Table {}.{} is not managed by this node",
                    query.keyspace, query.table
                ))),
            ))
        }
    };

    match state.scheduler.schedule_on_demand(table).await {
        Ok(view) => {
            info!("On-demand repair {} queued via API", view.id);
            let message = format!("Repair of {} queued", view.table);
            Ok(Json(ApiResponse::success_with_message(view, message)))
        }
        Err(e) => {
            error!(
                "Failed to queue repair of {}.{}: {}",
                query.keyspace, query.table, e
            );
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            ))
        }
    }
}

pub async fn get_active_locks(State(state): State<AppState>) -> ApiResult<Vec<ActiveLock>> {
    Ok(Json(ApiResponse::success(state.scheduler.active_locks())))
}
