//! HTTP trigger for sync runs and the ledger read views
//!
//! The upstream auth layer identifies the caller with the `x-user-id` header.
//! A `Authorization: Bearer` header, when present, carries the provider token
//! of the caller's live session.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::{error, info};

use crate::clock;
use crate::commits::CommitRecord;
use crate::error::SyncError;
use crate::state::DailyStat;
use crate::sync::{SyncContext, SyncEngine, SyncSummary};

pub const USER_HEADER: &str = "x-user-id";

/// `{ success, data }` or `{ success: false, error }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub message: String,
    pub code: &'static str,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(err: &SyncError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiErrorBody {
                message: err.to_string(),
                code: err.code(),
            }),
        }
    }
}

/// A [`SyncError`] rendered as an error envelope
pub struct ApiFailure(pub SyncError);

impl From<SyncError> for ApiFailure {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(ApiResponse::failure(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiFailure>;

struct Caller {
    user_id: String,
    session_token: Option<String>,
}

fn caller(headers: &HeaderMap) -> Result<Caller, SyncError> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(SyncError::Unauthenticated)?;

    let session_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    Ok(Caller {
        user_id: user_id.to_string(),
        session_token,
    })
}

fn day_param(name: &str, value: Option<&str>) -> Result<NaiveDate, SyncError> {
    let value = value.ok_or_else(|| SyncError::Validation(format!("{} is required", name)))?;
    clock::parse_day(value)
        .ok_or_else(|| SyncError::Validation(format!("{} must be YYYY-MM-DD, got {}", name, value)))
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    from: Option<String>,
    to: Option<String>,
}

async fn handle_sync(State(engine): State<SyncEngine>, headers: HeaderMap) -> ApiResult<SyncSummary> {
    let caller = caller(&headers)?;
    let ctx = SyncContext::new(caller.user_id, Utc::now()).with_session_token(caller.session_token);
    let summary = engine.run(&ctx).await?;
    Ok(Json(ApiResponse::ok(summary)))
}

async fn handle_today(State(engine): State<SyncEngine>, headers: HeaderMap) -> ApiResult<SyncSummary> {
    let caller = caller(&headers)?;
    let summary = engine.today_summary(&caller.user_id, Utc::now())?;
    Ok(Json(ApiResponse::ok(summary)))
}

async fn handle_commits(
    State(engine): State<SyncEngine>,
    headers: HeaderMap,
    Query(query): Query<DateQuery>,
) -> ApiResult<Vec<CommitRecord>> {
    let caller = caller(&headers)?;
    let day = match query.date.as_deref() {
        Some(raw) => day_param("date", Some(raw))?,
        None => clock::logical_day(Utc::now()),
    };
    let commits = engine.commits_on(&caller.user_id, day)?;
    Ok(Json(ApiResponse::ok(commits)))
}

async fn handle_history(
    State(engine): State<SyncEngine>,
    headers: HeaderMap,
    Query(query): Query<RangeQuery>,
) -> ApiResult<BTreeMap<String, DailyStat>> {
    let caller = caller(&headers)?;
    let from = day_param("from", query.from.as_deref())?;
    let to = day_param("to", query.to.as_deref())?;
    let history = engine.history(&caller.user_id, from, to)?;
    Ok(Json(ApiResponse::ok(history)))
}

/// Routes served under `/api/commits`
pub fn router(engine: SyncEngine) -> Router {
    Router::new()
        .route("/api/commits/sync", post(handle_sync))
        .route("/api/commits/today", get(handle_today))
        .route("/api/commits", get(handle_commits))
        .route("/api/commits/history", get(handle_history))
        .with_state(engine)
}

/// Serve until ctrl-c
pub async fn serve(engine: SyncEngine, bind: &str) -> anyhow::Result<()> {
    use anyhow::Context;

    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_requires_user_header() {
        let headers = HeaderMap::new();
        assert!(matches!(caller(&headers), Err(SyncError::Unauthenticated)));
    }

    #[test]
    fn test_caller_reads_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, "user-1".parse().unwrap());
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer gho_live".parse().unwrap(),
        );

        let caller = caller(&headers).unwrap();
        assert_eq!(caller.user_id, "user-1");
        assert_eq!(caller.session_token.as_deref(), Some("gho_live"));
    }

    #[test]
    fn test_day_param_validation() {
        assert!(day_param("date", Some("2026-02-10")).is_ok());
        assert!(matches!(
            day_param("date", Some("10/02/2026")),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(day_param("from", None), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_failure_envelope() {
        let body = serde_json::to_value(ApiResponse::failure(&SyncError::Unauthenticated)).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
        assert!(body.get("data").is_none());

        let response = ApiFailure(SyncError::Validation("bad".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
