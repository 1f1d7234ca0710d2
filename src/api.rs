//! HTTP facade exposing the decoded process state for remote polling.
//!
//! One route, `GET /v1/stats`, reads a fresh snapshot through the shared
//! controller and returns it as JSON with the run status rendered as its
//! display name (e.g. "RUN"). Controller errors pass through as 502 with
//! the error chain in the body; their meaning is not reinterpreted here.
//!
//! The controller is not reentrant, so concurrent requests serialize on a
//! mutex and the blocking Modbus work runs on a blocking thread.

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use pxu_lib::client::Pxu;
use pxu_lib::protocol::Stats;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

type SharedPxu = Arc<Mutex<Pxu>>;

struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("stats request failed: {:#}", self.0);
        let body = Json(serde_json::json!({ "error": format!("{:#}", self.0) }));
        (StatusCode::BAD_GATEWAY, body).into_response()
    }
}

async fn get_stats(State(pxu): State<SharedPxu>) -> Result<Json<Stats>, ApiError> {
    let stats = tokio::task::spawn_blocking(move || pxu.lock().unwrap().read_stats())
        .await
        .map_err(|e| ApiError(anyhow::Error::new(e)))?
        .map_err(|e| ApiError(anyhow::Error::new(e)))?;
    Ok(Json(stats))
}

/// Serves the stats API until the process is terminated.
pub async fn serve(listen: SocketAddr, pxu: Pxu) -> Result<()> {
    let shared: SharedPxu = Arc::new(Mutex::new(pxu));
    let app = Router::new()
        .route("/v1/stats", get(get_stats))
        .with_state(shared);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("serving stats API on {listen}");
    axum::serve(listener, app).await?;
    Ok(())
}
