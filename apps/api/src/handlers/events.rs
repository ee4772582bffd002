use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::Value;
use trellis_application::IngestEventInput;
use trellis_core::EventId;

use crate::dto::{IngestEventRequest, IngestEventResponse};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn ingest_event_handler(
    State(state): State<AppState>,
    Json(payload): Json<IngestEventRequest>,
) -> ApiResult<(StatusCode, Json<IngestEventResponse>)> {
    let payload_value = match payload.payload {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };

    let routed = state
        .event_router
        .route(IngestEventInput {
            id: payload.id.map(EventId::from_uuid),
            event_type: payload.event_type,
            source: payload.source.unwrap_or_else(|| "api".to_owned()),
            payload: payload_value,
        })
        .await?;

    state.drain_inline_jobs().await;

    Ok((StatusCode::ACCEPTED, Json(IngestEventResponse::from(routed))))
}
