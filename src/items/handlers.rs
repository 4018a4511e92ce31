//! Items API handlers.
//!
//! Each handler runs its work inside a named span so the store call, its
//! simulated latency and any logs it emits hang off the request span.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::items::store::{Item, ItemFields};
use crate::observability::tracing::set_attribute;
use opentelemetry::KeyValue;

/// Create/update payload. Fields are optional so that missing values are
/// reported as a validation error rather than a deserialization one.
#[derive(Debug, Default, Deserialize)]
pub struct ItemPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ItemPayload {
    /// Both fields present and non-empty.
    pub fn validate(self) -> Result<ItemFields, ApiError> {
        match (self.name, self.description) {
            (Some(name), Some(description)) if !name.is_empty() && !description.is_empty() => {
                Ok(ItemFields { name, description })
            }
            _ => Err(ApiError::Validation),
        }
    }
}

/// Non-numeric ids cannot match any item.
fn parse_id(raw: &str) -> Result<u64, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

fn parse_body(body: Result<Json<ItemPayload>, JsonRejection>) -> Result<ItemPayload, ApiError> {
    body.map(|Json(payload)| payload)
        .map_err(|rejection| ApiError::InvalidBody(rejection.body_text()))
}

pub async fn list_items(State(state): State<AppState>) -> Result<Json<Vec<Item>>, ApiError> {
    state
        .tracer
        .in_span(
            "get-all-items",
            [KeyValue::new("operation", "getAll")],
            async {
                tracing::info!("Fetching all items");
                let items = state.store.list().await;
                set_attribute("items.count", items.len() as i64);
                tracing::info!(count = items.len(), "Items fetched");
                Ok(Json(items))
            },
        )
        .await
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Item>, ApiError> {
    state
        .tracer
        .in_span(
            "get-item-by-id",
            [
                KeyValue::new("operation", "getById"),
                KeyValue::new("item.id", raw_id.clone()),
            ],
            async {
                tracing::info!(item_id = %raw_id, "Fetching item");
                let id = parse_id(&raw_id).inspect_err(ApiError::record)?;
                let item = state
                    .store
                    .get(id)
                    .await
                    .ok_or(ApiError::NotFound)
                    .inspect_err(ApiError::record)?;
                Ok(Json(item))
            },
        )
        .await
}

pub async fn create_item(
    State(state): State<AppState>,
    body: Result<Json<ItemPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Item>), ApiError> {
    state
        .tracer
        .in_span(
            "create-item",
            [KeyValue::new("operation", "create")],
            async {
                let fields = parse_body(body)
                    .and_then(ItemPayload::validate)
                    .inspect_err(ApiError::record)?;
                let item = state.store.create(fields).await;
                set_attribute("item.id", item.id as i64);
                tracing::info!(item_id = item.id, name = %item.name, "Item created");
                Ok((StatusCode::CREATED, Json(item)))
            },
        )
        .await
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Result<Json<ItemPayload>, JsonRejection>,
) -> Result<Json<Item>, ApiError> {
    state
        .tracer
        .in_span(
            "update-item",
            [
                KeyValue::new("operation", "update"),
                KeyValue::new("item.id", raw_id.clone()),
            ],
            async {
                let fields = parse_body(body)
                    .and_then(ItemPayload::validate)
                    .inspect_err(ApiError::record)?;
                let id = parse_id(&raw_id).inspect_err(ApiError::record)?;
                let item = state
                    .store
                    .update(id, fields)
                    .await
                    .ok_or(ApiError::NotFound)
                    .inspect_err(ApiError::record)?;
                tracing::info!(item_id = item.id, "Item updated");
                Ok(Json(item))
            },
        )
        .await
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .tracer
        .in_span(
            "delete-item",
            [
                KeyValue::new("operation", "delete"),
                KeyValue::new("item.id", raw_id.clone()),
            ],
            async {
                let id = parse_id(&raw_id).inspect_err(ApiError::record)?;
                if !state.store.delete(id).await {
                    let error = ApiError::NotFound;
                    error.record();
                    return Err(error);
                }
                tracing::info!(item_id = id, "Item deleted");
                Ok(StatusCode::NO_CONTENT)
            },
        )
        .await
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}

/// Always fails, for exercising error telemetry end to end.
pub async fn simulated_error(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state
        .tracer
        .in_span(
            "simulated-error",
            [KeyValue::new("operation", "simulateError")],
            async {
                let error = ApiError::Simulated;
                error.record();
                Err(error)
            },
        )
        .await
}

/// Prometheus scrape output.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(name: Option<&str>, description: Option<&str>) -> ItemPayload {
        ItemPayload {
            name: name.map(String::from),
            description: description.map(String::from),
        }
    }

    #[test]
    fn test_validate_requires_both_fields() {
        assert!(payload(Some("a"), Some("b")).validate().is_ok());
        assert!(matches!(payload(None, Some("b")).validate(), Err(ApiError::Validation)));
        assert!(matches!(payload(Some("a"), None).validate(), Err(ApiError::Validation)));
        assert!(matches!(payload(Some(""), Some("b")).validate(), Err(ApiError::Validation)));
        assert!(matches!(ItemPayload::default().validate(), Err(ApiError::Validation)));
    }

    #[test]
    fn test_non_numeric_id_is_not_found() {
        assert!(matches!(parse_id("abc"), Err(ApiError::NotFound)));
        assert!(matches!(parse_id("-1"), Err(ApiError::NotFound)));
        assert_eq!(parse_id("42").unwrap(), 42);
    }
}
