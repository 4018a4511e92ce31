//! Traced client for the items API.
//!
//! Every call opens a `frontend.<operation>` span and sends its context in
//! `traceparent`, so the backend's server span joins the same trace.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::items::Item;
use crate::observability::propagation::RequestBuilderExt;
use crate::observability::tracing::{global_tracer, set_attribute, Tracer};
use opentelemetry::trace::SpanKind;
use opentelemetry::KeyValue;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl ClientError {
    /// HTTP status returned by the backend, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            ClientError::Api { status, .. } => Some(*status),
        }
    }
}

/// Body for create and update calls.
#[derive(Debug, Clone, Serialize)]
pub struct NewItem {
    pub name: String,
    pub description: String,
}

impl NewItem {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct ItemsClient {
    http: Client,
    base_url: String,
    tracer: Tracer,
}

impl ItemsClient {
    /// Client using the global tracer. `base_url` is the backend root,
    /// e.g. `http://localhost:3000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_tracer(base_url, global_tracer())
    }

    pub fn with_tracer(base_url: impl Into<String>, tracer: Tracer) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tracer,
        })
    }

    fn items_url(&self) -> String {
        format!("{}/api/items", self.base_url)
    }

    fn item_url(&self, id: u64) -> String {
        format!("{}/api/items/{id}", self.base_url)
    }

    pub async fn get_items(&self) -> Result<Vec<Item>, ClientError> {
        self.tracer
            .in_span_with_kind(
                SpanKind::Client,
                "frontend.getItems",
                [KeyValue::new("operation", "getItems")],
                async {
                    let response = self.http.get(self.items_url()).with_trace_context().send().await?;
                    let items: Vec<Item> = check(response).await?.json().await?;
                    set_attribute("items.count", items.len() as i64);
                    tracing::info!(count = items.len(), "Fetched items");
                    Ok(items)
                },
            )
            .await
    }

    pub async fn get_item(&self, id: u64) -> Result<Item, ClientError> {
        self.tracer
            .in_span_with_kind(
                SpanKind::Client,
                "frontend.getItem",
                [
                    KeyValue::new("operation", "getItem"),
                    KeyValue::new("itemId", id as i64),
                ],
                async {
                    let response = self.http.get(self.item_url(id)).with_trace_context().send().await?;
                    let item: Item = check(response).await?.json().await?;
                    tracing::info!(item_id = item.id, "Fetched item");
                    Ok(item)
                },
            )
            .await
    }

    pub async fn create_item(&self, item: &NewItem) -> Result<Item, ClientError> {
        self.tracer
            .in_span_with_kind(
                SpanKind::Client,
                "frontend.createItem",
                [KeyValue::new("operation", "createItem")],
                async {
                    let response = self
                        .http
                        .post(self.items_url())
                        .json(item)
                        .with_trace_context()
                        .send()
                        .await?;
                    let created: Item = check(response).await?.json().await?;
                    set_attribute("itemId", created.id as i64);
                    tracing::info!(item_id = created.id, "Created item");
                    Ok(created)
                },
            )
            .await
    }

    pub async fn update_item(&self, id: u64, item: &NewItem) -> Result<Item, ClientError> {
        self.tracer
            .in_span_with_kind(
                SpanKind::Client,
                "frontend.updateItem",
                [
                    KeyValue::new("operation", "updateItem"),
                    KeyValue::new("itemId", id as i64),
                ],
                async {
                    let response = self
                        .http
                        .put(self.item_url(id))
                        .json(item)
                        .with_trace_context()
                        .send()
                        .await?;
                    let updated: Item = check(response).await?.json().await?;
                    tracing::info!(item_id = updated.id, "Updated item");
                    Ok(updated)
                },
            )
            .await
    }

    pub async fn delete_item(&self, id: u64) -> Result<(), ClientError> {
        self.tracer
            .in_span_with_kind(
                SpanKind::Client,
                "frontend.deleteItem",
                [
                    KeyValue::new("operation", "deleteItem"),
                    KeyValue::new("itemId", id as i64),
                ],
                async {
                    let response = self
                        .http
                        .delete(self.item_url(id))
                        .with_trace_context()
                        .send()
                        .await?;
                    check(response).await?;
                    tracing::info!(item_id = id, "Deleted item");
                    Ok(())
                },
            )
            .await
    }
}

/// Turn a non-2xx response into [`ClientError::Api`] with the backend's message.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    set_attribute("http.status_code", i64::from(status.as_u16()));
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
