//! Model discovery for `GET /v1/models`.
//!
//! The listing is read from the upstream's Ollama-style `/api/tags`. The
//! port is a trait so the router can be tested without a live upstream.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// Bound on the tag probe; a slow upstream must not stall discovery.
pub const TAGS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of the model names advertised to clients.
#[async_trait]
pub trait ModelCatalog: Send + Sync + fmt::Debug {
    /// Names of the models the upstream can serve.
    ///
    /// Failures are absorbed: an unreachable source yields an empty list
    /// and the caller falls back to its default model.
    async fn list_model_names(&self) -> Vec<String>;
}

/// Catalog backed by `GET <upstream>/api/tags`.
#[derive(Debug, Clone)]
pub struct UpstreamCatalog {
    client: Client,
    tags_url: String,
}

impl UpstreamCatalog {
    pub const fn new(client: Client, tags_url: String) -> Self {
        Self { client, tags_url }
    }
}

#[async_trait]
impl ModelCatalog for UpstreamCatalog {
    async fn list_model_names(&self) -> Vec<String> {
        let response = match self
            .client
            .get(&self.tags_url)
            .timeout(TAGS_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(status = %response.status(), "Tag probe rejected");
                return Vec::new();
            }
            Err(e) => {
                debug!("Tag probe failed: {e}");
                return Vec::new();
            }
        };

        match response.json::<Value>().await {
            Ok(body) => model_names_from_tags(&body),
            Err(e) => {
                debug!("Tag probe returned unreadable body: {e}");
                Vec::new()
            }
        }
    }
}

/// Fixed list of names, used when discovery should not touch the network.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    names: Vec<String>,
}

impl StaticCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ModelCatalog for StaticCatalog {
    async fn list_model_names(&self) -> Vec<String> {
        self.names.clone()
    }
}

/// Pull `models[].name` (or `models[].model`) out of a tags body.
pub fn model_names_from_tags(body: &Value) -> Vec<String> {
    body.get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|m| {
                    m.get("name")
                        .or_else(|| m.get("model"))
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}
