//! Subgraph Indexer Access
//!
//! Thin GraphQL-over-HTTP client for the protocol subgraph and the blocks
//! subgraph. Query strings live in [`queries`], payload shapes in [`types`].
//!
//! Everything above this module talks to the [`Subgraph`] trait so tests can
//! answer queries from canned JSON.

pub mod queries;
pub mod types;

use async_trait::async_trait;
use eyre::{eyre, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};

/// Anything that can answer a GraphQL query with its `data` object
#[async_trait]
pub trait Subgraph: Send + Sync {
    async fn query_value(&self, query: &str) -> Result<Value>;
}

/// Run a query and deserialize its `data` into `T`
pub async fn query<T: DeserializeOwned>(subgraph: &dyn Subgraph, query: &str) -> Result<T> {
    let data = subgraph.query_value(query).await?;
    serde_json::from_value(data).map_err(|e| eyre!("unexpected subgraph payload: {}", e))
}

// ============================================
// HTTP CLIENT
// ============================================

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// GraphQL endpoint reached over HTTP POST
pub struct GraphqlClient {
    client: Client,
    endpoint: String,
}

impl GraphqlClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Subgraph for GraphqlClient {
    async fn query_value(&self, query: &str) -> Result<Value> {
        trace!("GraphQL query to {}: {}", self.endpoint, query);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| eyre!("subgraph request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(eyre!("subgraph returned HTTP {}", status));
        }

        let body: GraphqlResponse = response.json().await?;
        if let Some(first) = body.errors.first() {
            debug!("Subgraph reported {} error(s)", body.errors.len());
            return Err(eyre!("subgraph error: {}", first.message));
        }

        body.data.ok_or_else(|| eyre!("subgraph response had no data"))
    }
}
