//! GraphQL query transport for the juris sync pipeline.
//!
//! One request per invocation, no retry, no caching: the orchestrator
//! decides whether a failed fetch aborts the run (it always does).

use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "juris-client";

#[derive(Debug, Error)]
pub enum QueryError {
    /// Endpoint unreachable, connection refused, or request timed out.
    #[error("graphql endpoint unreachable: {0}")]
    Transport(#[source] reqwest::Error),
    /// Endpoint answered with a non-success HTTP status.
    #[error("graphql endpoint returned status {status}")]
    Protocol { status: u16 },
    /// Response body is not a well-formed GraphQL envelope.
    #[error("malformed graphql response: {0}")]
    Decode(#[source] serde_json::Error),
    /// Envelope parsed but carried no `data` payload.
    #[error("graphql response missing data payload")]
    MissingData,
}

#[derive(Debug, Clone)]
pub struct QueryClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for QueryClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/graphql".to_string(),
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug)]
pub struct QueryClient {
    client: reqwest::Client,
    endpoint: String,
}

impl QueryClient {
    pub fn new(config: QueryClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Execute one GraphQL query and decode the `data` payload into `T`.
    pub async fn execute<T: DeserializeOwned>(&self, query: &str) -> Result<T, QueryError> {
        debug!(endpoint = %self.endpoint, "executing graphql query");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(QueryError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Protocol {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(QueryError::Transport)?;
        decode_data(&body)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// Decode a GraphQL response body down to its `data` payload.
pub fn decode_data<T: DeserializeOwned>(body: &[u8]) -> Result<T, QueryError> {
    let envelope: Envelope<T> = serde_json::from_slice(body).map_err(QueryError::Decode)?;
    envelope.data.ok_or(QueryError::MissingData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as JsonValue;

    #[test]
    fn decodes_data_payload() {
        let body = br#"{"data":{"allClients":[{"id":"A1"}]}}"#;
        let data: JsonValue = decode_data(body).expect("decode");
        assert_eq!(data["allClients"][0]["id"], "A1");
    }

    #[test]
    fn missing_data_is_a_typed_error() {
        let body = br#"{"errors":[{"message":"boom"}]}"#;
        let result: Result<JsonValue, _> = decode_data(body);
        assert!(matches!(result, Err(QueryError::MissingData)));
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let result: Result<JsonValue, _> = decode_data(b"<html>nope</html>");
        assert!(matches!(result, Err(QueryError::Decode(_))));
    }

    #[test]
    fn default_config_points_at_local_endpoint() {
        let config = QueryClientConfig::default();
        assert_eq!(config.endpoint, "http://127.0.0.1:8080/graphql");
        assert_eq!(config.timeout, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let client = QueryClient::new(QueryClientConfig {
            // reserved TEST-NET-1 address, nothing listens there
            endpoint: "http://192.0.2.1:9/graphql".to_string(),
            timeout: Duration::from_millis(200),
            user_agent: None,
        })
        .expect("client");

        let result: Result<JsonValue, _> = client.execute("query { ping }").await;
        assert!(matches!(result, Err(QueryError::Transport(_))));
    }
}
