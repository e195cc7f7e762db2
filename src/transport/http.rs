//! JSON-over-HTTP transport.
//!
//! `POST {address}/dapi/v1/call` with a [`RemoteCall`] body answers with a
//! [`NodeOutcome`]; `DELETE {address}/dapi/v1/call/{request_id}` asks the
//! node to drop a call.
//!
//! Only the client half lives here. Each node's API server owns the
//! endpoint: it decodes the body and passes it to
//! [`NodeService::handle`](crate::router::NodeService::handle), and routes
//! the `DELETE` to [`NodeService::cancel`](crate::router::NodeService::cancel).

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::cluster::NodeInfo;
use crate::types::NodeOutcome;

use super::{RemoteCall, RemoteTransport, TransportError};

/// Path of the call endpoint, relative to a node's base address.
pub const CALL_PATH: &str = "dapi/v1/call";

/// Transport posting calls to each node's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the given connect timeout.
    ///
    /// The router applies the per-call timeout itself; this one only bounds
    /// connection setup.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the HTTP client cannot be built.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Connect {
                node: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Resolve the call endpoint for `node`, optionally for one request.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoAddress`] or [`TransportError::Connect`]
    /// for a missing or unparsable address.
    pub fn endpoint(node: &NodeInfo, request_id: Option<Uuid>) -> Result<Url, TransportError> {
        let address = node
            .address
            .as_deref()
            .ok_or_else(|| TransportError::NoAddress(node.name.clone()))?;
        let invalid = |e: url::ParseError| TransportError::Connect {
            node: node.name.clone(),
            reason: format!("invalid address '{address}': {e}"),
        };
        // Join against a trailing-slash base so a path prefix is kept.
        let base = if address.ends_with('/') {
            Url::parse(address)
        } else {
            Url::parse(&format!("{address}/"))
        }
        .map_err(invalid)?;
        let path = match request_id {
            Some(id) => format!("{CALL_PATH}/{id}"),
            None => CALL_PATH.to_owned(),
        };
        base.join(&path).map_err(invalid)
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn call(&self, node: &NodeInfo, call: RemoteCall) -> Result<NodeOutcome, TransportError> {
        let url = Self::endpoint(node, None)?;
        debug!(node = %node.name, %url, operation = %call.operation_id, "sending remote call");

        let response = self
            .client
            .post(url)
            .json(&call)
            .send()
            .await
            .map_err(|e| TransportError::Connect {
                node: node.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Protocol {
                node: node.name.clone(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let mut outcome: NodeOutcome =
            response
                .json()
                .await
                .map_err(|e| TransportError::Protocol {
                    node: node.name.clone(),
                    reason: format!("invalid outcome body: {e}"),
                })?;
        // The outcome is attributed to the node we addressed.
        outcome.node = node.name.clone();
        Ok(outcome)
    }

    async fn cancel(&self, node: &NodeInfo, request_id: Uuid) -> Result<(), TransportError> {
        let url = Self::endpoint(node, Some(request_id))?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| TransportError::Connect {
                node: node.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Protocol {
                node: node.name.clone(),
                reason: format!("cancel of {request_id} rejected: HTTP {status}: {body}"),
            });
        }
        Ok(())
    }
}
