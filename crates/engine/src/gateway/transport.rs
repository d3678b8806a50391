// Gateway transport: how edit requests reach the server.
//
// Abstracted via `GatewayTransport` for testability; the production
// implementation is a blocking reqwest client. A 409/412 is not a transport
// failure — it is a well-formed conflict response the edit client handles.

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use url::Url;

use marginalia_common::protocol::gateway::{GatewayAccepted, GatewayConflict, GatewayRequest};

/// What the gateway said about one submitted request.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    Accepted(GatewayAccepted),
    Conflict(GatewayConflict),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("gateway unreachable: {0}")]
    Unreachable(String),
    #[error("malformed gateway response: {0}")]
    Malformed(String),
    #[error("unexpected gateway status: {status}")]
    UnexpectedStatus { status: u16 },
    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),
}

/// Abstraction over the network transport for testability.
///
/// In tests this is a scripted fake that records submissions.
pub trait GatewayTransport {
    fn submit(&mut self, request: &GatewayRequest) -> Result<GatewayOutcome, TransportError>;
}

/// Production transport: JSON POST over HTTP.
pub struct HttpGatewayTransport {
    client: reqwest::blocking::Client,
    endpoint: Url,
}

impl HttpGatewayTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = validate_gateway_url(endpoint)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TransportError::Unreachable(error.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

impl GatewayTransport for HttpGatewayTransport {
    fn submit(&mut self, request: &GatewayRequest) -> Result<GatewayOutcome, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .map_err(|error| TransportError::Unreachable(error.to_string()))?;

        let status = response.status().as_u16();
        debug!(request_id = %request.request_id, status, "gateway responded");
        match status {
            200 => {
                let accepted: GatewayAccepted = response
                    .json()
                    .map_err(|error| TransportError::Malformed(error.to_string()))?;
                Ok(GatewayOutcome::Accepted(accepted))
            }
            409 | 412 => {
                let conflict: GatewayConflict = response
                    .json()
                    .map_err(|error| TransportError::Malformed(error.to_string()))?;
                Ok(GatewayOutcome::Conflict(conflict))
            }
            other => Err(TransportError::UnexpectedStatus { status: other }),
        }
    }
}

fn validate_gateway_url(value: &str) -> Result<Url, TransportError> {
    let parsed = Url::parse(value)
        .map_err(|error| TransportError::InvalidUrl(format!("`{value}`: {error}")))?;
    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" if is_loopback_host(parsed.host_str()) => Ok(parsed),
        _ => Err(TransportError::InvalidUrl(
            "gateway url must use https (http is allowed only for localhost testing)".to_string(),
        )),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}
