//! Caller identity extraction for promo bookkeeping.
//!
//! Picks up the device identifier advertised by the client and the network
//! address the proxy saw the request from. Turning either into the
//! pseudonymous device key is the voucher engine's job; raw values never
//! reach the stored document.

use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub device_id: Option<String>,
    pub client_ip: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let device_id = header_value(parts, "X-Device-Id");

        // Behind a reverse proxy the client is the first hop in the
        // forwarding chain, not the peer address.
        let client_ip = header_value(parts, "x-forwarded-for")
            .and_then(|chain| {
                chain
                    .split(',')
                    .next()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .or_else(|| header_value(parts, "x-real-ip"));

        Ok(ClientIdentity {
            device_id,
            client_ip,
        })
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
