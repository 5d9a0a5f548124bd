//! Best-effort HTTP negotiation client.

use crate::core::constants::{NEGOTIATE_PATH, NEGOTIATE_TIMEOUT};

use super::plan::{NegotiationPlan, RawNegotiateResponse, TransportKind};

/// Derive the negotiation URL from the fallback socket endpoint's host.
///
/// `wss`/`https` schemes keep TLS; everything else (including a bare
/// `host:port`) negotiates over plain HTTP.
pub fn negotiate_url(fallback_endpoint: &str) -> Option<String> {
    let (scheme, rest) = match fallback_endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("", fallback_endpoint),
    };

    let authority = rest.split('/').next()?.trim();
    if authority.is_empty() {
        return None;
    }

    let http_scheme = match scheme {
        "wss" | "https" => "https",
        _ => "http",
    };

    Some(format!("{http_scheme}://{authority}{NEGOTIATE_PATH}"))
}

/// Queries the server for an ordered transport preference list,
/// per-transport availability, and an ephemeral credential.
///
/// Strictly best-effort: every failure path yields `None` so the caller
/// proceeds with default ordering. No shared state is mutated.
#[derive(Debug, Clone)]
pub struct NegotiationClient {
    http: reqwest::Client,
}

impl NegotiationClient {
    /// Create a negotiation client with a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Create a negotiation client reusing an existing HTTP client.
    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Issue one metadata request derived from the fallback endpoint's
    /// host. The preferred order, when given, is forwarded as a hint.
    pub async fn negotiate(
        &self,
        preferred: Option<&[TransportKind]>,
        fallback_endpoint: &str,
    ) -> Option<NegotiationPlan> {
        let url = negotiate_url(fallback_endpoint)?;

        let mut request = self.http.get(&url).timeout(NEGOTIATE_TIMEOUT);
        if let Some(order) = preferred
            && !order.is_empty()
        {
            let hint: Vec<&str> = order.iter().map(|k| k.as_str()).collect();
            request = request.query(&[("prefer", hint.join(","))]);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(%url, error = %err, "negotiation request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(%url, status = %response.status(), "negotiation rejected");
            return None;
        }

        match response.json::<RawNegotiateResponse>().await {
            Ok(raw) => Some(raw.into_plan()),
            Err(err) => {
                tracing::debug!(%url, error = %err, "malformed negotiation response");
                None
            }
        }
    }
}

impl Default for NegotiationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_url_from_bare_authority() {
        assert_eq!(
            negotiate_url("game.example.com:7777"),
            Some("http://game.example.com:7777/negotiate".to_string())
        );
    }

    #[test]
    fn test_negotiate_url_keeps_tls() {
        assert_eq!(
            negotiate_url("wss://game.example.com/play"),
            Some("https://game.example.com/negotiate".to_string())
        );
        assert_eq!(
            negotiate_url("ws://game.example.com:8080/play"),
            Some("http://game.example.com:8080/negotiate".to_string())
        );
    }

    #[test]
    fn test_negotiate_url_rejects_empty() {
        assert_eq!(negotiate_url(""), None);
        assert_eq!(negotiate_url("wss://"), None);
    }

    #[tokio::test]
    async fn test_negotiate_failure_yields_none() {
        // Nothing listens on this port; the request must fold into None,
        // never an error.
        let client = NegotiationClient::new();
        let plan = client.negotiate(None, "127.0.0.1:9").await;
        assert!(plan.is_none());
    }
}
