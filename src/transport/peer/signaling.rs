//! HTTP signaling for peer connection setup.
//!
//! The client posts a session-description offer listing its local UDP
//! candidates, and the rendezvous server answers with the remote peer's
//! description plus any candidates it has gathered so far. Candidates
//! may also trickle in through a second endpoint while probing runs.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::core::SignalingError;
use crate::core::constants::{RTC_ICE_PATH, RTC_OFFER_PATH};

#[derive(Debug, Serialize)]
struct SessionDescription<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    sdp: &'a str,
}

#[derive(Debug, Serialize)]
struct OfferRequest<'a> {
    room_id: &'a str,
    peer_id: &'a str,
    offer: SessionDescription<'a>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AnswerDescription {
    pub sdp: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct OfferResponse {
    #[serde(default)]
    pub success: bool,
    pub answer: Option<AnswerDescription>,
    #[serde(default)]
    pub ice_candidates: Vec<IceCandidate>,
}

/// One transport address advertised by a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate line, either a bare `ip:port` or an ICE
    /// `candidate:...` attribute string.
    pub candidate: String,
    /// Media stream identification tag, carried through untouched.
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description this candidate belongs to.
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
    /// ICE username fragment of the advertising peer.
    #[serde(rename = "usernameFragment", skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Wrap a bare address as a candidate.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            candidate: addr.to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct IceRequest<'a> {
    room_id: &'a str,
    peer_id: &'a str,
    candidate: &'a IceCandidate,
}

/// Client for the rendezvous server's offer/candidate endpoints.
#[derive(Debug, Clone)]
pub(super) struct SignalingClient {
    http: reqwest::Client,
    base: String,
}

impl SignalingClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into(),
        }
    }

    /// Post the local offer and wait for the remote answer.
    pub async fn post_offer(
        &self,
        room_id: &str,
        peer_id: &str,
        sdp: &str,
    ) -> Result<OfferResponse, SignalingError> {
        let url = format!("{}{RTC_OFFER_PATH}", self.base.trim_end_matches('/'));
        let body = OfferRequest {
            room_id,
            peer_id,
            offer: SessionDescription { kind: "offer", sdp },
        };

        let response: OfferResponse = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success || response.answer.is_none() {
            return Err(SignalingError::Rejected);
        }
        Ok(response)
    }

    /// Trickle one locally discovered candidate to the remote side.
    pub async fn post_candidate(
        &self,
        room_id: &str,
        peer_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        let url = format!("{}{RTC_ICE_PATH}", self.base.trim_end_matches('/'));
        let body = IceRequest {
            room_id,
            peer_id,
            candidate,
        };

        self.http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Build a minimal offer SDP advertising the given local candidates.
pub(super) fn build_offer_sdp(ufrag: &str, candidates: &[SocketAddr]) -> String {
    let mut sdp = String::from("v=0\r\ns=-\r\nm=application 9 UDP 0\r\n");
    sdp.push_str(&format!("a=ice-ufrag:{ufrag}\r\n"));
    for (i, addr) in candidates.iter().enumerate() {
        sdp.push_str(&format!(
            "a=candidate:{} 1 udp {} {} {} typ host\r\n",
            i + 1,
            u32::MAX - i as u32,
            addr.ip(),
            addr.port()
        ));
    }
    sdp
}

/// Extract candidate addresses from an answer SDP's `a=candidate` lines.
pub(super) fn parse_sdp_candidates(sdp: &str) -> Vec<SocketAddr> {
    sdp.lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("a=candidate:")
                .and_then(parse_candidate_addr)
        })
        .collect()
}

/// Pull the transport address out of a candidate string.
///
/// Accepts either a bare `ip:port` or an ICE candidate attribute, where
/// the address is an IP token immediately followed by a port token.
pub(super) fn parse_candidate_addr(candidate: &str) -> Option<SocketAddr> {
    if let Ok(addr) = candidate.trim().parse::<SocketAddr>() {
        return Some(addr);
    }

    let tokens: Vec<&str> = candidate.split_whitespace().collect();
    for pair in tokens.windows(2) {
        if let Ok(ip) = pair[0].parse::<IpAddr>()
            && let Ok(port) = pair[1].parse::<u16>()
        {
            return Some(SocketAddr::new(ip, port));
        }
    }
    None
}
