//! Session connection state machine.

use std::fmt;

use tokio::sync::watch;

use crate::negotiate::TransportKind;

/// Where a session is in its connection lifecycle.
///
/// `Disconnected` means an established connection dropped; `Failed`
/// means every transport in the fallback order was tried and none
/// connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection attempt has started.
    Idle,
    /// Querying the server for transport metadata.
    Negotiating,
    /// Attempting one transport.
    Connecting(TransportKind),
    /// Established over the given transport.
    Connected(TransportKind),
    /// An established connection dropped.
    Disconnected,
    /// The whole fallback order was exhausted.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Negotiating => write!(f, "negotiating"),
            Self::Connecting(kind) => write!(f, "connecting({kind})"),
            Self::Connected(kind) => write!(f, "connected({kind})"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Shared, observable session state.
///
/// Backed by a watch channel: writers overwrite, readers see the latest
/// value and can await changes without polling.
#[derive(Debug, Clone)]
pub struct SessionStateHandle {
    tx: watch::Sender<SessionState>,
}

impl SessionStateHandle {
    /// A handle starting at [`SessionState::Idle`].
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self { tx }
    }

    /// Transition to a new state.
    pub fn set(&self, state: SessionState) {
        if self.tx.send_if_modified(|current| {
            let changed = *current != state;
            if changed {
                *current = state;
            }
            changed
        }) {
            tracing::debug!(%state, "session state changed");
        }
    }

    /// The current state.
    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// A receiver that observes every subsequent transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl Default for SessionStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let handle = SessionStateHandle::new();
        assert_eq!(handle.current(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let handle = SessionStateHandle::new();
        let mut rx = handle.subscribe();

        handle.set(SessionState::Connecting(TransportKind::Socket));
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow(),
            SessionState::Connecting(TransportKind::Socket)
        );

        handle.set(SessionState::Connected(TransportKind::Socket));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionState::Connected(TransportKind::Socket));
    }

    #[test]
    fn test_display_names_transport() {
        let state = SessionState::Connected(TransportKind::PeerToPeer);
        assert_eq!(state.to_string(), "connected(peer-to-peer)");
    }
}
