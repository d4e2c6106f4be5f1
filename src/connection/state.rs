//! Connection lifecycle state machine.
//!
//! ```text
//! Initialized --connect()--> Connecting --handshake ok--> Connected
//!      |                         |                            |
//!      +-------------------------+------ close / error -------+--> Disconnected
//! ```
//!
//! `Disconnected` is terminal.

use tokio::sync::watch;

use crate::error::Error;
use crate::message::CloseCode;

/// Why and how a connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Disconnect {
    /// The failure that ended the connection, if it did not close cleanly.
    pub cause: Option<Error>,
    /// Close code exchanged in the close handshake, if any.
    pub code: Option<CloseCode>,
    /// Close reason exchanged in the close handshake, if any.
    pub reason: Option<String>,
}

impl Disconnect {
    /// Ended by a failure, no close code was exchanged.
    #[must_use]
    pub fn error(cause: Error) -> Self {
        Self {
            cause: Some(cause),
            ..Self::default()
        }
    }

    /// Ended by a close handshake.
    #[must_use]
    pub fn closed(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            cause: None,
            code: Some(code),
            reason: Some(reason.into()),
        }
    }

    /// Attach the failure that led to the close.
    #[must_use]
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// WebSocket connection state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Created, `connect()` not called yet.
    #[default]
    Initialized,
    /// Opening the transport or waiting for the handshake response.
    Connecting,
    /// Handshake succeeded, frames flow both ways.
    Connected,
    /// Connection is over. Terminal.
    Disconnected(Disconnect),
}

impl ConnectionState {
    /// Check if sending data is allowed in this state.
    #[must_use]
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_))
    }

    /// The disconnect details, once terminal.
    #[must_use]
    pub fn disconnect(&self) -> Option<&Disconnect> {
        match self {
            ConnectionState::Disconnected(d) => Some(d),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Initialized => write!(f, "Initialized"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected(d) => match (&d.code, &d.cause) {
                (Some(code), _) => write!(f, "Disconnected({code})"),
                (None, Some(cause)) => write!(f, "Disconnected({cause})"),
                (None, None) => write!(f, "Disconnected"),
            },
        }
    }
}

/// Single-writer, multi-reader cell holding the connection state.
///
/// Every transition goes through here so the forward-only rule holds no
/// matter which task discovers a terminal condition first.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Initialized);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub(crate) fn get(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// `Initialized -> Connecting`. Returns the state found if it was not
    /// `Initialized`.
    pub(crate) fn begin_connect(&self) -> Result<(), ConnectionState> {
        let mut found = None;
        self.tx.send_if_modified(|state| {
            if matches!(state, ConnectionState::Initialized) {
                *state = ConnectionState::Connecting;
                true
            } else {
                found = Some(state.clone());
                false
            }
        });
        found.map_or(Ok(()), Err)
    }

    /// `Connecting -> Connected`. False if the connection was closed meanwhile.
    pub(crate) fn set_connected(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(state, ConnectionState::Connecting) {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Move to `Disconnected` unless already there. True if this call made
    /// the transition.
    pub(crate) fn disconnect(&self, disconnect: Disconnect) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = ConnectionState::Disconnected(disconnect);
                true
            }
        })
    }
}
