//! Realtime connection status.
//!
//! Transport is out of scope here; whatever owns the push channel reports its
//! state through a [`ConnectionMonitor`], and a reconnect after an interruption
//! turns into a [`SyncTrigger::Reconnect`].

use std::fmt;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};

use super::triggers::SyncTrigger;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
    Error {
        message: String,
    },
}

impl ConnectionStatus {
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn can_transition_to(&self, next: &Self) -> bool {
        use ConnectionStatus::{Connected, Connecting, Disconnected, Error, Reconnecting};
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected | Error { .. } | Disconnected)
                | (Connected, Reconnecting { .. } | Disconnected | Error { .. })
                | (
                    Reconnecting { .. },
                    Connected | Reconnecting { .. } | Error { .. } | Disconnected
                )
                | (Error { .. }, Connecting | Disconnected)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Shared, observable connection status
#[derive(Debug)]
pub struct ConnectionMonitor {
    status: watch::Sender<ConnectionStatus>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self { status }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Move to `next`. Returns a reconnect trigger when a dropped connection
    /// comes back, since changes may have been missed while it was down.
    pub fn transition(&self, next: ConnectionStatus) -> Result<Option<SyncTrigger>> {
        let current = self.status();
        if !current.can_transition_to(&next) {
            return Err(Error::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        let trigger = matches!(
            (&current, &next),
            (ConnectionStatus::Reconnecting { .. }, ConnectionStatus::Connected)
        )
        .then_some(SyncTrigger::Reconnect);

        tracing::debug!(from = %current, to = %next, "Realtime status changed");
        self.status.send_replace(next);
        Ok(trigger)
    }
}

/// Forward reconnect events from a status watch into a trigger queue.
///
/// Ends when either side closes.
pub async fn forward_reconnects(
    mut status: watch::Receiver<ConnectionStatus>,
    triggers: mpsc::Sender<SyncTrigger>,
) {
    let mut previous = status.borrow_and_update().clone();
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        let reconnected = matches!(previous, ConnectionStatus::Reconnecting { .. })
            && current.is_connected();
        if reconnected && triggers.send(SyncTrigger::Reconnect).await.is_err() {
            break;
        }
        previous = current;
    }
    tracing::debug!("Reconnect forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reconnect_after_drop_requests_sync() {
        let monitor = ConnectionMonitor::new();
        assert_eq!(monitor.transition(ConnectionStatus::Connecting).unwrap(), None);
        assert_eq!(monitor.transition(ConnectionStatus::Connected).unwrap(), None);
        assert_eq!(
            monitor
                .transition(ConnectionStatus::Reconnecting { attempt: 1 })
                .unwrap(),
            None
        );
        assert_eq!(
            monitor
                .transition(ConnectionStatus::Reconnecting { attempt: 2 })
                .unwrap(),
            None
        );
        assert_eq!(
            monitor.transition(ConnectionStatus::Connected).unwrap(),
            Some(SyncTrigger::Reconnect)
        );
        assert!(monitor.status().is_connected());
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let monitor = ConnectionMonitor::new();
        let error = monitor
            .transition(ConnectionStatus::Connected)
            .unwrap_err();
        assert!(matches!(error, Error::InvalidTransition { .. }));
        assert_eq!(monitor.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn error_state_recovers_through_connecting() {
        let monitor = ConnectionMonitor::new();
        monitor.transition(ConnectionStatus::Connecting).unwrap();
        monitor
            .transition(ConnectionStatus::Error {
                message: "refused".to_string(),
            })
            .unwrap();
        assert!(monitor.transition(ConnectionStatus::Connected).is_err());
        monitor.transition(ConnectionStatus::Connecting).unwrap();
        monitor.transition(ConnectionStatus::Connected).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn forwarder_emits_only_on_reconnect() {
        let monitor = ConnectionMonitor::new();
        let (sender, mut receiver) = mpsc::channel(4);
        let forwarder = tokio::spawn(forward_reconnects(monitor.subscribe(), sender));

        monitor.transition(ConnectionStatus::Connecting).unwrap();
        tokio::task::yield_now().await;
        monitor.transition(ConnectionStatus::Connected).unwrap();
        tokio::task::yield_now().await;
        monitor
            .transition(ConnectionStatus::Reconnecting { attempt: 1 })
            .unwrap();
        // Give the forwarder a chance to observe the intermediate state
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        monitor.transition(ConnectionStatus::Connected).unwrap();

        let trigger = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.recv())
            .await
            .unwrap();
        assert_eq!(trigger, Some(SyncTrigger::Reconnect));

        drop(monitor);
        forwarder.await.unwrap();
        assert!(receiver.try_recv().is_err());
    }
}
