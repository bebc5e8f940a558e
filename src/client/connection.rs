use std::fmt;
use std::time::Duration;

/// Transport state shown to the viewer. Input is only accepted while connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32, retry_in: Duration },
    /// Shut down, or the party is over. No further reconnects.
    Closed,
}

impl ConnectionState {
    pub fn input_enabled(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Connecting => write!(f, "Connecting…"),
            ConnectionState::Reconnecting { attempt, retry_in } => write!(
                f,
                "Connecting… (retry {} in {:.1}s)",
                attempt,
                retry_in.as_secs_f64()
            ),
            ConnectionState::Closed => write!(f, "Disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_accepts_input() {
        assert!(ConnectionState::Connected.input_enabled());
        assert!(!ConnectionState::Connecting.input_enabled());
        assert!(!ConnectionState::Closed.input_enabled());
        assert!(!ConnectionState::Reconnecting {
            attempt: 1,
            retry_in: Duration::from_millis(500)
        }
        .input_enabled());
    }

    #[test]
    fn labels() {
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting…");
        assert_eq!(
            ConnectionState::Reconnecting {
                attempt: 2,
                retry_in: Duration::from_millis(1500)
            }
            .to_string(),
            "Connecting… (retry 2 in 1.5s)"
        );
    }
}
