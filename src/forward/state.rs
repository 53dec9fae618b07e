//! Status of a single forward and the events that move it.
//!
//! ```text
//! Starting ──Ready──▶ Active
//!    │                  │
//!    └─Failed/Exited─▶ Error ◀─Failed/Exited─┘
//!
//! any ──Stop──▶ Stopped
//! ```

use serde::Serialize;

use crate::error::ConnectionFailure;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ForwardStatus {
    /// Spawned, waiting for kubectl to report the bind.
    Starting,
    Active,
    Error { failure: ConnectionFailure },
    /// Terminal. Only ever seen on the snapshot returned by a stop.
    Stopped,
}

/// Something the supervised process (or the manager) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardEvent {
    Ready,
    Failed(ConnectionFailure),
    Exited { code: Option<i32>, last_stderr: Option<String> },
    Stop,
}

impl ForwardStatus {
    pub fn apply(&self, event: ForwardEvent) -> ForwardStatus {
        use ForwardStatus::*;

        match (self, event) {
            (Stopped, _) => Stopped,
            (_, ForwardEvent::Stop) => Stopped,
            // The first failure is the interesting one; kubectl tends to
            // follow it with an exit.
            (Error { failure }, _) => Error {
                failure: failure.clone(),
            },
            (Starting | Active, ForwardEvent::Ready) => Active,
            (Starting | Active, ForwardEvent::Failed(failure)) => Error { failure },
            (Starting | Active, ForwardEvent::Exited { code, last_stderr }) => Error {
                failure: ConnectionFailure::Exited {
                    code,
                    message: last_stderr.unwrap_or_else(|| "process exited".to_string()),
                },
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ForwardStatus::Error { .. })
    }

    /// Starting or Active.
    pub fn is_live(&self) -> bool {
        matches!(self, ForwardStatus::Starting | ForwardStatus::Active)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ForwardStatus::Starting => "starting",
            ForwardStatus::Active => "active",
            ForwardStatus::Error { .. } => "error",
            ForwardStatus::Stopped => "stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_becomes_active_on_ready() {
        assert_eq!(ForwardStatus::Starting.apply(ForwardEvent::Ready), ForwardStatus::Active);
    }

    #[test]
    fn exit_while_active_is_an_error() {
        let status = ForwardStatus::Active.apply(ForwardEvent::Exited {
            code: Some(1),
            last_stderr: Some("error: lost connection to pod".into()),
        });
        assert_eq!(
            status,
            ForwardStatus::Error {
                failure: ConnectionFailure::Exited {
                    code: Some(1),
                    message: "error: lost connection to pod".into(),
                }
            }
        );
    }

    #[test]
    fn error_keeps_first_failure() {
        let first = ConnectionFailure::Forbidden("denied".into());
        let status = ForwardStatus::Starting
            .apply(ForwardEvent::Failed(first.clone()))
            .apply(ForwardEvent::Exited { code: Some(1), last_stderr: None })
            .apply(ForwardEvent::Ready);
        assert_eq!(status, ForwardStatus::Error { failure: first });
    }

    #[test]
    fn stop_is_terminal_from_every_state() {
        let error = ForwardStatus::Error {
            failure: ConnectionFailure::Timeout("x".into()),
        };
        for status in [ForwardStatus::Starting, ForwardStatus::Active, error] {
            let stopped = status.apply(ForwardEvent::Stop);
            assert_eq!(stopped, ForwardStatus::Stopped);
            assert_eq!(stopped.apply(ForwardEvent::Ready), ForwardStatus::Stopped);
        }
    }
}
