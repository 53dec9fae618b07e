// Local port availability and next-free-port search
use std::net::{Ipv4Addr, TcpListener};

use crate::error::ForwardError;

/// Answers "can port N be bound locally right now".
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes by binding `127.0.0.1:<port>`, the address kubectl listens on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalhostProbe;

impl PortProbe for LocalhostProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }
}

impl<F> PortProbe for F
where
    F: Fn(u16) -> bool + Send + Sync,
{
    fn is_free(&self, port: u16) -> bool {
        self(port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocation {
    pub requested: u16,
    pub assigned: u16,
}

impl PortAllocation {
    pub fn was_reassigned(&self) -> bool {
        self.requested != self.assigned
    }
}

/// Tries `desired`, `desired + 1`, … for at most `attempts` candidates,
/// never past 65535.
pub fn find_available_port(
    probe: &dyn PortProbe,
    desired: u16,
    attempts: u16,
) -> Result<PortAllocation, ForwardError> {
    if desired == 0 {
        return Err(ForwardError::InvalidPort("localPort"));
    }
    let end = desired.saturating_add(attempts.max(1) - 1);

    (desired..=end)
        .find(|port| probe.is_free(*port))
        .map(|assigned| PortAllocation {
            requested: desired,
            assigned,
        })
        .ok_or(ForwardError::NoFreePort { start: desired, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_desired_port_when_free() {
        let alloc = find_available_port(&|_: u16| true, 8080, 10).unwrap();
        assert_eq!(alloc.assigned, 8080);
        assert!(!alloc.was_reassigned());
    }

    #[test]
    fn walks_to_next_free_port() {
        let alloc = find_available_port(&|port: u16| port >= 8083, 8080, 10).unwrap();
        assert_eq!(alloc, PortAllocation { requested: 8080, assigned: 8083 });
        assert!(alloc.was_reassigned());
    }

    #[test]
    fn gives_up_after_attempts() {
        let err = find_available_port(&|_: u16| false, 8080, 3).unwrap_err();
        assert!(matches!(err, ForwardError::NoFreePort { start: 8080, end: 8082 }));
    }

    #[test]
    fn does_not_wrap_past_highest_port() {
        let err = find_available_port(&|_: u16| false, 65534, 10).unwrap_err();
        assert!(matches!(err, ForwardError::NoFreePort { start: 65534, end: 65535 }));
    }

    #[test]
    fn localhost_probe_sees_bound_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!LocalhostProbe.is_free(port));
        drop(listener);
    }
}
