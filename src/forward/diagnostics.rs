// Maps kubectl port-forward output onto typed failures
use crate::error::ConnectionFailure;

/// Prefix kubectl prints once the local listener is bound, e.g.
/// `Forwarding from 127.0.0.1:50100 -> 8080`.
const READY_PREFIX: &str = "Forwarding from";

/// kubectl keeps running after these; only the one connection failed.
const PER_CONNECTION_MARKER: &str = "an error occurred forwarding";

/// Source tag of kubectl's klog lines about individual streams, e.g.
/// `E1019 12:00:00.000000 1234 portforward.go:413] error copying ...`.
const STREAM_SOURCE: &str = "portforward.go:";

pub fn is_ready_line(line: &str) -> bool {
    line.trim_start().starts_with(READY_PREFIX)
}

/// klog error lines start with `E` and the month-day stamp.
fn is_klog_error(line: &str) -> bool {
    let mut chars = line.trim_start().chars();
    chars.next() == Some('E') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

pub fn is_per_connection_error(line: &str) -> bool {
    line.to_ascii_lowercase().contains(PER_CONNECTION_MARKER)
        || (is_klog_error(line) && line.contains(STREAM_SOURCE))
}

/// Classifies one stderr line. `None` means the line is noise.
pub fn classify(line: &str) -> Option<ConnectionFailure> {
    let message = line.trim();
    if message.is_empty() {
        return None;
    }
    let lower = message.to_ascii_lowercase();
    let owned = || message.to_string();

    // Order matters: RBAC denials mention the resource, context errors say
    // "not found" too.
    if lower.contains("pod is not running") || lower.contains("current status=") {
        return Some(ConnectionFailure::PodNotRunning(owned()));
    }
    if lower.contains("forbidden") || lower.contains("cannot create resource \"pods/portforward\"") {
        return Some(ConnectionFailure::Forbidden(owned()));
    }
    if lower.contains("context was not found")
        || (lower.contains("context \"") && lower.contains("does not exist"))
    {
        return Some(ConnectionFailure::ContextNotFound(owned()));
    }
    if lower.contains("lost connection to pod") {
        return Some(ConnectionFailure::LostConnection(owned()));
    }
    if lower.contains("address already in use") || lower.contains("unable to listen on") {
        return Some(ConnectionFailure::AddressInUse(owned()));
    }
    if lower.contains("connection refused") {
        return Some(ConnectionFailure::ConnectionRefused(owned()));
    }
    if lower.contains("unable to connect to the server") || lower.contains("no route to host") {
        return Some(ConnectionFailure::Unreachable(owned()));
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return Some(ConnectionFailure::Timeout(owned()));
    }
    if lower.contains("not found") {
        return Some(ConnectionFailure::NotFound(owned()));
    }
    if lower.starts_with("error:") {
        return Some(ConnectionFailure::Other(owned()));
    }
    None
}
