//! Supervision of `kubectl port-forward` processes.
//!
//! - `manager`: the registry of forwards and the process supervisor
//! - `command`: request normalization and kubectl argument vectors
//! - `identity`: what makes two forwards the same forward
//! - `state`: per-forward status machine
//! - `process`: the spawning seam (tokio in production)
//! - `diagnostics`: kubectl output to typed failures
//! - `ports`: local port probing and allocation

pub mod command;
pub mod diagnostics;
pub mod identity;
pub mod manager;
pub mod ports;
pub mod process;
pub mod state;

pub use identity::ForwardId;
pub use manager::{ManagerOptions, PortForwardManager};
pub use state::ForwardStatus;
