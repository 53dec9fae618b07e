pub mod forward;
pub mod k8s;
