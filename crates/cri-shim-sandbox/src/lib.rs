//! Pod sandbox provisioning for a docker-backed CRI shim.
//!
//! Creating a pod sandbox touches three independent systems: the container
//! engine, the checkpoint store and the pod network plugin. This crate
//! sequences those calls and rolls back the network stage when it fails.

pub mod sandbox;

pub use sandbox::{Error, Result, SandboxService};
