//! Cluster call router for a security-monitoring manager's API.
//!
//! Routes each API operation to the local node, the master, or every
//! reachable node; filters arguments and results through the caller's
//! permissions; and merges per-node outcomes into one result or one error.
//!
//! See `DESIGN.md` for how the pieces fit together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod cluster;
pub mod operations;
pub mod rbac;

pub mod router;
pub mod transport;
