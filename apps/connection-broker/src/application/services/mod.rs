//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionService`: connect/disconnect lifecycle, listings, refresh
//!   scan and query dispatch

mod connection_service;

pub use connection_service::{CONNECT_INTERRUPTED, ConnectionService};
