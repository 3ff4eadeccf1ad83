//! # Trustplane Control Daemon
//!
//! Wires the token service, metrics aggregator, and moderation executor
//! behind one HTTP/JSON API. Dashboard reads never mutate state; the only
//! writes are token flows, metric ingestion, and operator moderation.

pub mod api;
pub mod config;
pub mod state;

pub use api::router;
pub use config::ControlPlaneConfig;
pub use state::{AppState, Collaborators};
